// SPDX-License-Identifier: Apache-2.0

use omics_portal_model::DatasetId;

/// The active dataset. `epoch` changes on every switch and tags work started under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetContext {
    current: Option<DatasetId>,
    epoch: u64,
}

impl DatasetContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Option<&DatasetId> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sets the active dataset and returns whether it changed.
    /// Re-selecting the same dataset leaves the epoch alone.
    pub fn replace(&mut self, next: Option<DatasetId>) -> bool {
        if self.current == next {
            return false;
        }
        self.epoch += 1;
        self.current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_advances_only_on_change() {
        let mut ctx = DatasetContext::new();
        let a = DatasetId::parse("pd-a").expect("ds");
        assert!(ctx.replace(Some(a.clone())));
        assert_eq!(ctx.epoch(), 1);
        assert!(!ctx.replace(Some(a)));
        assert_eq!(ctx.epoch(), 1);
        assert!(ctx.replace(None));
        assert_eq!(ctx.epoch(), 2);
        assert!(ctx.current().is_none());
    }
}
