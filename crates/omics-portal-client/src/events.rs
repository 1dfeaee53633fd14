// SPDX-License-Identifier: Apache-2.0

use omics_portal_model::{DatasetId, ViewportState};
use serde::Serialize;
use tokio::sync::broadcast;

/// Notifications for UI layers. Delivery is best effort; lagging receivers drop events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PortalEvent {
    DatasetSwitched {
        from: Option<DatasetId>,
        to: Option<DatasetId>,
    },
    FetchFailed {
        cache: String,
        key: String,
        message: String,
    },
    DefaultsUnavailable {
        dataset: DatasetId,
        message: String,
    },
    SignalTrackUnavailable {
        dataset: DatasetId,
    },
    ViewportApplied {
        generation: u64,
        viewport: ViewportState,
    },
    ViewportFailed {
        generation: u64,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PortalEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PortalEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PortalEvent> {
        self.tx.subscribe()
    }
}
