// SPDX-License-Identifier: Apache-2.0

use omics_portal_client::SelectionSet;
use omics_portal_model::{EntityId, EntityKind};
use proptest::prelude::*;
use proptest::test_runner::Config;
use std::collections::HashSet;

fn id_strategy() -> impl Strategy<Value = EntityId> {
    prop_oneof![
        1 => Just("all".to_string()),
        6 => "[A-Z][A-Z0-9]{1,5}",
    ]
    .prop_map(|raw| EntityId::parse(&raw).expect("id"))
}

proptest! {
    #![proptest_config(Config::with_cases(128))]
    #[test]
    fn normalized_selection_has_no_duplicates_and_all_only_alone(
        ids in proptest::collection::vec(id_strategy(), 0..12)
    ) {
        let normalized = SelectionSet::normalize(ids.clone());
        let unique: HashSet<_> = normalized.iter().collect();
        prop_assert_eq!(unique.len(), normalized.len());
        if normalized.len() > 1 {
            prop_assert!(normalized.iter().all(|id| !id.is_all()));
        }
        for id in &ids {
            prop_assert!(id.is_all() || normalized.contains(id));
        }
    }

    #[test]
    fn change_accounts_for_every_id(
        first in proptest::collection::vec(id_strategy(), 0..8),
        second in proptest::collection::vec(id_strategy(), 0..8)
    ) {
        let mut selection = SelectionSet::new();
        let before = selection.set(EntityKind::Gene, first).current;
        let change = selection.set(EntityKind::Gene, second);
        prop_assert_eq!(selection.get(EntityKind::Gene), change.current.as_slice());
        for id in &change.added {
            prop_assert!(!before.contains(id) && change.current.contains(id));
        }
        for id in &change.removed {
            prop_assert!(before.contains(id) && !change.current.contains(id));
        }
        for id in &before {
            prop_assert!(change.current.contains(id) || change.removed.contains(id));
        }
    }
}
