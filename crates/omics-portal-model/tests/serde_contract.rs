// SPDX-License-Identifier: Apache-2.0

use omics_portal_model::{DatasetDefaults, EntityKey, EntityKind, SampleMetadataPayload};
use serde_json::json;

#[test]
fn entity_key_wire_shape_is_flat_and_snake_case() {
    let key: EntityKey = serde_json::from_value(json!({
        "dataset": "pd_snrna",
        "kind": "diff_exp_comparison",
        "id": "Microglia"
    }))
    .expect("entity key");
    assert_eq!(key.kind, EntityKind::DiffExpComparison);
    assert!(serde_json::from_value::<EntityKey>(json!({
        "dataset": "pd_snrna",
        "kind": "gene",
        "id": "SNCA",
        "extra": 1
    }))
    .is_err());
}

#[test]
fn entity_key_rejects_reserved_dataset() {
    assert!(serde_json::from_value::<EntityKey>(json!({
        "dataset": "all",
        "kind": "gene",
        "id": "SNCA"
    }))
    .is_err());
}

#[test]
fn dataset_defaults_tolerate_missing_lists() {
    let defaults: DatasetDefaults =
        serde_json::from_value(json!({"samples": ["S1", "S2"]})).expect("defaults");
    assert_eq!(defaults.samples.len(), 2);
    assert!(defaults.genes.is_empty());
    assert!(defaults.features.is_empty());
}

#[test]
fn sample_metadata_payload_is_tagged_by_scope() {
    let payload: SampleMetadataPayload = serde_json::from_value(json!({
        "scope": "all_samples",
        "value": {"S1": {"diagnosis": "PD"}}
    }))
    .expect("payload");
    match payload {
        SampleMetadataPayload::AllSamples(map) => assert_eq!(map["S1"]["diagnosis"], "PD"),
        SampleMetadataPayload::Sample(_) => panic!("expected aggregate payload"),
    }
}
