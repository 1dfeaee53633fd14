use omics_portal_model::{
    Chromosome, DatasetId, EntityId, EntityKey, EntityKind, GenomicRange, SampleImage,
    SpotCoordinate, Table, ViewportState, DEFAULT_RESOLUTION_FACTOR,
};
use serde_json::json;
use std::collections::BTreeSet;

#[test]
fn entity_keys_from_different_datasets_never_collide() {
    let a = DatasetId::parse("pd_snrna").expect("dataset a");
    let b = DatasetId::parse("pd_visium").expect("dataset b");
    let gene = EntityId::parse("SNCA").expect("gene");
    let keys: BTreeSet<EntityKey> = [
        EntityKey::new(a.clone(), EntityKind::Gene, gene.clone()),
        EntityKey::new(b, EntityKind::Gene, gene.clone()),
        EntityKey::new(a, EntityKind::Sample, gene),
    ]
    .into_iter()
    .collect();
    assert_eq!(keys.len(), 3);
}

#[test]
fn viewport_bin_size_matches_documented_example() {
    let range = GenomicRange::new(Chromosome::parse("chr1").expect("chr"), 1_000_000, 2_000_000)
        .expect("range");
    let viewport = ViewportState::from_range(&range, DEFAULT_RESOLUTION_FACTOR);
    assert_eq!(viewport.bin_size, 2000);
    assert_eq!(viewport.range(), range);
}

#[test]
fn inverted_range_is_a_validation_error() {
    let err = GenomicRange::new(Chromosome::parse("chr2").expect("chr"), 500, 100)
        .expect_err("inverted range");
    assert!(err.to_string().contains("start must be < end"));
}

#[test]
fn spot_coordinates_fall_back_to_table_index() {
    let table = Table::from_value(json!({
        "index": ["AAACAAGTATCTCCCA-1", "AAACACCAATAACTGC-1"],
        "columns": ["pxl_col_in_fullres", "pxl_row_in_fullres"],
        "data": [[1200.5, 830.0], [990.0, 1410.25]]
    }))
    .expect("coordinate table");
    let coordinates = SpotCoordinate::from_table(&table).expect("coordinates");
    assert_eq!(coordinates[1].spot_id, "AAACACCAATAACTGC-1");
    assert_eq!(coordinates[1].y, 1410.25);

    let image = SampleImage {
        image: vec![0x89, b'P', b'N', b'G'],
        content_type: Some("image/png".to_string()),
        coordinates,
        scales: Default::default(),
    };
    let encoded = serde_json::to_value(&image).expect("encode");
    assert!(encoded.get("image").is_none(), "raw image bytes stay out of JSON");
}
