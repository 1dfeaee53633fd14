#![forbid(unsafe_code)]
//! Value types shared by the omics portal data layer.
//!
//! Everything here is synchronous and I/O free: validated identifiers, the
//! `(dataset, kind, id)` entity key, genomic ranges with viewport bin sizing, and
//! the typed records each entity kind resolves to.

mod dataset;
mod entity;
mod records;
mod region;
mod table;

pub use dataset::{parse_dataset_id, DatasetId, ValidationError, ALL_SENTINEL, DATASET_ID_MAX_LEN};
pub use entity::{EntityId, EntityKey, EntityKind, ENTITY_ID_MAX_LEN};
pub use records::{
    DatasetDefaults, DiffExpRecord, DiffExpTable, ExpressionVector, GeneLocation, GwasHit,
    MetaFeatureValues, PseudobulkExpression, SampleImage, SampleMetadata, SampleMetadataPayload,
    ScaleFactors, SignalBinRecord, SpotCoordinate, GWAS_P_VALUE_FLOOR,
};
pub use region::{
    bin_size_for_width, Chromosome, GenomicRange, ViewportState, CHROMOSOME_MAX_LEN,
    DEFAULT_RESOLUTION_FACTOR,
};
pub use table::{row_f64, row_str, row_u64, SplitTable, Table, TableRow};

pub const CRATE_NAME: &str = "omics-portal-model";
