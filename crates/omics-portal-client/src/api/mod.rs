// SPDX-License-Identifier: Apache-2.0

//! The REST boundary. Every network call the portal makes goes through [`PortalApi`];
//! caches and the viewport controller only ever see this trait.

mod fake;
mod http;

pub use fake::FakePortalApi;
pub use http::HttpPortalApi;

use crate::error::ApiError;
use async_trait::async_trait;
use omics_portal_model::{
    DatasetDefaults, DatasetId, DiffExpTable, EntityId, EntityKey, EntityKind, ExpressionVector,
    GeneLocation, GenomicRange, GwasHit, MetaFeatureValues, PseudobulkExpression, SampleImage,
    SampleMetadata, SignalBinRecord, ValidationError,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// One binned-signal request: a single cell type over a range at a fixed bin size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalRequest {
    pub dataset: DatasetId,
    pub range: GenomicRange,
    pub celltype: String,
    pub bin_size: u64,
}

impl SignalRequest {
    /// Key naming this track; bins are not cached by key, it identifies failures.
    pub fn entity_key(&self) -> Result<EntityKey, ValidationError> {
        EntityKey::parse(
            &self.dataset,
            EntityKind::SignalBin,
            &format!("{}@{}:{}", self.range, self.bin_size, self.celltype),
        )
    }
}

/// Per-sample metadata for every sample in a dataset, keyed by sample id.
pub type AllSampleMetadata = BTreeMap<String, BTreeMap<String, Value>>;

#[async_trait]
pub trait PortalApi: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn list_genes(&self, dataset: &DatasetId, query: &str) -> Result<Vec<String>, ApiError>;
    async fn list_samples(&self, dataset: &DatasetId, query: &str)
        -> Result<Vec<String>, ApiError>;
    async fn list_meta_features(
        &self,
        dataset: &DatasetId,
        query: &str,
    ) -> Result<Vec<String>, ApiError>;
    async fn dataset_defaults(&self, dataset: &DatasetId) -> Result<DatasetDefaults, ApiError>;

    async fn expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<ExpressionVector, ApiError>;
    async fn pseudobulk_expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<PseudobulkExpression, ApiError>;
    async fn sample_metadata(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleMetadata, ApiError>;
    async fn all_sample_metadata(&self, dataset: &DatasetId)
        -> Result<AllSampleMetadata, ApiError>;
    async fn meta_feature_values(
        &self,
        dataset: &DatasetId,
        feature: &EntityId,
    ) -> Result<MetaFeatureValues, ApiError>;
    async fn sample_image(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleImage, ApiError>;
    /// `None` asks for the marker genes of every cluster at once.
    async fn marker_genes(
        &self,
        dataset: &DatasetId,
        cluster: Option<&EntityId>,
    ) -> Result<DiffExpTable, ApiError>;
    async fn diff_exp_genes(
        &self,
        dataset: &DatasetId,
        comparison: &EntityId,
    ) -> Result<DiffExpTable, ApiError>;

    async fn signal_track_available(&self, dataset: &DatasetId) -> Result<bool, ApiError>;
    async fn signal_cell_types(&self, dataset: &DatasetId) -> Result<Vec<String>, ApiError>;
    async fn binned_signal(&self, request: &SignalRequest)
        -> Result<Vec<SignalBinRecord>, ApiError>;
    async fn gene_locations(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GeneLocation>, ApiError>;
    async fn gwas_hits(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GwasHit>, ApiError>;
}
