// SPDX-License-Identifier: Apache-2.0

//! One [`EntityFetcher`] per cached entity kind, each a thin adapter over [`PortalApi`].

use super::EntityFetcher;
use crate::api::PortalApi;
use crate::error::ApiError;
use async_trait::async_trait;
use omics_portal_model::{
    DiffExpTable, EntityKey, ExpressionVector, MetaFeatureValues, PseudobulkExpression,
    SampleImage, SampleMetadataPayload,
};
use std::sync::Arc;

pub struct ExpressionFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<ExpressionVector> for ExpressionFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<ExpressionVector, ApiError> {
        self.0.expression(&key.dataset, &key.id).await
    }
}

pub struct PseudobulkFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<PseudobulkExpression> for PseudobulkFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<PseudobulkExpression, ApiError> {
        self.0.pseudobulk_expression(&key.dataset, &key.id).await
    }
}

/// Images exist per sample only, so the `all` key is never fetched.
pub struct SampleImageFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<SampleImage> for SampleImageFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<SampleImage, ApiError> {
        self.0.sample_image(&key.dataset, &key.id).await
    }
}

pub struct SampleMetadataFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<SampleMetadataPayload> for SampleMetadataFetcher {
    fn supports_aggregate(&self) -> bool {
        true
    }

    async fn fetch(&self, key: &EntityKey) -> Result<SampleMetadataPayload, ApiError> {
        if key.is_aggregate() {
            return self
                .0
                .all_sample_metadata(&key.dataset)
                .await
                .map(SampleMetadataPayload::AllSamples);
        }
        self.0
            .sample_metadata(&key.dataset, &key.id)
            .await
            .map(SampleMetadataPayload::Sample)
    }
}

/// Cluster keys; `all` resolves to the dataset-wide marker table.
pub struct MarkerGeneFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<DiffExpTable> for MarkerGeneFetcher {
    fn supports_aggregate(&self) -> bool {
        true
    }

    async fn fetch(&self, key: &EntityKey) -> Result<DiffExpTable, ApiError> {
        let cluster = (!key.is_aggregate()).then_some(&key.id);
        self.0.marker_genes(&key.dataset, cluster).await
    }
}

pub struct DiffExpFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<DiffExpTable> for DiffExpFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<DiffExpTable, ApiError> {
        self.0.diff_exp_genes(&key.dataset, &key.id).await
    }
}

pub struct MetaFeatureFetcher(pub Arc<dyn PortalApi>);

#[async_trait]
impl EntityFetcher<MetaFeatureValues> for MetaFeatureFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<MetaFeatureValues, ApiError> {
        self.0.meta_feature_values(&key.dataset, &key.id).await
    }
}
