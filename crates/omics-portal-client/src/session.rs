// SPDX-License-Identifier: Apache-2.0

use crate::api::{HttpPortalApi, PortalApi};
use crate::cache::{
    CacheEntry, CacheHandle, DiffExpFetcher, EntityCache, EntityFetcher, ExpressionFetcher,
    MarkerGeneFetcher, MetaFeatureFetcher, PseudobulkFetcher, SampleImageFetcher,
    SampleMetadataFetcher, SyncSummary,
};
use crate::config::{validate_config_contract, PortalConfig};
use crate::dataset_context::DatasetContext;
use crate::error::PortalError;
use crate::events::{EventBus, PortalEvent};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::selection::{SelectionChange, SelectionSet};
use crate::viewport::ViewportResolutionController;
use omics_portal_model::{
    DatasetId, DiffExpTable, EntityId, EntityKey, EntityKind, ExpressionVector, MetaFeatureValues,
    PseudobulkExpression, SampleImage, SampleMetadataPayload,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Gene lookups with fewer characters than this return nothing and skip the network.
pub const MIN_GENE_QUERY_LEN: usize = 3;

/// One cache per fetched entity kind, all keyed by `(dataset, kind, id)`.
pub struct PortalCaches {
    pub expression: EntityCache<ExpressionVector>,
    pub pseudobulk: EntityCache<PseudobulkExpression>,
    pub sample_images: EntityCache<SampleImage>,
    pub sample_metadata: EntityCache<SampleMetadataPayload>,
    pub marker_genes: EntityCache<DiffExpTable>,
    pub diff_exp: EntityCache<DiffExpTable>,
    pub meta_features: EntityCache<MetaFeatureValues>,
}

impl PortalCaches {
    #[must_use]
    pub fn new(api: &Arc<dyn PortalApi>, retry: &RetryPolicy) -> Self {
        fn cache<T: Send + Sync + 'static>(
            name: &'static str,
            fetcher: Arc<dyn EntityFetcher<T>>,
            retry: &RetryPolicy,
        ) -> EntityCache<T> {
            EntityCache::new(name, fetcher).with_retry(retry.clone())
        }

        let expression: Arc<dyn EntityFetcher<ExpressionVector>> =
            Arc::new(ExpressionFetcher(Arc::clone(api)));
        let pseudobulk: Arc<dyn EntityFetcher<PseudobulkExpression>> =
            Arc::new(PseudobulkFetcher(Arc::clone(api)));
        let sample_images: Arc<dyn EntityFetcher<SampleImage>> =
            Arc::new(SampleImageFetcher(Arc::clone(api)));
        let sample_metadata: Arc<dyn EntityFetcher<SampleMetadataPayload>> =
            Arc::new(SampleMetadataFetcher(Arc::clone(api)));
        let marker_genes: Arc<dyn EntityFetcher<DiffExpTable>> =
            Arc::new(MarkerGeneFetcher(Arc::clone(api)));
        let diff_exp: Arc<dyn EntityFetcher<DiffExpTable>> =
            Arc::new(DiffExpFetcher(Arc::clone(api)));
        let meta_features: Arc<dyn EntityFetcher<MetaFeatureValues>> =
            Arc::new(MetaFeatureFetcher(Arc::clone(api)));
        Self {
            expression: cache("expression", expression, retry),
            pseudobulk: cache("pseudobulk", pseudobulk, retry),
            sample_images: cache("sample_images", sample_images, retry),
            sample_metadata: cache("sample_metadata", sample_metadata, retry),
            marker_genes: cache("marker_genes", marker_genes, retry),
            diff_exp: cache("diff_exp", diff_exp, retry),
            meta_features: cache("meta_features", meta_features, retry),
        }
    }

    /// Caches populated from the selection of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: EntityKind) -> Vec<&dyn CacheHandle> {
        match kind {
            EntityKind::Gene => vec![&self.expression, &self.pseudobulk],
            EntityKind::Sample => vec![&self.sample_images, &self.sample_metadata],
            EntityKind::Cluster => vec![&self.marker_genes],
            EntityKind::DiffExpComparison => vec![&self.diff_exp],
            EntityKind::MetaFeature => vec![&self.meta_features],
            EntityKind::CellType | EntityKind::SignalBin => Vec::new(),
        }
    }

    #[must_use]
    pub fn all(&self) -> [&dyn CacheHandle; 7] {
        [
            &self.expression,
            &self.pseudobulk,
            &self.sample_images,
            &self.sample_metadata,
            &self.marker_genes,
            &self.diff_exp,
            &self.meta_features,
        ]
    }
}

/// Outcome of one `set_selection` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionReport {
    pub dataset: DatasetId,
    pub kind: EntityKind,
    pub change: SelectionChange,
    pub caches: Vec<SyncSummary>,
    pub evicted: usize,
}

impl SelectionReport {
    #[must_use]
    pub fn failures(&self) -> BTreeMap<EntityKey, String> {
        self.caches
            .iter()
            .flat_map(|s| s.failures.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.caches
            .iter()
            .all(|s| s.failures.is_empty() && s.cancelled.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub from: Option<DatasetId>,
    pub to: Option<DatasetId>,
    pub changed: bool,
    pub invalidated: usize,
    pub defaults: Vec<SelectionReport>,
}

#[derive(Clone, Copy)]
enum SelectMode {
    Replace,
    /// Dataset defaults: applied only if the dataset is still the one they were
    /// fetched for and the user has not selected anything of that kind yet.
    DefaultIfEmpty { epoch: u64 },
}

/// The portal data layer: active dataset, selections, entity caches and the region viewport.
pub struct PortalSession {
    api: Arc<dyn PortalApi>,
    config: PortalConfig,
    context: RwLock<DatasetContext>,
    selection: Mutex<SelectionSet>,
    caches: PortalCaches,
    viewport: ViewportResolutionController,
    events: EventBus,
    last_error: Mutex<Option<PortalError>>,
}

fn parse_ids<S: AsRef<str>>(ids: &[S]) -> Result<Vec<EntityId>, PortalError> {
    ids.iter()
        .map(|raw| EntityId::parse(raw.as_ref()).map_err(|e| PortalError::InvalidSelection(e.0)))
        .collect()
}

impl PortalSession {
    #[must_use]
    pub fn new(api: Arc<dyn PortalApi>, config: PortalConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let caches = PortalCaches::new(&api, &config.retry);
        debug!(backend = api.backend_tag(), "portal session created");
        let viewport = ViewportResolutionController::new(
            Arc::clone(&api),
            config.viewport.clone(),
            config.retry.clone(),
            events.clone(),
        );
        Self {
            api,
            config,
            context: RwLock::new(DatasetContext::new()),
            selection: Mutex::new(SelectionSet::new()),
            caches,
            viewport,
            events,
            last_error: Mutex::new(None),
        }
    }

    /// Validates `config` and connects to the REST API it names.
    pub fn connect(config: PortalConfig) -> Result<Self, PortalError> {
        validate_config_contract(&config).map_err(PortalError::Config)?;
        let api = HttpPortalApi::new(&config.api_base_url, config.request_timeout)
            .map_err(|e| PortalError::Config(e.to_string()))?;
        Ok(Self::new(Arc::new(api), config))
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    #[must_use]
    pub fn caches(&self) -> &PortalCaches {
        &self.caches
    }

    #[must_use]
    pub fn viewport(&self) -> &ViewportResolutionController {
        &self.viewport
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }

    pub async fn current_dataset(&self) -> Option<DatasetId> {
        self.context.read().await.current().cloned()
    }

    pub async fn selection(&self) -> SelectionSet {
        self.selection.lock().await.clone()
    }

    pub async fn selected(&self, kind: EntityKind) -> Vec<EntityId> {
        self.selection.lock().await.get(kind).to_vec()
    }

    /// Most recent error not yet taken by the caller.
    pub async fn take_last_error(&self) -> Option<PortalError> {
        self.last_error.lock().await.take()
    }

    async fn record(&self, err: PortalError) -> PortalError {
        *self.last_error.lock().await = Some(err.clone());
        err
    }

    async fn require_dataset(&self) -> Result<DatasetId, PortalError> {
        match self.current_dataset().await {
            Some(dataset) => Ok(dataset),
            None => Err(self.record(PortalError::NoDatasetSelected).await),
        }
    }

    /// Replaces the selection of `kind`, fetches what is missing, then evicts what is unselected.
    pub async fn set_selection<S: AsRef<str>>(
        &self,
        kind: EntityKind,
        ids: &[S],
    ) -> Result<SelectionReport, PortalError> {
        let ids = match parse_ids(ids) {
            Ok(ids) => ids,
            Err(err) => return Err(self.record(err).await),
        };
        match self.select(kind, ids, SelectMode::Replace).await? {
            Some(report) => Ok(report),
            None => Err(self.record(PortalError::NoDatasetSelected).await),
        }
    }

    async fn select(
        &self,
        kind: EntityKind,
        ids: Vec<EntityId>,
        mode: SelectMode,
    ) -> Result<Option<SelectionReport>, PortalError> {
        // Registering the fetches under the context read lock keeps a concurrent
        // switch from interleaving between "read dataset" and "start fetches".
        let (dataset, epoch, change, pending) = {
            let ctx = self.context.read().await;
            let Some(dataset) = ctx.current().cloned() else {
                return match mode {
                    SelectMode::Replace => Err(self.record(PortalError::NoDatasetSelected).await),
                    SelectMode::DefaultIfEmpty { .. } => Ok(None),
                };
            };
            let mut selection = self.selection.lock().await;
            if let SelectMode::DefaultIfEmpty { epoch } = mode {
                if ctx.epoch() != epoch || !selection.get(kind).is_empty() {
                    return Ok(None);
                }
            }
            let change = selection.set(kind, ids);
            drop(selection);
            let keys: Vec<EntityKey> = change
                .current
                .iter()
                .map(|id| EntityKey::new(dataset.clone(), kind, id.clone()))
                .collect();
            let mut pending = Vec::new();
            for cache in self.caches.for_kind(kind) {
                pending.push(cache.begin(&keys).await);
            }
            (dataset, ctx.epoch(), change, pending)
        };
        debug!(
            dataset = %dataset,
            kind = %kind,
            added = change.added.len(),
            removed = change.removed.len(),
            "selection changed"
        );
        if kind == EntityKind::CellType {
            let cell_types = change
                .current
                .iter()
                .filter(|id| !id.is_all())
                .map(|id| id.as_str().to_string())
                .collect();
            self.viewport.set_cell_type_filter(cell_types).await;
        }

        let mut caches = Vec::with_capacity(pending.len());
        for sync in pending {
            caches.push(sync.wait().await);
        }
        let evicted = self.prune(kind, &dataset, epoch).await;

        let mut first_failure = None;
        for summary in &caches {
            for (key, message) in &summary.failures {
                self.events.emit(PortalEvent::FetchFailed {
                    cache: summary.cache.to_string(),
                    key: key.canonical_string(),
                    message: message.clone(),
                });
                first_failure.get_or_insert_with(|| PortalError::FetchFailure {
                    target: key.canonical_string(),
                    message: message.clone(),
                });
            }
        }
        if let Some(err) = first_failure {
            self.record(err).await;
        }
        Ok(Some(SelectionReport {
            dataset,
            kind,
            change,
            caches,
            evicted,
        }))
    }

    /// Evicts against the selection as it is now, not as it was when the fetch began.
    async fn prune(&self, kind: EntityKind, dataset: &DatasetId, epoch: u64) -> usize {
        let ctx = self.context.read().await;
        if ctx.epoch() != epoch {
            // The switch already invalidated every cache.
            return 0;
        }
        let keep = self.selection.lock().await.keep_keys(dataset, kind);
        let mut evicted = 0;
        for cache in self.caches.for_kind(kind) {
            evicted += cache.evict_unselected(&keep).await;
        }
        evicted
    }

    /// Parses `raw` and switches to it; an empty string clears the active dataset.
    pub async fn select_dataset(&self, raw: &str) -> Result<SwitchReport, PortalError> {
        let dataset = if raw.trim().is_empty() {
            None
        } else {
            match DatasetId::parse(raw) {
                Ok(dataset) => Some(dataset),
                Err(e) => return Err(self.record(PortalError::InvalidDataset(e.0)).await),
            }
        };
        self.switch_dataset(dataset).await
    }

    /// Makes `dataset` active. Caches, selections and viewport state of the previous
    /// dataset are dropped before any read can observe the new one.
    pub async fn switch_dataset(
        &self,
        dataset: Option<DatasetId>,
    ) -> Result<SwitchReport, PortalError> {
        let (from, epoch, invalidated) = {
            let mut ctx = self.context.write().await;
            let from = ctx.current().cloned();
            if !ctx.replace(dataset.clone()) {
                return Ok(SwitchReport {
                    from,
                    to: dataset,
                    changed: false,
                    invalidated: 0,
                    defaults: Vec::new(),
                });
            }
            let mut invalidated = 0;
            for cache in self.caches.all() {
                invalidated += cache.invalidate().await;
            }
            self.selection.lock().await.clear();
            self.viewport.reset_for_dataset(dataset.clone()).await;
            (from, ctx.epoch(), invalidated)
        };
        info!(
            from = from.as_ref().map_or("-", DatasetId::as_str),
            to = dataset.as_ref().map_or("-", DatasetId::as_str),
            invalidated,
            "dataset switched"
        );
        self.events.emit(PortalEvent::DatasetSwitched {
            from: from.clone(),
            to: dataset.clone(),
        });
        let mut report = SwitchReport {
            from,
            to: dataset.clone(),
            changed: true,
            invalidated,
            defaults: Vec::new(),
        };
        let Some(dataset) = dataset else {
            return Ok(report);
        };
        if let Err(err) = self.viewport.load_signal_catalog().await {
            self.record(err).await;
        }
        if self.config.apply_dataset_defaults {
            report.defaults = self.apply_defaults(&dataset, epoch).await;
        }
        Ok(report)
    }

    async fn apply_defaults(&self, dataset: &DatasetId, epoch: u64) -> Vec<SelectionReport> {
        let defaults = match retry_with_backoff(&self.config.retry, "dataset_defaults", || {
            self.api.dataset_defaults(dataset)
        })
        .await
        {
            Ok(defaults) => defaults,
            Err(err) => {
                warn!(dataset = %dataset, "dataset defaults unavailable: {err}");
                self.events.emit(PortalEvent::DefaultsUnavailable {
                    dataset: dataset.clone(),
                    message: err.to_string(),
                });
                return Vec::new();
            }
        };
        let mut reports = Vec::new();
        for (kind, ids) in [
            (EntityKind::Sample, &defaults.samples),
            (EntityKind::Gene, &defaults.genes),
            (EntityKind::MetaFeature, &defaults.features),
        ] {
            if ids.is_empty() {
                continue;
            }
            let ids = match parse_ids(ids) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(dataset = %dataset, kind = %kind, "ignoring invalid defaults: {err}");
                    continue;
                }
            };
            match self.select(kind, ids, SelectMode::DefaultIfEmpty { epoch }).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => debug!(dataset = %dataset, kind = %kind, "defaults not applied"),
                Err(err) => warn!(dataset = %dataset, kind = %kind, "defaults failed: {err}"),
            }
        }
        reports
    }

    async fn scoped<T: Send + Sync + 'static>(&self, cache: &EntityCache<T>) -> Vec<CacheEntry<T>> {
        let ctx = self.context.read().await;
        match ctx.current() {
            Some(dataset) => cache.snapshot_for(dataset).await,
            None => Vec::new(),
        }
    }

    pub async fn expression(&self) -> Vec<CacheEntry<ExpressionVector>> {
        self.scoped(&self.caches.expression).await
    }

    pub async fn pseudobulk(&self) -> Vec<CacheEntry<PseudobulkExpression>> {
        self.scoped(&self.caches.pseudobulk).await
    }

    pub async fn sample_images(&self) -> Vec<CacheEntry<SampleImage>> {
        self.scoped(&self.caches.sample_images).await
    }

    pub async fn sample_metadata(&self) -> Vec<CacheEntry<SampleMetadataPayload>> {
        self.scoped(&self.caches.sample_metadata).await
    }

    pub async fn marker_genes(&self) -> Vec<CacheEntry<DiffExpTable>> {
        self.scoped(&self.caches.marker_genes).await
    }

    pub async fn diff_exp(&self) -> Vec<CacheEntry<DiffExpTable>> {
        self.scoped(&self.caches.diff_exp).await
    }

    pub async fn meta_features(&self) -> Vec<CacheEntry<MetaFeatureValues>> {
        self.scoped(&self.caches.meta_features).await
    }

    /// Gene name lookup. Queries of one or two characters return nothing.
    pub async fn list_genes(&self, query: &str) -> Result<Vec<String>, PortalError> {
        let dataset = self.require_dataset().await?;
        let trimmed = query.trim();
        if !trimmed.is_empty() && trimmed.chars().count() < MIN_GENE_QUERY_LEN {
            return Ok(Vec::new());
        }
        let result = retry_with_backoff(&self.config.retry, "list_genes", || {
            self.api.list_genes(&dataset, trimmed)
        })
        .await;
        match result {
            Ok(genes) => Ok(genes),
            Err(err) => Err(self.record(PortalError::fetch(format!("{dataset} gene list"), &err)).await),
        }
    }

    pub async fn list_samples(&self, query: &str) -> Result<Vec<String>, PortalError> {
        let dataset = self.require_dataset().await?;
        let result = retry_with_backoff(&self.config.retry, "list_samples", || {
            self.api.list_samples(&dataset, query.trim())
        })
        .await;
        match result {
            Ok(samples) => Ok(samples),
            Err(err) => {
                Err(self.record(PortalError::fetch(format!("{dataset} sample list"), &err)).await)
            }
        }
    }

    pub async fn list_meta_features(&self, query: &str) -> Result<Vec<String>, PortalError> {
        let dataset = self.require_dataset().await?;
        let result = retry_with_backoff(&self.config.retry, "list_meta_features", || {
            self.api.list_meta_features(&dataset, query.trim())
        })
        .await;
        match result {
            Ok(features) => Ok(features),
            Err(err) => {
                Err(self.record(PortalError::fetch(format!("{dataset} meta features"), &err)).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakePortalApi;

    fn session() -> (Arc<FakePortalApi>, PortalSession) {
        let fake = Arc::new(FakePortalApi::default());
        let config = PortalConfig {
            retry: RetryPolicy::no_retry(),
            ..PortalConfig::default()
        };
        let api: Arc<dyn PortalApi> = fake.clone();
        (fake, PortalSession::new(api, config))
    }

    #[test]
    fn every_fetched_kind_has_caches() {
        let (_, session) = session();
        let caches = session.caches();
        assert_eq!(caches.for_kind(EntityKind::Gene).len(), 2);
        assert_eq!(caches.for_kind(EntityKind::Sample).len(), 2);
        assert!(caches.for_kind(EntityKind::SignalBin).is_empty());
        assert_eq!(caches.all().len(), 7);
    }

    #[tokio::test]
    async fn short_gene_queries_skip_the_network() {
        let (fake, session) = session();
        session
            .switch_dataset(Some(DatasetId::parse("pd").expect("ds")))
            .await
            .expect("switch");
        assert!(session.list_genes("SN").await.expect("genes").is_empty());
        assert_eq!(fake.call_count("list_genes").await, 0);
        session.list_genes("").await.expect("genes");
        assert_eq!(fake.call_count("list_genes").await, 1);
    }

    #[tokio::test]
    async fn dataset_text_is_validated() {
        let (_, session) = session();
        let err = session.select_dataset("all").await.expect_err("reserved");
        assert_eq!(err.code(), "invalid_dataset");
        assert!(session.current_dataset().await.is_none());
        let report = session.select_dataset("pd").await.expect("switch");
        assert!(report.changed);
        let report = session.select_dataset("").await.expect("clear");
        assert_eq!(report.to, None);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected_before_any_fetch() {
        let (fake, session) = session();
        session
            .switch_dataset(Some(DatasetId::parse("pd").expect("ds")))
            .await
            .expect("switch");
        let err = session
            .set_selection(EntityKind::Gene, &["SNCA", " padded "])
            .await
            .expect_err("invalid id");
        assert_eq!(err.code(), "invalid_selection");
        assert_eq!(fake.call_count("expression").await, 0);
        assert!(session.selected(EntityKind::Gene).await.is_empty());
    }
}
