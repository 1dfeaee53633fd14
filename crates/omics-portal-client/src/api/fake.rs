// SPDX-License-Identifier: Apache-2.0

use super::{AllSampleMetadata, PortalApi, SignalRequest};
use crate::error::ApiError;
use async_trait::async_trait;
use omics_portal_model::{
    DatasetDefaults, DatasetId, DiffExpRecord, DiffExpTable, EntityId, ExpressionVector,
    GeneLocation, GenomicRange, GwasHit, MetaFeatureValues, PseudobulkExpression, SampleImage,
    SampleMetadata, ScaleFactors, SignalBinRecord, SpotCoordinate, Table, TableRow,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// Upper bound on synthesized bins per signal request.
const FAKE_MAX_BINS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: &'static str,
    pub dataset: String,
    pub target: String,
}

struct FailurePlan {
    error: ApiError,
    remaining: Option<usize>,
}

/// In-memory [`PortalApi`] that synthesizes dataset-tagged payloads.
///
/// Responses are deterministic functions of `(dataset, id)`. Delays, gates and
/// failures are keyed by the call target: the entity id for entity fetches, the
/// cell type or `chr:start-end` for signal fetches, the range for companion tracks.
pub struct FakePortalApi {
    pub genes: Mutex<HashMap<DatasetId, Vec<String>>>,
    pub samples: Mutex<HashMap<DatasetId, Vec<String>>>,
    pub meta_features: Mutex<HashMap<DatasetId, Vec<String>>>,
    pub defaults: Mutex<HashMap<DatasetId, DatasetDefaults>>,
    /// Datasets with signal tracks, mapped to their cell-type roster.
    pub signal_cell_types: Mutex<HashMap<DatasetId, Vec<String>>>,
    pub gwas_missing: Mutex<HashSet<DatasetId>>,
    pub fetch_calls: AtomicU64,
    calls: Mutex<Vec<FakeCall>>,
    delays: Mutex<HashMap<String, Duration>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failures: Mutex<HashMap<String, FailurePlan>>,
}

impl Default for FakePortalApi {
    fn default() -> Self {
        Self {
            genes: Mutex::new(HashMap::new()),
            samples: Mutex::new(HashMap::new()),
            meta_features: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            signal_cell_types: Mutex::new(HashMap::new()),
            gwas_missing: Mutex::new(HashSet::new()),
            fetch_calls: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl FakePortalApi {
    pub async fn set_delay(&self, target: &str, delay: Duration) {
        self.delays.lock().await.insert(target.to_string(), delay);
    }

    /// Calls for `target` block until [`FakePortalApi::open_gate`].
    pub async fn close_gate(&self, target: &str) {
        self.gates
            .lock()
            .await
            .insert(target.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub async fn open_gate(&self, target: &str) {
        if let Some(gate) = self.gates.lock().await.remove(target) {
            gate.close();
        }
    }

    /// Every call for `target` fails with `error`.
    pub async fn fail_always(&self, target: &str, error: ApiError) {
        self.failures.lock().await.insert(
            target.to_string(),
            FailurePlan {
                error,
                remaining: None,
            },
        );
    }

    /// The next `times` calls for `target` fail with `error`, later ones succeed.
    pub async fn fail_times(&self, target: &str, times: usize, error: ApiError) {
        self.failures.lock().await.insert(
            target.to_string(),
            FailurePlan {
                error,
                remaining: Some(times),
            },
        );
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub async fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, op: &str) -> usize {
        self.calls.lock().await.iter().filter(|c| c.op == op).count()
    }

    pub async fn call_count_for(&self, op: &str, target: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.op == op && c.target == target)
            .count()
    }

    async fn enter(
        &self,
        op: &'static str,
        dataset: &DatasetId,
        targets: &[&str],
    ) -> Result<(), ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().await.push(FakeCall {
            op,
            dataset: dataset.as_str().to_string(),
            target: targets.first().map(|t| t.to_string()).unwrap_or_default(),
        });
        let delay = {
            let delays = self.delays.lock().await;
            targets.iter().find_map(|t| delays.get(*t).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let gate = {
            let gates = self.gates.lock().await;
            targets.iter().find_map(|t| gates.get(*t).cloned())
        };
        if let Some(gate) = gate {
            // Closed semaphore means the gate was opened.
            let _ = gate.acquire().await;
        }
        let mut failures = self.failures.lock().await;
        for target in targets {
            if let Some(plan) = failures.get_mut(*target) {
                match &mut plan.remaining {
                    None => return Err(plan.error.clone()),
                    Some(0) => {}
                    Some(n) => {
                        *n -= 1;
                        return Err(plan.error.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn catalog(
        &self,
        source: &Mutex<HashMap<DatasetId, Vec<String>>>,
        dataset: &DatasetId,
        query: &str,
    ) -> Vec<String> {
        let needle = query.trim().to_ascii_lowercase();
        source
            .lock()
            .await
            .get(dataset)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| needle.is_empty() || n.to_ascii_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn seed(text: &str) -> f64 {
    (text.bytes().map(u64::from).sum::<u64>() % 97) as f64 / 10.0
}

fn cell_id(dataset: &DatasetId, i: usize) -> String {
    format!("{dataset}-cell-{i}")
}

fn diff_exp_row(dataset: &DatasetId, group: &str) -> DiffExpRecord {
    DiffExpRecord {
        gene: format!("{group}-marker"),
        group: Some(group.to_string()),
        score: Some(seed(dataset.as_str()) + seed(group)),
        log_fold_change: Some(1.5),
        p_value: Some(1e-6),
        p_value_adj: Some(1e-4),
    }
}

#[async_trait]
impl PortalApi for FakePortalApi {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn list_genes(&self, dataset: &DatasetId, query: &str) -> Result<Vec<String>, ApiError> {
        self.enter("list_genes", dataset, &[query]).await?;
        Ok(self.catalog(&self.genes, dataset, query).await)
    }

    async fn list_samples(&self, dataset: &DatasetId, query: &str) -> Result<Vec<String>, ApiError> {
        self.enter("list_samples", dataset, &[query]).await?;
        Ok(self.catalog(&self.samples, dataset, query).await)
    }

    async fn list_meta_features(
        &self,
        dataset: &DatasetId,
        query: &str,
    ) -> Result<Vec<String>, ApiError> {
        self.enter("list_meta_features", dataset, &[query]).await?;
        Ok(self.catalog(&self.meta_features, dataset, query).await)
    }

    async fn dataset_defaults(&self, dataset: &DatasetId) -> Result<DatasetDefaults, ApiError> {
        self.enter("dataset_defaults", dataset, &[dataset.as_str()]).await?;
        Ok(self
            .defaults
            .lock()
            .await
            .get(dataset)
            .cloned()
            .unwrap_or_default())
    }

    async fn expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<ExpressionVector, ApiError> {
        self.enter("expression", dataset, &[gene.as_str()]).await?;
        let base = seed(gene.as_str());
        Ok(ExpressionVector(
            (0..3).map(|i| (cell_id(dataset, i), base * (i + 1) as f64)).collect(),
        ))
    }

    async fn pseudobulk_expression(
        &self,
        dataset: &DatasetId,
        gene: &EntityId,
    ) -> Result<PseudobulkExpression, ApiError> {
        self.enter("pseudobulk_expression", dataset, &[gene.as_str()]).await?;
        let mut values = BTreeMap::new();
        values.insert(format!("{dataset}-S1"), seed(gene.as_str()));
        Ok(PseudobulkExpression(values))
    }

    async fn sample_metadata(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleMetadata, ApiError> {
        self.enter("sample_metadata", dataset, &[sample.as_str()]).await?;
        let rows: Vec<TableRow> = (0..2)
            .map(|i| {
                let mut row = TableRow::new();
                row.insert("sample".to_string(), json!(sample.as_str()));
                row.insert("n_genes".to_string(), json!(1000 + i));
                row
            })
            .collect();
        let mut sample_metadata = BTreeMap::new();
        sample_metadata.insert("dataset".to_string(), json!(dataset.as_str()));
        Ok(SampleMetadata {
            cell_metadata: Table {
                index: (0..2).map(|i| cell_id(dataset, i)).collect(),
                rows,
            },
            sample_metadata,
            cell_metadata_mapping: BTreeMap::new(),
        })
    }

    async fn all_sample_metadata(&self, dataset: &DatasetId) -> Result<AllSampleMetadata, ApiError> {
        self.enter("all_sample_metadata", dataset, &["all"]).await?;
        let samples = self.samples.lock().await.get(dataset).cloned().unwrap_or_default();
        Ok(samples
            .into_iter()
            .map(|s| {
                let mut meta = BTreeMap::new();
                meta.insert("dataset".to_string(), Value::String(dataset.as_str().to_string()));
                (s, meta)
            })
            .collect())
    }

    async fn meta_feature_values(
        &self,
        dataset: &DatasetId,
        feature: &EntityId,
    ) -> Result<MetaFeatureValues, ApiError> {
        self.enter("meta_feature_values", dataset, &[feature.as_str()]).await?;
        Ok(MetaFeatureValues {
            feature: feature.as_str().to_string(),
            values: (0..3)
                .map(|i| (cell_id(dataset, i), json!(format!("{feature}-{i}"))))
                .collect(),
        })
    }

    async fn sample_image(
        &self,
        dataset: &DatasetId,
        sample: &EntityId,
    ) -> Result<SampleImage, ApiError> {
        self.enter("sample_image", dataset, &[sample.as_str()]).await?;
        Ok(SampleImage {
            image: format!("{dataset}/{sample}").into_bytes(),
            content_type: Some("image/png".to_string()),
            coordinates: vec![SpotCoordinate {
                spot_id: format!("{sample}-AAAC-1"),
                x: 10.0,
                y: 20.0,
            }],
            scales: ScaleFactors {
                tissue_hires_scalef: Some(0.17),
                ..ScaleFactors::default()
            },
        })
    }

    async fn marker_genes(
        &self,
        dataset: &DatasetId,
        cluster: Option<&EntityId>,
    ) -> Result<DiffExpTable, ApiError> {
        let group = cluster.map_or("all", EntityId::as_str);
        self.enter("marker_genes", dataset, &[group]).await?;
        Ok(DiffExpTable(vec![diff_exp_row(dataset, group)]))
    }

    async fn diff_exp_genes(
        &self,
        dataset: &DatasetId,
        comparison: &EntityId,
    ) -> Result<DiffExpTable, ApiError> {
        self.enter("diff_exp_genes", dataset, &[comparison.as_str()]).await?;
        Ok(DiffExpTable(vec![diff_exp_row(dataset, comparison.as_str())]))
    }

    async fn signal_track_available(&self, dataset: &DatasetId) -> Result<bool, ApiError> {
        self.enter("signal_track_available", dataset, &[dataset.as_str()]).await?;
        Ok(self.signal_cell_types.lock().await.contains_key(dataset))
    }

    async fn signal_cell_types(&self, dataset: &DatasetId) -> Result<Vec<String>, ApiError> {
        self.enter("signal_cell_types", dataset, &[dataset.as_str()]).await?;
        self.signal_cell_types
            .lock()
            .await
            .get(dataset)
            .cloned()
            .ok_or_else(|| ApiError::status(404, format!("no cell types for {dataset}")))
    }

    async fn binned_signal(&self, request: &SignalRequest) -> Result<Vec<SignalBinRecord>, ApiError> {
        let range = request.range.canonical_string();
        self.enter(
            "binned_signal",
            &request.dataset,
            &[request.celltype.as_str(), range.as_str()],
        )
        .await?;
        let step = request.bin_size.max(1);
        let count = (request.range.width() / step).clamp(1, FAKE_MAX_BINS);
        Ok((0..count)
            .map(|i| SignalBinRecord {
                position: request.range.start + i * step,
                value: seed(&request.celltype) + i as f64 / count as f64,
                celltype: request.celltype.clone(),
            })
            .collect())
    }

    async fn gene_locations(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GeneLocation>, ApiError> {
        let target = range.canonical_string();
        self.enter("gene_locations", dataset, &[target.as_str(), "gene_locations"])
            .await?;
        Ok(vec![GeneLocation {
            gene: format!("{dataset}-gene@{}", range.start),
            start: range.start,
            end: range.end,
            strand: Some("+".to_string()),
        }])
    }

    async fn gwas_hits(
        &self,
        dataset: &DatasetId,
        range: &GenomicRange,
    ) -> Result<Vec<GwasHit>, ApiError> {
        let target = range.canonical_string();
        self.enter("gwas_hits", dataset, &[target.as_str(), "gwas"]).await?;
        if self.gwas_missing.lock().await.contains(dataset) {
            return Err(ApiError::status(404, format!("no gwas data for {dataset}")));
        }
        Ok(vec![GwasHit {
            snp_id: "rs356182".to_string(),
            position: range.start + range.width() / 2,
            p_value: 1e-9,
            beta_value: Some(0.2),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(id: &str) -> DatasetId {
        DatasetId::parse(id).expect("dataset")
    }

    #[tokio::test]
    async fn fake_records_calls_and_tags_payloads_by_dataset() {
        let fake = FakePortalApi::default();
        let gene = EntityId::parse("SNCA").expect("id");
        let a = fake.expression(&dataset("pd-a"), &gene).await.expect("a");
        let b = fake.expression(&dataset("pd-b"), &gene).await.expect("b");
        assert!(a.0.keys().all(|k| k.starts_with("pd-a-")));
        assert!(b.0.keys().all(|k| k.starts_with("pd-b-")));
        assert_eq!(fake.call_count_for("expression", "SNCA").await, 2);
    }

    #[tokio::test]
    async fn fake_failure_budget_runs_out() {
        let fake = FakePortalApi::default();
        let gene = EntityId::parse("GBA").expect("id");
        fake.fail_times("GBA", 1, ApiError::transport("reset")).await;
        assert!(fake.expression(&dataset("pd"), &gene).await.is_err());
        assert!(fake.expression(&dataset("pd"), &gene).await.is_ok());
    }

    #[tokio::test]
    async fn gate_holds_until_opened() {
        let fake = Arc::new(FakePortalApi::default());
        fake.close_gate("LRRK2").await;
        let task = {
            let fake = Arc::clone(&fake);
            tokio::spawn(async move {
                let gene = EntityId::parse("LRRK2").expect("id");
                fake.expression(&dataset("pd"), &gene).await
            })
        };
        tokio::task::yield_now().await;
        assert!(!task.is_finished());
        fake.open_gate("LRRK2").await;
        assert!(task.await.expect("join").is_ok());
    }
}
