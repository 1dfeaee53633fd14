// SPDX-License-Identifier: Apache-2.0

//! Turns a stream of visible-range changes into signal-track fetches.
//!
//! Range events are debounced; once the window is quiet the controller derives the
//! bin size, and only when the bin size or window changed does it issue a fetch.
//! Every fetch carries a generation number. Starting a newer fetch aborts the older
//! task, and a result whose generation is no longer current is discarded.

use crate::api::{PortalApi, SignalRequest};
use crate::config::ViewportConfig;
use crate::error::{ApiError, PortalError};
use crate::events::{EventBus, PortalEvent};
use crate::retry::{retry_with_backoff, RetryPolicy};
use omics_portal_model::{
    DatasetId, GeneLocation, GenomicRange, GwasHit, SignalBinRecord, ViewportState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportPhase {
    Idle,
    PendingDebounce,
    Resolving,
    Fetching,
}

/// Everything one applied viewport fetch produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSnapshot {
    pub dataset: DatasetId,
    pub generation: u64,
    pub viewport: ViewportState,
    /// Bins per cell type, ordered by position.
    pub tracks: BTreeMap<String, Vec<SignalBinRecord>>,
    pub track_errors: BTreeMap<String, String>,
    pub genes: Vec<GeneLocation>,
    /// `None` when GWAS data is unavailable for this range; the track is hidden.
    pub gwas: Option<Vec<GwasHit>>,
    pub signal_available: bool,
}

struct FetchPlan {
    dataset: DatasetId,
    viewport: ViewportState,
    generation: u64,
    cell_types: Vec<String>,
    signal_available: bool,
}

#[derive(Default)]
struct ControllerState {
    dataset: Option<DatasetId>,
    bind_epoch: u64,
    signal_available: Option<bool>,
    roster: Vec<String>,
    cell_type_filter: Vec<String>,
    pending: Option<GenomicRange>,
    debounce_task: Option<JoinHandle<()>>,
    fetch_task: Option<JoinHandle<()>>,
    generation: u64,
    last_requested: Option<ViewportState>,
    snapshot: Option<Arc<SignalSnapshot>>,
    last_error: Option<PortalError>,
    fetches_issued: u64,
    stale_discarded: u64,
}

impl ControllerState {
    fn cell_types(&self) -> Vec<String> {
        if self.cell_type_filter.is_empty() {
            return self.roster.clone();
        }
        self.roster
            .iter()
            .filter(|c| self.cell_type_filter.contains(c))
            .cloned()
            .collect()
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
    }
}

struct Shared {
    api: Arc<dyn PortalApi>,
    config: ViewportConfig,
    retry: RetryPolicy,
    events: EventBus,
    phase: watch::Sender<ViewportPhase>,
    state: Mutex<ControllerState>,
}

#[derive(Clone)]
pub struct ViewportResolutionController {
    shared: Arc<Shared>,
}

impl ViewportResolutionController {
    #[must_use]
    pub fn new(
        api: Arc<dyn PortalApi>,
        config: ViewportConfig,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        let (phase, _) = watch::channel(ViewportPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                retry,
                events,
                phase,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ViewportConfig {
        &self.shared.config
    }

    /// Forgets everything tied to the previous dataset and cancels its work.
    pub async fn reset_for_dataset(&self, dataset: Option<DatasetId>) {
        let mut st = self.shared.state.lock().await;
        st.abort_tasks();
        st.dataset = dataset;
        st.bind_epoch += 1;
        // Bumping the generation makes any result still in flight stale.
        st.generation += 1;
        st.signal_available = None;
        st.roster.clear();
        st.pending = None;
        st.last_requested = None;
        st.snapshot = None;
        st.last_error = None;
        self.shared.settle_phase(&st);
    }

    /// Loads signal availability and the cell-type roster for the bound dataset.
    pub async fn load_signal_catalog(&self) -> Result<(), PortalError> {
        let (dataset, epoch) = {
            let st = self.shared.state.lock().await;
            let dataset = st.dataset.clone().ok_or(PortalError::NoDatasetSelected)?;
            (dataset, st.bind_epoch)
        };
        let shared = &self.shared;
        let available = retry_with_backoff(&shared.retry, "signal_track_available", || {
            shared.api.signal_track_available(&dataset)
        })
        .await;
        let (available, roster, failure) = match available {
            Ok(true) => {
                match retry_with_backoff(&shared.retry, "signal_cell_types", || {
                    shared.api.signal_cell_types(&dataset)
                })
                .await
                {
                    Ok(roster) => (true, roster, None),
                    Err(err) => (
                        true,
                        Vec::new(),
                        Some(PortalError::fetch(format!("{dataset} signal cell types"), &err)),
                    ),
                }
            }
            Ok(false) => (false, Vec::new(), None),
            Err(err) => (
                false,
                Vec::new(),
                Some(PortalError::fetch(format!("{dataset} signal availability"), &err)),
            ),
        };
        let roster: Vec<String> = roster
            .into_iter()
            .filter(|c| !shared.config.is_excluded(c))
            .collect();

        let mut st = shared.state.lock().await;
        if st.bind_epoch != epoch {
            debug!(dataset = %dataset, "signal catalog for a replaced dataset discarded");
            return Ok(());
        }
        st.signal_available = Some(available);
        st.roster = roster;
        // Re-resolve the current window with the new roster.
        st.last_requested = None;
        if !available {
            info!(dataset = %dataset, "dataset has no signal tracks");
            shared.events.emit(PortalEvent::SignalTrackUnavailable {
                dataset: dataset.clone(),
            });
        }
        match failure {
            Some(err) => {
                warn!(dataset = %dataset, "signal catalog load failed: {err}");
                st.last_error = Some(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }

    pub async fn bind_dataset(&self, dataset: DatasetId) -> Result<(), PortalError> {
        self.reset_for_dataset(Some(dataset)).await;
        self.load_signal_catalog().await
    }

    /// Restricts signal tracks to these cell types; empty means the whole roster.
    pub async fn set_cell_type_filter(&self, cell_types: Vec<String>) {
        let mut st = self.shared.state.lock().await;
        if st.cell_type_filter != cell_types {
            st.cell_type_filter = cell_types;
            st.last_requested = None;
        }
    }

    /// A visible-range change. Restarts the debounce window.
    pub async fn set_chromosome_range(&self, range: GenomicRange) -> Result<(), PortalError> {
        let mut st = self.shared.state.lock().await;
        if range.start >= range.end {
            let err = PortalError::InvalidViewportRange(format!(
                "{}:{}-{}: start must be < end",
                range.chromosome, range.start, range.end
            ));
            st.last_error = Some(err.clone());
            return Err(err);
        }
        if st.dataset.is_none() {
            return Err(PortalError::NoDatasetSelected);
        }
        st.pending = Some(range);
        if let Some(task) = st.debounce_task.take() {
            task.abort();
        }
        let shared = Arc::clone(&self.shared);
        let delay = self.shared.config.debounce;
        st.debounce_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.resolve(true).await;
        }));
        self.shared.set_phase(ViewportPhase::PendingDebounce);
        Ok(())
    }

    /// Parses region text such as `chr4:89,700,000-89,900,000` and submits it.
    pub async fn set_region_text(&self, text: &str) -> Result<(), PortalError> {
        match GenomicRange::parse(text) {
            Ok(range) => self.set_chromosome_range(range).await,
            Err(e) => {
                let err = PortalError::InvalidViewportRange(e.0);
                self.shared.state.lock().await.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Ends the debounce window now.
    pub async fn flush(&self) {
        {
            let mut st = self.shared.state.lock().await;
            match st.debounce_task.take() {
                Some(task) => task.abort(),
                None if st.pending.is_none() => return,
                None => {}
            }
        }
        self.shared.resolve(false).await;
    }

    /// Resolves once no debounce is pending and no fetch is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.phase.subscribe();
        loop {
            if *rx.borrow_and_update() == ViewportPhase::Idle {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    #[must_use]
    pub fn phase(&self) -> ViewportPhase {
        *self.shared.phase.borrow()
    }

    pub async fn snapshot(&self) -> Option<Arc<SignalSnapshot>> {
        self.shared.state.lock().await.snapshot.clone()
    }

    /// Viewport of the last applied fetch.
    pub async fn viewport_state(&self) -> Option<ViewportState> {
        self.snapshot().await.map(|s| s.viewport.clone())
    }

    pub async fn generation(&self) -> u64 {
        self.shared.state.lock().await.generation
    }

    pub async fn last_error(&self) -> Option<PortalError> {
        self.shared.state.lock().await.last_error.clone()
    }

    pub async fn signal_available(&self) -> Option<bool> {
        self.shared.state.lock().await.signal_available
    }

    /// Fails when the bound dataset is known to have no signal tracks.
    pub async fn ensure_signal_available(&self) -> Result<(), PortalError> {
        let st = self.shared.state.lock().await;
        match (&st.dataset, st.signal_available) {
            (None, _) => Err(PortalError::NoDatasetSelected),
            (Some(dataset), Some(false)) => Err(PortalError::UnavailableSignalTrack {
                dataset: dataset.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub async fn cell_types(&self) -> Vec<String> {
        self.shared.state.lock().await.cell_types()
    }

    pub async fn fetches_issued(&self) -> u64 {
        self.shared.state.lock().await.fetches_issued
    }

    pub async fn stale_discarded(&self) -> u64 {
        self.shared.state.lock().await.stale_discarded
    }
}

impl Shared {
    fn set_phase(&self, phase: ViewportPhase) {
        self.phase.send_replace(phase);
    }

    fn settle_phase(&self, st: &ControllerState) {
        let phase = if st.debounce_task.is_some() {
            ViewportPhase::PendingDebounce
        } else if st.fetch_task.is_some() {
            ViewportPhase::Fetching
        } else {
            ViewportPhase::Idle
        };
        self.set_phase(phase);
    }

    async fn resolve(self: &Arc<Self>, from_debounce: bool) {
        let mut st = self.state.lock().await;
        if from_debounce {
            // The handle belongs to the task running this; dropping it detaches.
            st.debounce_task = None;
        }
        let Some(range) = st.pending.take() else {
            self.settle_phase(&st);
            return;
        };
        self.set_phase(ViewportPhase::Resolving);
        let Some(dataset) = st.dataset.clone() else {
            self.settle_phase(&st);
            return;
        };
        let viewport = ViewportState::from_range(&range, self.config.resolution_factor);
        if st
            .last_requested
            .as_ref()
            .is_some_and(|last| !last.differs_materially(&viewport))
        {
            debug!(range = %range, bin_size = viewport.bin_size, "viewport unchanged, no fetch");
            self.settle_phase(&st);
            return;
        }
        st.generation += 1;
        let generation = st.generation;
        st.last_requested = Some(viewport.clone());
        if let Some(task) = st.fetch_task.take() {
            task.abort();
            debug!(generation, "superseded viewport fetch aborted");
        }
        let plan = FetchPlan {
            dataset,
            viewport,
            generation,
            cell_types: st.cell_types(),
            signal_available: st.signal_available == Some(true),
        };
        info!(
            dataset = %plan.dataset,
            range = %range,
            bin_size = plan.viewport.bin_size,
            generation,
            "viewport fetch issued"
        );
        let me = Arc::clone(self);
        st.fetch_task = Some(tokio::spawn(async move {
            let generation = plan.generation;
            let outcome = me.fetch_region(&plan).await;
            let mut st = me.state.lock().await;
            me.apply_outcome(&mut st, generation, outcome);
        }));
        st.fetches_issued += 1;
        self.settle_phase(&st);
    }

    /// Applies a finished fetch unless a newer generation has been issued since.
    fn apply_outcome(
        &self,
        st: &mut ControllerState,
        generation: u64,
        outcome: Result<SignalSnapshot, PortalError>,
    ) -> bool {
        if st.generation != generation {
            st.stale_discarded += 1;
            debug!(generation, current = st.generation, "stale viewport response discarded");
            return false;
        }
        st.fetch_task = None;
        match outcome {
            Ok(snapshot) => {
                debug!(
                    generation,
                    tracks = snapshot.tracks.len(),
                    genes = snapshot.genes.len(),
                    "viewport applied"
                );
                self.events.emit(PortalEvent::ViewportApplied {
                    generation,
                    viewport: snapshot.viewport.clone(),
                });
                st.snapshot = Some(Arc::new(snapshot));
                st.last_error = None;
            }
            Err(err) => {
                warn!(generation, "viewport fetch failed: {err}");
                self.events.emit(PortalEvent::ViewportFailed {
                    generation,
                    message: err.to_string(),
                });
                st.last_error = Some(err);
                // Allow the same window to be retried by the next range event.
                st.last_requested = None;
            }
        }
        self.settle_phase(st);
        true
    }

    async fn fetch_region(&self, plan: &FetchPlan) -> Result<SignalSnapshot, PortalError> {
        let range = plan.viewport.range();
        let signals = async {
            let mut tracks = BTreeMap::new();
            let mut errors = BTreeMap::new();
            if !plan.signal_available {
                return (tracks, errors);
            }
            let mut set = JoinSet::new();
            for celltype in &plan.cell_types {
                let api = Arc::clone(&self.api);
                let retry = self.retry.clone();
                let request = SignalRequest {
                    dataset: plan.dataset.clone(),
                    range: range.clone(),
                    celltype: celltype.clone(),
                    bin_size: plan.viewport.bin_size,
                };
                set.spawn(async move {
                    let result = retry_with_backoff(&retry, "binned_signal", || {
                        api.binned_signal(&request)
                    })
                    .await;
                    (request, result)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((request, Ok(bins))) => {
                        tracks.insert(request.celltype, bins);
                    }
                    Ok((request, Err(err))) => {
                        warn!(celltype = %request.celltype, "signal track fetch failed: {err}");
                        let key = request
                            .entity_key()
                            .map_or_else(|_| request.celltype.clone(), |k| k.canonical_string());
                        self.events.emit(PortalEvent::FetchFailed {
                            cache: "signal".to_string(),
                            key,
                            message: err.to_string(),
                        });
                        errors.insert(request.celltype, err.to_string());
                    }
                    Err(join_err) => warn!("signal track task ended early: {join_err}"),
                }
            }
            (tracks, errors)
        };
        let genes = async {
            if !self.config.fetch_companion_tracks {
                return Ok(Vec::new());
            }
            retry_with_backoff(&self.retry, "gene_locations", || {
                self.api.gene_locations(&plan.dataset, &range)
            })
            .await
        };
        let gwas = async {
            if !self.config.fetch_companion_tracks {
                return None;
            }
            let hits: Result<Vec<GwasHit>, ApiError> =
                retry_with_backoff(&self.retry, "gwas_hits", || {
                    self.api.gwas_hits(&plan.dataset, &range)
                })
                .await;
            match hits {
                Ok(hits) => Some(hits),
                Err(err) => {
                    debug!(range = %range, "gwas track unavailable: {err}");
                    None
                }
            }
        };
        let ((tracks, track_errors), genes, gwas) = tokio::join!(signals, genes, gwas);

        if tracks.is_empty() && !track_errors.is_empty() {
            let message = track_errors
                .iter()
                .map(|(celltype, err)| format!("{celltype}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PortalError::FetchFailure {
                target: format!("signal {range}"),
                message,
            });
        }
        let genes = genes.map_err(|e| PortalError::fetch(format!("gene locations {range}"), &e))?;
        Ok(SignalSnapshot {
            dataset: plan.dataset.clone(),
            generation: plan.generation,
            viewport: plan.viewport.clone(),
            tracks,
            track_errors,
            genes,
            gwas,
            signal_available: plan.signal_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FakePortalApi;

    fn controller() -> ViewportResolutionController {
        ViewportResolutionController::new(
            Arc::new(FakePortalApi::default()),
            ViewportConfig::default(),
            RetryPolicy::no_retry(),
            EventBus::new(16),
        )
    }

    fn snapshot(generation: u64) -> SignalSnapshot {
        let range = GenomicRange::parse("chr1:0-10000").expect("range");
        SignalSnapshot {
            dataset: DatasetId::parse("pd").expect("ds"),
            generation,
            viewport: ViewportState::from_range(&range, 0.002),
            tracks: BTreeMap::new(),
            track_errors: BTreeMap::new(),
            genes: Vec::new(),
            gwas: None,
            signal_available: false,
        }
    }

    #[tokio::test]
    async fn older_generation_never_overwrites_newer() {
        let ctl = controller();
        let shared = &ctl.shared;
        let mut st = shared.state.lock().await;
        st.generation = 2;
        assert!(shared.apply_outcome(&mut st, 2, Ok(snapshot(2))));
        assert!(!shared.apply_outcome(&mut st, 1, Ok(snapshot(1))));
        assert_eq!(st.snapshot.as_ref().map(|s| s.generation), Some(2));
        assert_eq!(st.stale_discarded, 1);
    }

    #[tokio::test]
    async fn failed_fetch_records_error_and_allows_retry() {
        let ctl = controller();
        let shared = &ctl.shared;
        let mut st = shared.state.lock().await;
        st.generation = 1;
        st.last_requested = Some(snapshot(1).viewport);
        let err = PortalError::FetchFailure {
            target: "signal".to_string(),
            message: "boom".to_string(),
        };
        assert!(shared.apply_outcome(&mut st, 1, Err(err.clone())));
        assert_eq!(st.last_error, Some(err));
        assert!(st.last_requested.is_none());
        assert!(st.snapshot.is_none());
    }

    #[tokio::test]
    async fn range_events_need_a_dataset() {
        let ctl = controller();
        let range = GenomicRange::parse("chr1:100-200").expect("range");
        assert_eq!(
            ctl.set_chromosome_range(range).await,
            Err(PortalError::NoDatasetSelected)
        );
        assert_eq!(ctl.phase(), ViewportPhase::Idle);
    }
}
