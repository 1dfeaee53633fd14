#![forbid(unsafe_code)]
//! Client-side data layer for the omics portal.
//!
//! A [`PortalSession`] owns the active dataset, the user's entity selections and
//! one [`EntityCache`] per fetched entity kind. Selection changes fetch what is
//! missing and then prune what is no longer selected; dataset switches drop
//! everything tied to the previous dataset. Genome-browser range changes go
//! through the [`ViewportResolutionController`].

pub mod api;
pub mod cache;
pub mod config;
mod dataset_context;
pub mod error;
pub mod events;
pub mod retry;
pub mod selection;
mod session;
pub mod viewport;

pub use api::{FakePortalApi, HttpPortalApi, PortalApi, SignalRequest};
pub use cache::{CacheEntry, EntityCache, EntityFetcher, EntryStatus, SyncReport, SyncSummary};
pub use config::{validate_config_contract, PortalConfig, ViewportConfig};
pub use dataset_context::DatasetContext;
pub use error::{ApiError, ApiErrorKind, PortalError};
pub use events::{EventBus, PortalEvent};
pub use retry::RetryPolicy;
pub use selection::{SelectionChange, SelectionSet};
pub use session::{
    PortalCaches, PortalSession, SelectionReport, SwitchReport, MIN_GENE_QUERY_LEN,
};
pub use viewport::{SignalSnapshot, ViewportPhase, ViewportResolutionController};

pub const CRATE_NAME: &str = "omics-portal-client";
