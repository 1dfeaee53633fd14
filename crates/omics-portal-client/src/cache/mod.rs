mod entity_cache;
mod fetchers;

pub use entity_cache::{
    CacheEntry, CacheHandle, CacheMetrics, EntityCache, EntityFetcher, EntryStatus, PendingSync,
    SyncReport, SyncSummary, SyncTicket,
};
pub use fetchers::{
    DiffExpFetcher, ExpressionFetcher, MarkerGeneFetcher, MetaFeatureFetcher, PseudobulkFetcher,
    SampleImageFetcher, SampleMetadataFetcher,
};
