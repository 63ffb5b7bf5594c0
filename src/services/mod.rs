//! Media services: import pipeline, storage, backfill

pub mod backfill;
pub mod checkpoint;
pub mod logging;
pub mod media_import;
pub mod retry;
pub mod supabase_storage;

pub use backfill::{
    BackfillDriver, BackfillItem, BackfillOptions, BackfillReport, BackfillRow, BackfillSource,
    BackfillTable,
};
pub use checkpoint::Checkpoint;
pub use logging::{LogFormat, init_tracing};
pub use media_import::{
    ImageImporter, ImportError, ImportOutcome, ImportRequest, MediaCatalog, MediaImport,
    MediaKind, ObjectStore, StorageRejected, UploadOutcome,
};
pub use retry::RetryConfig;
pub use supabase_storage::{BucketStore, StorageClient};
