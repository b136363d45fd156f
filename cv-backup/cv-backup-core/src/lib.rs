pub mod config;
pub mod local;
pub mod policy;
pub mod registry;
pub mod slug;
pub mod storage;

/// The editable state handed over by the editor. Treated as opaque JSON.
pub type Document = serde_json::Value;

pub use policy::{BackupMode, BackupPolicy, LoadOutcome, WriteOutcome};
pub use storage::{BackendKind, BackupBackend, BackupError, BackupResult};
