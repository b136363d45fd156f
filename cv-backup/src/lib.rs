pub mod api;

pub use cv_backup_core as core;
