pub mod gc;
pub mod import;
pub mod layout;
pub mod list;
pub mod lock;
pub mod packer;
pub mod retry;
pub mod worker;

pub use gc::{GcItem, GcReport, scan_inbox_gc};
pub use import::{ImportResult, default_job_id, import_job};
pub use layout::{
    JobMetrics, JobPaths, JobSpec, JobStatus, append_log, job_paths, read_json, write_json,
};
pub use list::{JobListing, list_jobs};
pub use lock::{try_lock, unlock};
pub use packer::{CommandMuPacker, MuPacker};
pub use retry::{RetryResult, retry_job};
pub use worker::JobsWorker;
