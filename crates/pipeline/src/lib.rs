pub mod repair_pipeline;
pub mod run;
pub mod sync_pipeline;

pub use repair_pipeline::{RepairPipelineOptions, run_bundle_repair_pipeline};
pub use run::{PipelineRun, git_head, new_run_id, write_json_artifact, write_jsonl_artifact};
pub use sync_pipeline::{SyncPipelineOptions, run_manifest_sync_pipeline};
