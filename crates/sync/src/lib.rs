pub mod executor;
pub mod plan;
pub mod report;
pub mod tasks;

pub use executor::{SyncExecContext, exec_manifest_task, replay_manifest_task};
pub use plan::{PatchPlan, PlanAction, apply_plan, plan_patch};
pub use report::{Conflict, ManifestKind, SyncReport, analyze_sync, record_fingerprint};
pub use tasks::tasks_from_report;
