pub mod journal;
pub mod protocol;
pub mod repair;

pub use journal::{JournalRow, append_task, init_journal, load_task, query_tasks};
pub use protocol::{
    TaskInput, TaskOutput, TaskResult, TaskSpec, TaskStats, TaskStatus, diagnostic, new_task_id,
};
pub use repair::{RepairContext, exec_repair_task};
