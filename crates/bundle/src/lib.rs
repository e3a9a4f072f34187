pub mod builder;
pub mod emit;
pub mod granularity;
pub mod pointer;
pub mod templates;
pub mod validate;

pub use builder::{Bundle, BundleRequest, build_bundle};
pub use emit::{EmitSummary, emit_repair_tasks};
pub use granularity::{
    Budget, CompiledSpec, Granularity, downgrade_for_budget, estimate_tokens, merge_spec,
    plan_downgrades,
};
pub use pointer::{ResolveOutcome, resolve_pointer};
pub use templates::{Template, TemplateDefaults, load_template};
pub use validate::validate_bundle;
