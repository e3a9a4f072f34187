use serde::Serialize;
use serde_json::{Value, json};

use crate::templates::TemplateDefaults;

/// Downgrade ladders, most expensive first.
const DETAIL_ORDER: [&str; 4] = ["forensic", "detailed", "normal", "overview"];
const TIME_RES_ORDER: [&str; 4] = ["event", "session", "day", "week"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Granularity {
    pub detail_level: String,
    pub time_resolution: String,
    pub evidence_depth: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub max_mu: u32,
    pub max_tokens: u32,
}

/// Compiled retrieval/answer spec: template defaults merged with question
/// overrides, before and after budget planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledSpec {
    pub template: String,
    pub scope_days: u32,
    pub granularity: Granularity,
    pub budget: Budget,
}

/// Merge template defaults with question overrides.
///
/// Strict order: question `setup.scope.time_window_days` overrides the scope;
/// question `expect.evidence.depth` overrides evidence depth (mu_ids or
/// mu_snippets only); question `budget.max_tokens` can only tighten.
pub fn merge_spec(
    template_name: &str,
    defaults: &TemplateDefaults,
    question_setup: Option<&Value>,
    question_expect: Option<&Value>,
    question_budget: Option<&Value>,
) -> CompiledSpec {
    let mut scope_days = defaults.scope_days.unwrap_or(7);
    if let Some(days) = question_setup
        .and_then(|s| s.get("scope"))
        .and_then(|s| s.get("time_window_days"))
        .and_then(Value::as_u64)
    {
        scope_days = days as u32;
    }

    let granularity_defaults = defaults.granularity.clone().unwrap_or_default();
    let mut evidence_depth = granularity_defaults
        .evidence_depth
        .unwrap_or_else(|| "mu_ids".to_string());
    if let Some(depth) = question_expect
        .and_then(|e| e.get("evidence"))
        .and_then(|e| e.get("depth"))
        .and_then(Value::as_str)
    {
        if depth == "mu_ids" || depth == "mu_snippets" {
            evidence_depth = depth.to_string();
        }
    }

    let budget_defaults = defaults.budget.clone().unwrap_or_default();
    let max_mu = budget_defaults.max_mu.unwrap_or(50);
    let mut max_tokens = budget_defaults.max_tokens.unwrap_or(900);
    if let Some(question_tokens) = question_budget
        .and_then(|b| b.get("max_tokens"))
        .and_then(Value::as_u64)
    {
        max_tokens = max_tokens.min(question_tokens as u32);
    }

    CompiledSpec {
        template: template_name.to_string(),
        scope_days,
        granularity: Granularity {
            detail_level: granularity_defaults
                .detail_level
                .unwrap_or_else(|| "normal".to_string()),
            time_resolution: granularity_defaults
                .time_resolution
                .unwrap_or_else(|| "day".to_string()),
            evidence_depth,
        },
        budget: Budget { max_mu, max_tokens },
    }
}

/// Cheap deterministic token estimator.
///
/// Not meant to be accurate, only stable across runs, so that the
/// downgrade order is testable.
pub fn estimate_tokens(spec: &CompiledSpec) -> u32 {
    let base = 220u32;

    // evidence cost dominates
    let per_mu = if spec.granularity.evidence_depth == "mu_ids" {
        18
    } else {
        55
    };

    let detail_boost = match spec.granularity.detail_level.as_str() {
        "overview" => 0,
        "detailed" => 260,
        "forensic" => 420,
        _ => 120,
    };
    let time_boost = match spec.granularity.time_resolution.as_str() {
        "week" => 0,
        "session" => 160,
        "event" => 260,
        _ => 80,
    };
    let scope_boost = (spec.scope_days.saturating_sub(7) * 18).min(600);

    base + spec.budget.max_mu * per_mu + detail_boost + time_boost + scope_boost
}

fn downgrade_ladder(current: &str, order: &[&str]) -> Option<String> {
    let i = order.iter().position(|x| *x == current)?;
    order.get(i + 1).map(|s| s.to_string())
}

fn halve_keeping_one(n: u32) -> u32 {
    ((n + 1) / 2).max(1)
}

/// Apply the deterministic downgrade policy until the estimate fits the
/// token budget.
///
/// Fixed order:
///   1) evidence_depth (mu_snippets -> mu_ids)
///   2) detail_level (forensic -> detailed -> normal -> overview)
///   3) time_resolution (event -> session -> day -> week)
///   4) scope_days halve (floor, keep >= 1)
///   5) max_mu halve (absolute last resort)
pub fn downgrade_for_budget(spec: &CompiledSpec) -> CompiledSpec {
    plan_downgrades(spec).0
}

/// Like [`downgrade_for_budget`], also returning the applied steps for
/// diagnostics.
pub fn plan_downgrades(spec: &CompiledSpec) -> (CompiledSpec, Vec<Value>) {
    let max_tokens = spec.budget.max_tokens;
    if max_tokens == 0 {
        return (spec.clone(), Vec::new());
    }

    let mut current = spec.clone();
    let mut plan = Vec::new();

    for _ in 0..32 {
        if estimate_tokens(&current) <= max_tokens {
            return (current, plan);
        }

        if current.granularity.evidence_depth == "mu_snippets"
            || current.granularity.evidence_depth == "raw_quotes"
        {
            let from = current.granularity.evidence_depth.clone();
            current.granularity.evidence_depth = "mu_ids".to_string();
            plan.push(json!({
                "step": "evidence_depth",
                "from": from,
                "to": "mu_ids",
                "estimate": estimate_tokens(&current),
            }));
            continue;
        }

        if let Some(next) = downgrade_ladder(&current.granularity.detail_level, &DETAIL_ORDER) {
            let from = current.granularity.detail_level.clone();
            current.granularity.detail_level = next.clone();
            plan.push(json!({
                "step": "detail_level",
                "from": from,
                "to": next,
                "estimate": estimate_tokens(&current),
            }));
            continue;
        }

        if let Some(next) = downgrade_ladder(&current.granularity.time_resolution, &TIME_RES_ORDER)
        {
            let from = current.granularity.time_resolution.clone();
            current.granularity.time_resolution = next.clone();
            plan.push(json!({
                "step": "time_resolution",
                "from": from,
                "to": next,
                "estimate": estimate_tokens(&current),
            }));
            continue;
        }

        let shrunk_days = halve_keeping_one(current.scope_days);
        if shrunk_days != current.scope_days {
            let from = current.scope_days;
            current.scope_days = shrunk_days;
            plan.push(json!({
                "step": "scope_days",
                "from": from,
                "to": shrunk_days,
                "estimate": estimate_tokens(&current),
            }));
            continue;
        }

        let shrunk_mu = halve_keeping_one(current.budget.max_mu);
        if shrunk_mu != current.budget.max_mu {
            let from = current.budget.max_mu;
            current.budget.max_mu = shrunk_mu;
            plan.push(json!({
                "step": "max_mu",
                "from": from,
                "to": shrunk_mu,
                "estimate": estimate_tokens(&current),
            }));
            continue;
        }

        break;
    }
    (current, plan)
}
