use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

const DETAIL_LEVELS: [&str; 4] = ["overview", "normal", "detailed", "forensic"];
const TIME_RESOLUTIONS: [&str; 4] = ["week", "day", "session", "event"];
const EVIDENCE_DEPTHS: [&str; 3] = ["mu_ids", "mu_snippets", "raw_quotes"];

/// Versioned answer template: deterministic defaults for scope, granularity
/// and budget, stored as one YAML file per template name.
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub defaults: TemplateDefaults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateDefaults {
    #[serde(default)]
    pub scope_days: Option<u32>,
    #[serde(default)]
    pub granularity: Option<GranularityDefaults>,
    #[serde(default)]
    pub budget: Option<BudgetDefaults>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GranularityDefaults {
    #[serde(default)]
    pub detail_level: Option<String>,
    #[serde(default)]
    pub time_resolution: Option<String>,
    #[serde(default)]
    pub evidence_depth: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetDefaults {
    #[serde(default)]
    pub max_mu: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn check_enum(field: &str, value: Option<&str>, allowed: &[&str]) -> Result<()> {
    if let Some(value) = value {
        if !allowed.contains(&value) {
            bail!("invalid template: {field}={value:?} (expected one of {allowed:?})");
        }
    }
    Ok(())
}

/// Load `<templates_dir>/<name>.yaml` and validate its shape.
pub fn load_template(templates_dir: impl AsRef<Path>, name: &str) -> Result<Template> {
    let path = templates_dir.as_ref().join(format!("{name}.yaml"));
    if !path.exists() {
        bail!("missing template: {name} ({})", path.display());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading template {}", path.display()))?;
    let template: Template = serde_yaml::from_str(&text)
        .with_context(|| format!("template must be a mapping: {}", path.display()))?;

    if let Some(granularity) = &template.defaults.granularity {
        check_enum(
            "granularity.detail_level",
            granularity.detail_level.as_deref(),
            &DETAIL_LEVELS,
        )?;
        check_enum(
            "granularity.time_resolution",
            granularity.time_resolution.as_deref(),
            &TIME_RESOLUTIONS,
        )?;
        check_enum(
            "granularity.evidence_depth",
            granularity.evidence_depth.as_deref(),
            &EVIDENCE_DEPTHS,
        )?;
    }
    Ok(template)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    pub fn write_template(dir: &Path, name: &str, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(format!("{name}.yaml")), body).unwrap();
    }

    pub const TIME_OVERVIEW: &str = "\
name: time_overview_v1
version: \"0.1\"
defaults:
  scope_days: 7
  granularity:
    detail_level: normal
    time_resolution: day
    evidence_depth: mu_ids
  budget:
    max_mu: 50
    max_tokens: 900
";
}
