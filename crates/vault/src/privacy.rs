use serde_yaml::Value;

use crate::mu::MuDocument;

/// Effective share-policy booleans for an export target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharePolicy {
    pub allow_pointer: bool,
    pub allow_snapshot: bool,
}

/// Restrictiveness rank: `public < org < private`.  Unknown levels rank as
/// private.
pub fn rank_privacy(level: Option<&str>) -> u8 {
    match level {
        Some("public") => 0,
        Some("org") => 1,
        _ => 2,
    }
}

/// Fill privacy defaults in place: `level=private`, `redact=none`, empty
/// `pii`, empty `share_policy`.  Defaulting only; redaction transforms
/// belong to the export boundary.
pub fn ensure_privacy_defaults(mu: &mut MuDocument) {
    let root = mu.value_mut().as_mapping_mut().expect("MU root is a mapping");
    let privacy_key = Value::String("privacy".into());
    if !root
        .get(&privacy_key)
        .map(Value::is_mapping)
        .unwrap_or(false)
    {
        root.insert(privacy_key.clone(), Value::Mapping(Default::default()));
    }
    let privacy = root
        .get_mut(&privacy_key)
        .and_then(Value::as_mapping_mut)
        .expect("privacy is a mapping");

    let set_default = |privacy: &mut serde_yaml::Mapping, key: &str, value: Value, valid: fn(&Value) -> bool| {
        let key = Value::String(key.into());
        let ok = privacy.get(&key).map(valid).unwrap_or(false);
        if !ok {
            privacy.insert(key, value);
        }
    };

    set_default(privacy, "level", Value::String("private".into()), |v| {
        v.as_str().map(|s| !s.is_empty()).unwrap_or(false)
    });
    set_default(privacy, "redact", Value::String("none".into()), |v| {
        v.as_str().map(|s| !s.is_empty()).unwrap_or(false)
    });
    set_default(privacy, "pii", Value::Sequence(Vec::new()), Value::is_sequence);
    set_default(
        privacy,
        "share_policy",
        Value::Mapping(Default::default()),
        Value::is_mapping,
    );
}

/// Compute the effective share policy for a target level.
///
/// Deny by default: pointers and snapshots cross the boundary only when
/// `privacy.share_policy` explicitly allows them.
pub fn export_share_policy(mu: &MuDocument, _target_level: &str) -> SharePolicy {
    let policy = mu
        .value()
        .get("privacy")
        .and_then(|p| p.get("share_policy"));
    let flag = |key: &str| {
        policy
            .and_then(|sp| sp.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    SharePolicy {
        allow_pointer: flag("allow_pointer"),
        allow_snapshot: flag("allow_snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ensure_privacy_defaults, export_share_policy, rank_privacy};
    use crate::mu::MuDocument;

    #[test]
    fn rank_order_is_public_org_private() {
        assert!(rank_privacy(Some("public")) < rank_privacy(Some("org")));
        assert!(rank_privacy(Some("org")) < rank_privacy(Some("private")));
        assert_eq!(rank_privacy(None), rank_privacy(Some("private")));
        assert_eq!(rank_privacy(Some("weird")), 2);
    }

    #[test]
    fn defaults_fill_missing_privacy_block() {
        let mut mu = MuDocument::from_str("mu_id: m\nsummary: s\n").unwrap();
        ensure_privacy_defaults(&mut mu);
        assert_eq!(mu.privacy_level(), Some("private"));
        let redact = mu
            .value()
            .get("privacy")
            .and_then(|p| p.get("redact"))
            .and_then(serde_yaml::Value::as_str);
        assert_eq!(redact, Some("none"));
    }

    #[test]
    fn defaults_keep_explicit_values() {
        let mut mu = MuDocument::from_str("mu_id: m\nprivacy:\n  level: org\n").unwrap();
        ensure_privacy_defaults(&mut mu);
        assert_eq!(mu.privacy_level(), Some("org"));
    }

    #[test]
    fn share_policy_denies_unless_explicit() {
        let mu = MuDocument::from_str("mu_id: m\n").unwrap();
        let policy = export_share_policy(&mu, "org");
        assert!(!policy.allow_pointer && !policy.allow_snapshot);

        let mu = MuDocument::from_str(
            "mu_id: m\nprivacy:\n  share_policy:\n    allow_pointer: true\n",
        )
        .unwrap();
        assert!(export_share_policy(&mu, "public").allow_pointer);
        assert!(!export_share_policy(&mu, "public").allow_snapshot);
    }
}
