use std::fmt;
use std::str::FromStr;

use crate::error::VaultError;

const SCHEME: &str = "vault://";

/// Closed set of top-level content kinds inside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultKind {
    Raw,
    Mu,
    Assets,
    Manifests,
    Logs,
    Derived,
}

impl VaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VaultKind::Raw => "raw",
            VaultKind::Mu => "mu",
            VaultKind::Assets => "assets",
            VaultKind::Manifests => "manifests",
            VaultKind::Logs => "logs",
            VaultKind::Derived => "derived",
        }
    }
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaultKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(VaultKind::Raw),
            "mu" => Ok(VaultKind::Mu),
            "assets" => Ok(VaultKind::Assets),
            "manifests" => Ok(VaultKind::Manifests),
            "logs" => Ok(VaultKind::Logs),
            "derived" => Ok(VaultKind::Derived),
            _ => Err(()),
        }
    }
}

/// Stable logical identifier `vault://<vault_id>/<kind>/<path>`, independent
/// of local filesystem paths.  Mapping URIs to physical roots belongs to
/// higher-level configuration (`vault_roots`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultUri {
    pub vault_id: String,
    pub kind: VaultKind,
    pub path: String,
}

impl VaultUri {
    pub fn new(vault_id: impl Into<String>, kind: VaultKind, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            vault_id: vault_id.into(),
            kind,
            path: path.trim_start_matches('/').to_string(),
        }
    }

    /// Parse a `vault://` URI; rejects other schemes, unknown kinds, and
    /// URIs without a vault_id/kind/path triple.
    pub fn parse(uri: &str) -> Result<Self, VaultError> {
        let Some(rest) = uri.strip_prefix(SCHEME) else {
            return Err(VaultError::InvalidUri(uri.to_string()));
        };
        let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 {
            return Err(VaultError::InvalidUri(uri.to_string()));
        }
        let kind = parts[1].parse::<VaultKind>().map_err(|_| VaultError::UnknownKind {
            kind: parts[1].to_string(),
            uri: uri.to_string(),
        })?;
        Ok(Self {
            vault_id: parts[0].to_string(),
            kind,
            path: parts[2..].join("/"),
        })
    }

    pub fn is_vault_uri(uri: &str) -> bool {
        uri.starts_with(SCHEME)
    }
}

impl fmt::Display for VaultUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = format!("vault://{}/{}/{}", self.vault_id, self.kind, self.path);
        f.write_str(joined.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::{VaultKind, VaultUri};
    use crate::error::VaultError;

    #[test]
    fn parses_valid_uri() {
        let uri = VaultUri::parse("vault://default/raw/2026/02/21/foo.md").unwrap();
        assert_eq!(uri.vault_id, "default");
        assert_eq!(uri.kind, VaultKind::Raw);
        assert_eq!(uri.path, "2026/02/21/foo.md");
    }

    #[test]
    fn rejects_foreign_scheme_and_unknown_kind() {
        assert!(matches!(
            VaultUri::parse("file:///tmp/foo"),
            Err(VaultError::InvalidUri(_))
        ));
        assert!(matches!(
            VaultUri::parse("vault://default/blob/x"),
            Err(VaultError::UnknownKind { .. })
        ));
        assert!(VaultUri::parse("vault://default/raw").is_err());
    }

    #[test]
    fn round_trips_format_and_parse() {
        let uri = VaultUri::new("default", VaultKind::Mu, "2026/02/mu_001.mimo");
        let formatted = uri.to_string();
        assert_eq!(formatted, "vault://default/mu/2026/02/mu_001.mimo");
        assert_eq!(VaultUri::parse(&formatted).unwrap(), uri);
    }

    #[test]
    fn normalizes_leading_slash_in_path() {
        let uri = VaultUri::new("default", VaultKind::Raw, "/2026/02/a.txt");
        assert_eq!(uri.to_string(), "vault://default/raw/2026/02/a.txt");
    }
}
