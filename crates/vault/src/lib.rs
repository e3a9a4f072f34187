pub mod error;
pub mod hash;
pub mod ingest;
pub mod ingest_mu;
pub mod manifest;
pub mod mu;
pub mod privacy;
pub mod uri;
pub mod verify;

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};

pub use error::VaultError;
pub use hash::{is_sha256_form, sha256_bytes, sha256_file};
pub use ingest::{BatchIngest, RawIngest, ingest_raw_file, ingest_raw_tree};
pub use ingest_mu::{MuIngest, ingest_mu_file, ingest_mu_tree};
pub use manifest::{MuManifestLine, RawManifestLine, append_jsonl, read_jsonl};
pub use mu::{Locator, MuDocument, MuLinks, Pointer};
pub use privacy::{SharePolicy, ensure_privacy_defaults, export_share_policy, rank_privacy};
pub use uri::{VaultKind, VaultUri};
pub use verify::{
    RepairSuggestion, VerifyIssue, VerifyIssueKind, repair_suggest_by_sha256,
    repair_suggestions_for_missing, resolve_vault_uri_to_path, verify_manifest,
    verify_manifest_records,
};

/// Logical vault id -> physical root directory.
pub type VaultRoots = BTreeMap<String, String>;

/// Second-precision UTC timestamp with `Z` suffix, the manifest wire format.
pub fn utc_now_iso_z() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
