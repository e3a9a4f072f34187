pub mod canonical;
pub mod events;

pub use canonical::{CanonicalDiagnostics, canonicalize_mu_ids};
pub use events::{
    AssignResult, MembershipDiagnostics, MembershipEvent, MembershipEventKind,
    append_membership_events, iter_mu_ids_from_dir, load_effective_membership,
};
