pub mod db;
pub mod indexer;
pub mod search;
pub mod views;

pub use db::{connect, init_db, reset_db};
pub use indexer::{IndexSummary, index_mu_dir};
pub use search::{SearchHit, SearchQuery, search_mu};
pub use views::{ViewRecord, get_view, invalidate_by_mu_ids, put_view};
