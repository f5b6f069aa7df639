pub mod database;
pub mod error;
pub mod row_helpers;
pub mod samples;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use samples::{SampleStore, SqliteSampleStore};
