//! Domain models for ingestion and reporting

mod checkpoint;
pub(crate) mod email;
mod stats;
mod window;

pub use checkpoint::CacheCheckpoint;
pub use email::{Email, RecordId, iso_naive};
pub use stats::{DAYS_PER_MONTH, SenderStats};
pub use window::FetchWindow;
