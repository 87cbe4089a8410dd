//! Reports derived from ingested records

mod senders;

pub use senders::{aggregate, top_senders};
