//! Cache trait definition

use anyhow::Result;

use crate::models::Email;

/// Persistent store of ingested records
///
/// Implementations must make `checkpoint` atomic: a reader either sees the
/// previous snapshot or the new one, never a mix.
pub trait RecordCache: Send + Sync {
    /// Every cached record
    ///
    /// A missing or unreadable store loads as empty; this never fails.
    fn load(&self) -> Vec<Email>;

    /// Replace the stored snapshot with `emails`
    fn checkpoint(&self, emails: &[Email]) -> Result<()>;

    /// Discard everything stored
    fn clear(&self) -> Result<()>;
}
