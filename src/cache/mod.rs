//! Versioned response cache backing the offline layer.
//!
//! Responses are grouped into cache generations, one per deployed version
//! label. Entries are keyed by request identity (method + absolute URL) and
//! never expire on their own; strategies refresh them opportunistically and
//! the lifecycle manager drops whole generations on version cutover.

mod storage;
mod traits;

pub use storage::{EntryStore, GenerationStore, SqliteStorage};
pub use traits::{RequestKey, ResponseSource, Served};
