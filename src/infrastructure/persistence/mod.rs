//! Subagent registry persistence (§6 "Persisted state").
//!
//! A single JSON file holding the whole run map, rewritten wholesale on
//! every mutation, matching the teacher's preference for plain file-backed
//! state where no relational querying is needed.

pub mod subagent_store;

pub use subagent_store::{PersistenceError, SubagentStore};
