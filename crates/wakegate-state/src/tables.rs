//! redb table definitions for the embedded store.

use redb::TableDefinition;

/// Lifecycle records keyed by `{prefix}:{namespace}:{name}`; values are
/// the stored state strings (`sleeping`, `waking_up`, `awake`).
pub const LIFECYCLE: TableDefinition<&str, &str> = TableDefinition::new("lifecycle");
