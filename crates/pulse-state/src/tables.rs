//! redb table definitions for the Pulse state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Deployments keyed by `{service}:{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Incidents keyed by id (`INC-<n>`).
pub const INCIDENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("incidents");

/// Published snapshots; only [`LATEST_SNAPSHOT`] is written.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

pub const LATEST_SNAPSHOT: &str = "latest";
