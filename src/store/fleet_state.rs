//! `fleet_state` table: one row per path, holding the counter, child set,
//! and agent type.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::domain_types::{AgentType, PathSegment};

use super::{Store, StoreResult};

/// The persisted snapshot of an Agent's top-level state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetStateRow {
    /// Monotonic per-operation counter.
    pub counter: i64,
    /// Direct child segments.
    pub children: BTreeSet<PathSegment>,
    /// The kind of node this path represents.
    pub agent_type: AgentType,
}

mod sql {
    pub const SELECT: &str = "SELECT counter, children, agent_type FROM fleet_state WHERE id = 1";
    pub const UPSERT: &str = "INSERT INTO fleet_state (id, counter, children, agent_type, created_at, updated_at) \
         VALUES (1, ?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(id) DO UPDATE SET counter = excluded.counter, children = excluded.children, \
         agent_type = excluded.agent_type, updated_at = excluded.updated_at";
}

mod mapping {
    use super::{BTreeSet, FleetStateRow, PathSegment};

    pub fn children_to_json(children: &BTreeSet<PathSegment>) -> String {
        let names: Vec<String> = children.iter().map(PathSegment::to_string).collect();
        serde_json::to_string(&names).expect("Vec<String> always serializes")
    }

    pub fn children_from_json(raw: &str) -> BTreeSet<PathSegment> {
        let names: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
        names
            .into_iter()
            .filter_map(|n| PathSegment::try_new(n).ok())
            .collect()
    }

    pub fn row_from_parts(counter: i64, children_json: &str, agent_type: &str) -> FleetStateRow {
        FleetStateRow {
            counter,
            children: children_from_json(children_json),
            agent_type: agent_type.parse().unwrap_or_default(),
        }
    }
}

impl Store {
    /// Load the persisted fleet state, if any row exists yet.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn load_fleet_state(&self) -> StoreResult<Option<FleetStateRow>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(sql::SELECT)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(counter, children, agent_type)| {
            mapping::row_from_parts(counter, &children, &agent_type)
        }))
    }

    /// Persist the fleet state, replacing any existing row.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn save_fleet_state(&self, state: &FleetStateRow) -> StoreResult<()> {
        let children_json = mapping::children_to_json(&state.children);
        let now: DateTime<Utc> = Utc::now();
        sqlx::query(sql::UPSERT)
            .bind(state.counter)
            .bind(children_json)
            .bind(state.agent_type.to_string())
            .bind(now.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn round_trips_fleet_state() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.load_fleet_state().await.unwrap().is_none());

        let mut children = BTreeSet::new();
        children.insert(PathSegment::try_new("wh-ny").unwrap());
        let state = FleetStateRow {
            counter: 3,
            children,
            agent_type: AgentType::Warehouse,
        };
        store.save_fleet_state(&state).await.unwrap();

        let loaded = store.load_fleet_state().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn save_is_idempotent_on_repeat() {
        let store = Store::open_in_memory().await.unwrap();
        let state = FleetStateRow {
            counter: 1,
            children: BTreeSet::new(),
            agent_type: AgentType::Orchestrator,
        };
        store.save_fleet_state(&state).await.unwrap();
        store.save_fleet_state(&state).await.unwrap();
        let loaded = store.load_fleet_state().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }
}
