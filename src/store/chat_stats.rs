//! `chat_statistics` table: per-(location, UTC date) chat counters.

use chrono::{NaiveDate, Utc};

use super::{Store, StoreResult};

/// A day's chat statistics for one location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatStatsRow {
    /// Messages received today (user + assistant turns).
    pub messages_today: u32,
    /// Actions the assistant attempted to execute today.
    pub actions_executed: u32,
    /// Of those, how many succeeded.
    pub successful_actions: u32,
}

impl ChatStatsRow {
    /// `successful_actions / actions_executed * 100`, or `0` when no actions
    /// have been attempted yet.
    #[must_use]
    pub fn success_rate(self) -> f64 {
        if self.actions_executed == 0 {
            0.0
        } else {
            f64::from(self.successful_actions) / f64::from(self.actions_executed) * 100.0
        }
    }
}

mod sql {
    pub const SELECT: &str = "SELECT messages_today, actions_executed, successful_actions \
         FROM chat_statistics WHERE location = ?1 AND date = ?2";
    pub const UPSERT: &str = "INSERT INTO chat_statistics \
         (location, date, messages_today, actions_executed, successful_actions, success_rate, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
         ON CONFLICT(location, date) DO UPDATE SET messages_today = excluded.messages_today, \
         actions_executed = excluded.actions_executed, successful_actions = excluded.successful_actions, \
         success_rate = excluded.success_rate, updated_at = excluded.updated_at";
}

impl Store {
    /// Load today's (UTC) chat stats for `location`, if any row exists yet.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn load_chat_stats(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<ChatStatsRow>> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(sql::SELECT)
            .bind(location)
            .bind(date.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(messages_today, actions_executed, successful_actions)| ChatStatsRow {
            messages_today: u32::try_from(messages_today).unwrap_or(0),
            actions_executed: u32::try_from(actions_executed).unwrap_or(0),
            successful_actions: u32::try_from(successful_actions).unwrap_or(0),
        }))
    }

    /// Persist `stats` for `location` on `date`, replacing any existing row.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn save_chat_stats(
        &self,
        location: &str,
        date: NaiveDate,
        stats: ChatStatsRow,
    ) -> StoreResult<()> {
        sqlx::query(sql::UPSERT)
            .bind(location)
            .bind(date.to_string())
            .bind(i64::from(stats.messages_today))
            .bind(i64::from(stats.actions_executed))
            .bind(i64::from(stats.successful_actions))
            .bind(stats.success_rate())
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn success_rate_zero_when_no_actions() {
        let stats = ChatStatsRow {
            messages_today: 5,
            actions_executed: 0,
            successful_actions: 0,
        };
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn success_rate_is_percentage() {
        let stats = ChatStatsRow {
            messages_today: 1,
            actions_executed: 4,
            successful_actions: 3,
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn round_trips_chat_stats() {
        let store = Store::open_in_memory().await.unwrap();
        let today = Utc::now().date_naive();
        assert!(store.load_chat_stats("demo:/", today).await.unwrap().is_none());

        let stats = ChatStatsRow {
            messages_today: 1,
            actions_executed: 1,
            successful_actions: 1,
        };
        store.save_chat_stats("demo:/", today, stats).await.unwrap();
        let loaded = store.load_chat_stats("demo:/", today).await.unwrap().unwrap();
        assert_eq!(loaded, stats);
    }
}
