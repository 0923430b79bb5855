//! `stored_messages` table: direct, broadcast, and system message history.

use chrono::{DateTime, Utc};

use crate::domain_types::{MessageId, MessageKind};

use super::{Store, StoreResult};

/// A persisted message row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessageRow {
    /// Unique message id.
    pub id: MessageId,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
    /// Sender identifier (an `OwnerKey` canonical string or a display label).
    pub from_agent: String,
    /// Recipient, `None` for a broadcast.
    pub to_agent: Option<String>,
    /// Message body.
    pub content: String,
    /// Direct, broadcast, or system.
    pub message_type: MessageKind,
    /// The path this message is stored against.
    pub location: String,
}

mod sql {
    pub const INSERT: &str = "INSERT INTO stored_messages \
         (id, timestamp, from_agent, to_agent, content, message_type, location) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
    pub const SELECT_PAGE: &str = "SELECT id, timestamp, from_agent, to_agent, content, message_type, location \
         FROM stored_messages WHERE location = ?1 ORDER BY timestamp ASC LIMIT ?2 OFFSET ?3";
    pub const COUNT: &str = "SELECT COUNT(*) FROM stored_messages WHERE location = ?1";
    pub const PURGE_OLDER_THAN: &str = "DELETE FROM stored_messages WHERE timestamp < ?1";
}

type MessageRowTuple = (String, String, String, Option<String>, String, String, String);

impl Store {
    /// Append one message.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn insert_message(&self, message: &StoredMessageRow) -> StoreResult<()> {
        sqlx::query(sql::INSERT)
            .bind(message.id.to_string())
            .bind(message.timestamp.to_rfc3339())
            .bind(&message.from_agent)
            .bind(&message.to_agent)
            .bind(&message.content)
            .bind(message.message_type.to_string())
            .bind(&message.location)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Return a chronological page of messages for `location`, plus the
    /// total row count (used to compute `hasMore`).
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn list_messages(
        &self,
        location: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<StoredMessageRow>, i64)> {
        let rows: Vec<MessageRowTuple> = sqlx::query_as(sql::SELECT_PAGE)
            .bind(location)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;
        let (total,): (i64,) = sqlx::query_as(sql::COUNT)
            .bind(location)
            .fetch_one(self.pool())
            .await?;
        Ok((rows.into_iter().map(row_to_message).collect(), total))
    }

    /// Delete every message older than `cutoff`, across all locations in
    /// this store. Cheap: a single `DELETE` statement, run opportunistically
    /// on roughly 1% of Agent requests.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::store::StoreError`] on query failure.
    pub async fn purge_messages_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(sql::PURGE_OLDER_THAN)
            .bind(cutoff.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_message(row: MessageRowTuple) -> StoredMessageRow {
    let (id, timestamp, from_agent, to_agent, content, message_type, location) = row;
    StoredMessageRow {
        id: id
            .parse::<uuid::Uuid>()
            .map(MessageId::new)
            .unwrap_or_else(|_| MessageId::generate()),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        from_agent,
        to_agent,
        content,
        message_type: message_type.parse().unwrap_or(MessageKind::System),
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::time::Duration;

    fn sample(location: &str, content: &str) -> StoredMessageRow {
        StoredMessageRow {
            id: MessageId::generate(),
            timestamp: Utc::now(),
            from_agent: "demo:/".to_string(),
            to_agent: None,
            content: content.to_string(),
            message_type: MessageKind::Broadcast,
            location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn pages_messages_chronologically() {
        let store = Store::open_in_memory().await.unwrap();
        for i in 0..5 {
            store
                .insert_message(&sample("demo:/org", &format!("msg-{i}")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let (page, total) = store.list_messages("demo:/org", 2, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "msg-0");
        assert_eq!(page[1].content, "msg-1");
    }

    #[tokio::test]
    async fn purge_removes_only_older_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let old = StoredMessageRow {
            timestamp: Utc::now() - chrono::Duration::days(40),
            ..sample("demo:/org", "old")
        };
        let recent = sample("demo:/org", "recent");
        store.insert_message(&old).await.unwrap();
        store.insert_message(&recent).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let removed = store.purge_messages_older_than(cutoff).await.unwrap();
        assert_eq!(removed, 1);

        let (page, total) = store.list_messages("demo:/org", 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].content, "recent");
    }
}
