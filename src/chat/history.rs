// src/chat/history.rs
// Storage and retrieval of completed (question, answer) chat turns.
// Records carry a zero vector for schema uniformity; retrieval is always by
// payload filter, never by similarity.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::zero_vector;
use crate::identity::random_id;
use crate::vector::qdrant::eq_filter;
use crate::vector::{collections, AiChatRecord, AuthoritativeStore};

/// Query parameters for `query`; at least one of user/room must be set.
#[derive(Debug, Default)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub limit: usize,
}

pub struct ChatHistoryStore {
    store: Arc<AuthoritativeStore>,
}

impl ChatHistoryStore {
    pub fn new(store: Arc<AuthoritativeStore>) -> Self {
        Self { store }
    }

    /// Persist one completed chat turn under a fresh random ID.
    pub async fn insert(&self, mut record: AiChatRecord) -> Result<()> {
        if record.id.is_empty() {
            record.id = random_id().to_string();
        }
        self.store
            .upsert(
                collections::AI_CHAT_MESSAGES,
                &record.id,
                zero_vector(),
                record.to_payload(),
            )
            .await
    }

    /// Latest turns for a (user, room) pair, newest first.
    pub async fn latest(&self, user_id: &str, room_id: &str, limit: usize) -> Result<Vec<AiChatRecord>> {
        self.query(HistoryQuery {
            user_id: Some(user_id.to_string()),
            room_id: Some(room_id.to_string()),
            limit,
        })
        .await
    }

    /// Filtered history, newest first.
    pub async fn query(&self, params: HistoryQuery) -> Result<Vec<AiChatRecord>> {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(user_id) = params.user_id.as_deref() {
            pairs.push(("userId", user_id));
        }
        if let Some(room_id) = params.room_id.as_deref() {
            pairs.push(("roomId", room_id));
        }
        let filter = if pairs.is_empty() {
            None
        } else {
            Some(eq_filter(&pairs))
        };

        let points = self
            .store
            .scroll(collections::AI_CHAT_MESSAGES, filter, 256)
            .await?;

        let mut records: Vec<AiChatRecord> = points
            .iter()
            .filter_map(|p| AiChatRecord::from_payload(&p.id, &p.payload))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if params.limit > 0 {
            records.truncate(params.limit);
        }
        Ok(records)
    }

    /// Delete a room's history, optionally scoped to one user.
    pub async fn delete_for_room(&self, room_id: &str, user_id: Option<&str>) -> Result<()> {
        let mut pairs: Vec<(&str, &str)> = vec![("roomId", room_id)];
        if let Some(user_id) = user_id {
            pairs.push(("userId", user_id));
        }
        self.store
            .delete_by_filter(collections::AI_CHAT_MESSAGES, eq_filter(&pairs))
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.count(collections::AI_CHAT_MESSAGES, None).await
    }
}
