// src/vector/dual.rs
// Dual-store policy for messages: authoritative first, then shadow, in
// sequence. Reads are the union of both stores with a source tag. There is
// no reconciliation between the two; a shadow failure surfaces to the caller
// but the authoritative write stays.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::qdrant::eq_filter;
use super::{collections, AuthoritativeStore, MessageRecord, ShadowStore};

/// Which backend produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSource {
    Authoritative,
    Shadow,
}

/// A search hit tagged with its backend.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedHit {
    pub source: StoreSource,
    pub score: f32,
    #[serde(flatten)]
    pub message: MessageRecord,
}

pub struct DualMessageStore {
    authoritative: Arc<AuthoritativeStore>,
    shadow: Arc<ShadowStore>,
}

impl DualMessageStore {
    pub fn new(authoritative: Arc<AuthoritativeStore>, shadow: Arc<ShadowStore>) -> Self {
        Self {
            authoritative,
            shadow,
        }
    }

    /// Write a message to both stores. The order is fixed: authoritative,
    /// then shadow; the first write is not rolled back if the second fails.
    pub async fn store_message(&self, record: &MessageRecord, vector: &[f32]) -> Result<()> {
        self.authoritative
            .upsert(
                collections::MESSAGES,
                &record.id,
                vector.to_vec(),
                record.to_payload(),
            )
            .await?;
        self.shadow.upsert(record, vector).await?;
        debug!("message {} stored in both stores", record.id);
        Ok(())
    }

    /// Union search across both stores, each hit tagged with its source.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
        room_id: Option<&str>,
    ) -> Result<(Vec<TaggedHit>, Vec<TaggedHit>)> {
        let filter = room_id.map(|room| eq_filter(&[("roomId", room)]));

        let (authoritative, shadow) = tokio::join!(
            self.authoritative
                .search(collections::MESSAGES, vector.to_vec(), limit as u64, filter),
            self.shadow.search(vector, limit, room_id),
        );

        let authoritative_hits = authoritative?
            .into_iter()
            .filter(|hit| hit.score >= min_score)
            .filter_map(|hit| {
                let message = MessageRecord::from_payload(&hit.id, &hit.payload)?;
                Some(TaggedHit {
                    source: StoreSource::Authoritative,
                    score: hit.score,
                    message,
                })
            })
            .collect();

        let shadow_hits = shadow?
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .map(|(message, score)| TaggedHit {
                source: StoreSource::Shadow,
                score,
                message,
            })
            .collect();

        Ok((authoritative_hits, shadow_hits))
    }

    /// Latest `limit` messages of a room, newest first. The authoritative
    /// store is enumerated by payload filter and sorted in memory.
    pub async fn latest_messages(&self, room_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let filter = eq_filter(&[("roomId", room_id)]);
        let points = self
            .authoritative
            .scroll(collections::MESSAGES, Some(filter), 256)
            .await?;

        let mut messages: Vec<MessageRecord> = points
            .iter()
            .filter_map(|p| MessageRecord::from_payload(&p.id, &p.payload))
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }

    /// Find one message by its client-supplied ID within a room.
    pub async fn find_by_external_id(
        &self,
        room_id: &str,
        external_message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let filter = eq_filter(&[
            ("externalMessageId", external_message_id),
            ("roomId", room_id),
        ]);
        let points = self
            .authoritative
            .scroll(collections::MESSAGES, Some(filter), 1)
            .await?;
        Ok(points
            .first()
            .and_then(|p| MessageRecord::from_payload(&p.id, &p.payload)))
    }

    /// Delete one message from both stores by its store ID.
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        self.authoritative
            .delete_points(collections::MESSAGES, &[id.to_string()])
            .await?;
        self.shadow.delete_ids(&[id.to_string()]).await?;
        Ok(())
    }

    /// Delete every message of a room from both stores.
    pub async fn delete_room_messages(&self, room_id: &str) -> Result<()> {
        self.authoritative
            .delete_by_filter(collections::MESSAGES, eq_filter(&[("roomId", room_id)]))
            .await?;
        self.shadow.delete_room(room_id).await?;
        Ok(())
    }

    /// (authoritative, shadow) message counts, optionally room-scoped.
    pub async fn counts(&self, room_id: Option<&str>) -> Result<(u64, u64)> {
        let filter = room_id.map(|room| eq_filter(&[("roomId", room)]));
        let (authoritative, shadow) = tokio::join!(
            self.authoritative.count(collections::MESSAGES, filter),
            self.shadow.count(room_id),
        );
        Ok((authoritative?, shadow?))
    }
}
