// src/vector/mod.rs
// Vector store gateway: domain records, collection layout, and the
// authoritative/shadow backends.

pub mod dual;
pub mod qdrant;
pub mod shadow;

use chrono::{DateTime, Utc};
use qdrant_client::qdrant::Value as QdrantValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use dual::{DualMessageStore, TaggedHit};
pub use qdrant::AuthoritativeStore;
pub use shadow::ShadowStore;

/// Collection names in the authoritative store.
pub mod collections {
    pub const MESSAGES: &str = "messages";
    pub const ROOMS: &str = "rooms";
    pub const USERS: &str = "users";
    pub const AI_CHAT_MESSAGES: &str = "aiChatMessages";
}

/// Payload field kinds needing an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Keyword,
    Datetime,
}

/// Payload indices each collection needs for filter queries.
pub const PAYLOAD_INDICES: &[(&str, &str, IndexKind)] = &[
    (collections::MESSAGES, "externalMessageId", IndexKind::Keyword),
    (collections::MESSAGES, "roomId", IndexKind::Keyword),
    (collections::MESSAGES, "senderId", IndexKind::Keyword),
    (collections::MESSAGES, "createdAt", IndexKind::Datetime),
    (collections::ROOMS, "roomId", IndexKind::Keyword),
    (collections::USERS, "userId", IndexKind::Keyword),
    (collections::AI_CHAT_MESSAGES, "userId", IndexKind::Keyword),
    (collections::AI_CHAT_MESSAGES, "roomId", IndexKind::Keyword),
    (collections::AI_CHAT_MESSAGES, "createdAt", IndexKind::Datetime),
];

/// A stored point as read back from the authoritative store.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: String,
    pub payload: HashMap<String, QdrantValue>,
}

/// A similarity hit with its cosine score.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, QdrantValue>,
}

// === Domain records ===

/// Append-only record of a human utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub external_message_id: String,
    pub room_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn to_payload(&self) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert(
            "externalMessageId".to_string(),
            self.external_message_id.clone().into(),
        );
        payload.insert("roomId".to_string(), self.room_id.clone().into());
        if let Some(sender_id) = &self.sender_id {
            payload.insert("senderId".to_string(), sender_id.clone().into());
        }
        if let Some(sender_name) = &self.sender_name {
            payload.insert("senderName".to_string(), sender_name.clone().into());
        }
        payload.insert("text".to_string(), self.text.clone().into());
        payload.insert("createdAt".to_string(), self.created_at.to_rfc3339().into());
        payload
    }

    pub fn from_payload(id: &str, payload: &HashMap<String, QdrantValue>) -> Option<Self> {
        Some(Self {
            id: id.to_string(),
            external_message_id: payload.get("externalMessageId")?.as_str()?.to_string(),
            room_id: payload.get("roomId")?.as_str()?.to_string(),
            sender_id: payload
                .get("senderId")
                .and_then(|v| v.as_str())
                .map(String::from),
            sender_name: payload
                .get("senderName")
                .and_then(|v| v.as_str())
                .map(String::from),
            text: payload.get("text")?.as_str()?.to_string(),
            created_at: parse_datetime(payload.get("createdAt"))?,
        })
    }
}

/// Mutable per-room state, keyed by its deterministic ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAggregate {
    pub room_id: String,
    pub summary: String,
    pub message_count: u64,
}

impl RoomAggregate {
    pub fn to_payload(&self) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("roomId".to_string(), self.room_id.clone().into());
        payload.insert("summary".to_string(), self.summary.clone().into());
        payload.insert("messageCount".to_string(), (self.message_count as i64).into());
        payload
    }

    pub fn from_payload(payload: &HashMap<String, QdrantValue>) -> Option<Self> {
        Some(Self {
            room_id: payload.get("roomId")?.as_str()?.to_string(),
            summary: payload.get("summary")?.as_str()?.to_string(),
            message_count: payload
                .get("messageCount")
                .and_then(|v| v.as_integer())
                .unwrap_or(0) as u64,
        })
    }
}

/// Mutable per-user state, keyed by its deterministic ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub user_id: String,
    pub personalization_summary: String,
    pub message_count: u64,
}

impl UserAggregate {
    pub fn to_payload(&self) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("userId".to_string(), self.user_id.clone().into());
        payload.insert(
            "personalizationSummary".to_string(),
            self.personalization_summary.clone().into(),
        );
        payload.insert("messageCount".to_string(), (self.message_count as i64).into());
        payload
    }

    pub fn from_payload(payload: &HashMap<String, QdrantValue>) -> Option<Self> {
        Some(Self {
            user_id: payload.get("userId")?.as_str()?.to_string(),
            personalization_summary: payload
                .get("personalizationSummary")?
                .as_str()?
                .to_string(),
            message_count: payload
                .get("messageCount")
                .and_then(|v| v.as_integer())
                .unwrap_or(0) as u64,
        })
    }
}

/// One completed (question, answer) chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiChatRecord {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub question: String,
    pub answer: String,
    pub suggested_answer: Option<String>,
    pub provider_name: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}

impl AiChatRecord {
    pub fn to_payload(&self) -> HashMap<String, QdrantValue> {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("userId".to_string(), self.user_id.clone().into());
        payload.insert("roomId".to_string(), self.room_id.clone().into());
        payload.insert("question".to_string(), self.question.clone().into());
        payload.insert("answer".to_string(), self.answer.clone().into());
        if let Some(suggested) = &self.suggested_answer {
            payload.insert("suggestedAnswer".to_string(), suggested.clone().into());
        }
        payload.insert("providerName".to_string(), self.provider_name.clone().into());
        payload.insert("modelName".to_string(), self.model_name.clone().into());
        payload.insert("createdAt".to_string(), self.created_at.to_rfc3339().into());
        payload
    }

    pub fn from_payload(id: &str, payload: &HashMap<String, QdrantValue>) -> Option<Self> {
        Some(Self {
            id: id.to_string(),
            user_id: payload.get("userId")?.as_str()?.to_string(),
            room_id: payload.get("roomId")?.as_str()?.to_string(),
            question: payload.get("question")?.as_str()?.to_string(),
            answer: payload.get("answer")?.as_str()?.to_string(),
            suggested_answer: payload
                .get("suggestedAnswer")
                .and_then(|v| v.as_str())
                .map(String::from),
            provider_name: payload
                .get("providerName")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_default(),
            model_name: payload
                .get("modelName")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_default(),
            created_at: parse_datetime(payload.get("createdAt"))?,
        })
    }
}

fn parse_datetime(value: Option<&QdrantValue>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> MessageRecord {
        MessageRecord {
            id: "id-1".into(),
            external_message_id: "m1".into(),
            room_id: "r1".into(),
            sender_id: Some("u1".into()),
            sender_name: Some("Sara".into()),
            text: "hello world".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn message_payload_round_trips() {
        let record = sample_message();
        let payload = record.to_payload();
        let back = MessageRecord::from_payload("id-1", &payload).unwrap();
        assert_eq!(back.external_message_id, "m1");
        assert_eq!(back.room_id, "r1");
        assert_eq!(back.sender_id.as_deref(), Some("u1"));
        assert_eq!(back.text, "hello world");
    }

    #[test]
    fn message_without_sender_round_trips() {
        let mut record = sample_message();
        record.sender_id = None;
        record.sender_name = None;
        let payload = record.to_payload();
        assert!(!payload.contains_key("senderId"));
        let back = MessageRecord::from_payload("id-1", &payload).unwrap();
        assert!(back.sender_id.is_none());
    }

    #[test]
    fn aggregate_payloads_round_trip() {
        let room = RoomAggregate {
            room_id: "r9".into(),
            summary: "ملخص الغرفة".into(),
            message_count: 7,
        };
        let back = RoomAggregate::from_payload(&room.to_payload()).unwrap();
        assert_eq!(back.room_id, "r9");
        assert_eq!(back.summary, "ملخص الغرفة");
        assert_eq!(back.message_count, 7);

        let user = UserAggregate {
            user_id: "u9".into(),
            personalization_summary: "يحب الشعر".into(),
            message_count: 3,
        };
        let back = UserAggregate::from_payload(&user.to_payload()).unwrap();
        assert_eq!(back.user_id, "u9");
        assert_eq!(back.message_count, 3);
    }

    #[test]
    fn chat_record_payload_round_trips() {
        let record = AiChatRecord {
            id: "c1".into(),
            user_id: "u1".into(),
            room_id: "r1".into(),
            question: "ما الجو اليوم؟".into(),
            answer: "مشمس".into(),
            suggested_answer: None,
            provider_name: "groq".into(),
            model_name: "llama-3.3-70b-versatile".into(),
            created_at: Utc::now(),
        };
        let payload = record.to_payload();
        assert!(!payload.contains_key("suggestedAnswer"));
        let back = AiChatRecord::from_payload("c1", &payload).unwrap();
        assert_eq!(back.question, "ما الجو اليوم؟");
        assert!(back.suggested_answer.is_none());
    }

    #[test]
    fn every_indexed_field_belongs_to_a_known_collection() {
        for (collection, _, _) in PAYLOAD_INDICES {
            assert!([
                collections::MESSAGES,
                collections::ROOMS,
                collections::USERS,
                collections::AI_CHAT_MESSAGES
            ]
            .contains(collection));
        }
    }
}
