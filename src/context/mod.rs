// src/context/mod.rs
// Context assembly for the two generative endpoints: parallel fetch of room
// summary, user profile, AI-chat history and recent room messages, plus the
// deterministic prompt builder.

pub mod prompt;

use serde::Serialize;
use std::sync::Arc;

use crate::chat::history::ChatHistoryStore;
use crate::error::{AppError, AppResult};
use crate::summary::SummaryService;
use crate::vector::{AiChatRecord, DualMessageStore, MessageRecord};

/// Exact user-visible error when the reply target is missing.
pub const TARGET_NOT_FOUND_MESSAGE: &str = "انتظر وحاول بعد لحظات";

/// Exact user-visible error when a user replies to their own message.
pub const SELF_REPLY_MESSAGE: &str = "لا يمكنك الرد على رسالتك الخاصة";

/// How many prior AI-chat turns feed a chat prompt.
const HISTORY_LIMIT: usize = 5;

/// How many recent room messages feed every prompt.
const RECENT_LIMIT: usize = 15;

/// Everything the prompt builder needs for one turn.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub room_summary: Option<String>,
    pub user_profile: Option<String>,
    /// Oldest first, ready for chronological rendering.
    pub ai_history: Vec<AiChatRecord>,
    /// Newest first.
    pub recent_messages: Vec<MessageRecord>,
    /// Present only for reply turns.
    pub target: Option<MessageRecord>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.room_summary.is_none()
            && self.user_profile.is_none()
            && self.ai_history.is_empty()
            && self.recent_messages.is_empty()
    }

    /// Weighted 0-100 score over which context sources were present.
    pub fn quality(&self) -> u8 {
        let mut score = 0u8;
        if self.room_summary.is_some() {
            score += 30;
        }
        if self.user_profile.is_some() {
            score += 20;
        }
        if !self.ai_history.is_empty() {
            score += 20;
        }
        if !self.recent_messages.is_empty() {
            score += 30;
        }
        score
    }
}

/// Summary of what was available, echoed back to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub has_room_summary: bool,
    pub has_user_profile: bool,
    pub ai_history_count: usize,
    pub latest_messages_count: usize,
    pub quality: u8,
}

impl From<&ContextBundle> for ContextReport {
    fn from(bundle: &ContextBundle) -> Self {
        Self {
            has_room_summary: bundle.room_summary.is_some(),
            has_user_profile: bundle.user_profile.is_some(),
            ai_history_count: bundle.ai_history.len(),
            latest_messages_count: bundle.recent_messages.len(),
            quality: bundle.quality(),
        }
    }
}

pub struct ContextAssembler {
    summaries: Arc<SummaryService>,
    history: Arc<ChatHistoryStore>,
    messages: Arc<DualMessageStore>,
}

impl ContextAssembler {
    pub fn new(
        summaries: Arc<SummaryService>,
        history: Arc<ChatHistoryStore>,
        messages: Arc<DualMessageStore>,
    ) -> Self {
        Self {
            summaries,
            history,
            messages,
        }
    }

    /// Context for a chat turn. All four subfetches run in parallel.
    pub async fn assemble_chat(&self, room_id: &str, user_id: &str) -> AppResult<ContextBundle> {
        let (room, user, history, recent) = tokio::join!(
            self.summaries.get_room(room_id),
            self.summaries.get_user(user_id),
            self.history.latest(user_id, room_id, HISTORY_LIMIT),
            self.messages.latest_messages(room_id, RECENT_LIMIT),
        );

        let mut ai_history = history.map_err(|e| AppError::Store(e.to_string()))?;
        // Fetched newest-first; prompts render chronologically.
        ai_history.reverse();

        Ok(ContextBundle {
            room_summary: room
                .map_err(|e| AppError::Store(e.to_string()))?
                .map(|r| r.summary)
                .filter(|s| !s.is_empty()),
            user_profile: user
                .map_err(|e| AppError::Store(e.to_string()))?
                .map(|u| u.personalization_summary)
                .filter(|s| !s.is_empty()),
            ai_history,
            recent_messages: recent.map_err(|e| AppError::Store(e.to_string()))?,
            target: None,
        })
    }

    /// Context for a reply turn. Fails before any LLM work when the target
    /// is missing or belongs to the replying user.
    pub async fn assemble_reply(
        &self,
        room_id: &str,
        sender_id: &str,
        external_message_id: &str,
    ) -> AppResult<ContextBundle> {
        let (room, user, recent, target) = tokio::join!(
            self.summaries.get_room(room_id),
            self.summaries.get_user(sender_id),
            self.messages.latest_messages(room_id, RECENT_LIMIT),
            self.messages.find_by_external_id(room_id, external_message_id),
        );

        let target = target
            .map_err(|e| AppError::Store(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(TARGET_NOT_FOUND_MESSAGE.to_string()))?;

        if target.sender_id.as_deref() == Some(sender_id) {
            return Err(AppError::Forbidden(SELF_REPLY_MESSAGE.to_string()));
        }

        Ok(ContextBundle {
            room_summary: room
                .map_err(|e| AppError::Store(e.to_string()))?
                .map(|r| r.summary)
                .filter(|s| !s.is_empty()),
            user_profile: user
                .map_err(|e| AppError::Store(e.to_string()))?
                .map(|u| u.personalization_summary)
                .filter(|s| !s.is_empty()),
            ai_history: Vec::new(),
            recent_messages: recent.map_err(|e| AppError::Store(e.to_string()))?,
            target: Some(target),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn empty_bundle() -> ContextBundle {
        ContextBundle {
            room_summary: None,
            user_profile: None,
            ai_history: Vec::new(),
            recent_messages: Vec::new(),
            target: None,
        }
    }

    fn message(text: &str) -> MessageRecord {
        MessageRecord {
            id: "m".into(),
            external_message_id: "e".into(),
            room_id: "r".into(),
            sender_id: Some("u".into()),
            sender_name: None,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn quality_weights_sum_to_hundred() {
        let mut bundle = empty_bundle();
        assert_eq!(bundle.quality(), 0);
        assert!(bundle.is_empty());

        bundle.room_summary = Some("s".into());
        assert_eq!(bundle.quality(), 30);

        bundle.user_profile = Some("p".into());
        assert_eq!(bundle.quality(), 50);

        bundle.ai_history.push(AiChatRecord {
            id: "c".into(),
            user_id: "u".into(),
            room_id: "r".into(),
            question: "q".into(),
            answer: "a".into(),
            suggested_answer: None,
            provider_name: "groq".into(),
            model_name: "m".into(),
            created_at: Utc::now(),
        });
        assert_eq!(bundle.quality(), 70);

        bundle.recent_messages.push(message("hi"));
        assert_eq!(bundle.quality(), 100);
        assert!(!bundle.is_empty());
    }

    #[test]
    fn report_mirrors_bundle() {
        let mut bundle = empty_bundle();
        bundle.recent_messages.push(message("one"));
        bundle.recent_messages.push(message("two"));

        let report = ContextReport::from(&bundle);
        assert!(!report.has_room_summary);
        assert_eq!(report.latest_messages_count, 2);
        assert_eq!(report.quality, 30);
    }
}
