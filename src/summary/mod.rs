// src/summary/mod.rs
// Rolling-summary aggregator: per-room conversation summaries and per-user
// personalisation profiles, consolidated through the LLM dispatcher and
// bounded by a character cap.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::debug;

use crate::embedding::zero_vector;
use crate::identity::{deterministic_id, ROOM_NAMESPACE, USER_NAMESPACE};
use crate::queue::{EnqueueOptions, JobOutcome, JobPayload, JobQueue, Priority};
use crate::vector::{collections, AuthoritativeStore, RoomAggregate, UserAggregate};

/// Hard cap on stored summaries.
pub const MAX_SUMMARY_CHARS: usize = 3_000;

/// New messages longer than this get condensed even with no prior summary.
const CONDENSE_THRESHOLD_CHARS: usize = 200;

const SUMMARY_MAX_TOKENS: u32 = 800;
const SUMMARY_TEMPERATURE: f32 = 0.2;

pub struct SummaryService {
    store: Arc<AuthoritativeStore>,
    queue: Arc<JobQueue>,
}

impl SummaryService {
    pub fn new(store: Arc<AuthoritativeStore>, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Fold one new message into the room's rolling summary.
    pub async fn update_room_summary(
        &self,
        room_id: &str,
        new_text: &str,
        sender_name: Option<&str>,
    ) -> Result<()> {
        let existing = self.get_room(room_id).await?;
        let message_count = existing.as_ref().map(|r| r.message_count).unwrap_or(0);
        let prior_summary = existing.map(|r| r.summary).filter(|s| !s.is_empty());

        let summary = self
            .next_summary(prior_summary.as_deref(), new_text, sender_name, false)
            .await?;

        let aggregate = RoomAggregate {
            room_id: room_id.to_string(),
            summary,
            message_count: message_count + 1,
        };
        let id = deterministic_id(&ROOM_NAMESPACE, room_id).to_string();
        self.store
            .upsert(
                collections::ROOMS,
                &id,
                zero_vector(),
                aggregate.to_payload(),
            )
            .await?;
        debug!("room {} summary updated ({} messages)", room_id, aggregate.message_count);
        Ok(())
    }

    /// Fold one new message into the user's personalisation profile.
    pub async fn update_user_personalization(
        &self,
        user_id: &str,
        new_text: &str,
        sender_name: Option<&str>,
    ) -> Result<()> {
        let existing = self.get_user(user_id).await?;
        let message_count = existing.as_ref().map(|u| u.message_count).unwrap_or(0);
        let prior_summary = existing
            .map(|u| u.personalization_summary)
            .filter(|s| !s.is_empty());

        let summary = self
            .next_summary(prior_summary.as_deref(), new_text, sender_name, true)
            .await?;

        let aggregate = UserAggregate {
            user_id: user_id.to_string(),
            personalization_summary: summary,
            message_count: message_count + 1,
        };
        let id = deterministic_id(&USER_NAMESPACE, user_id).to_string();
        self.store
            .upsert(
                collections::USERS,
                &id,
                zero_vector(),
                aggregate.to_payload(),
            )
            .await?;
        debug!("user {} profile updated ({} messages)", user_id, aggregate.message_count);
        Ok(())
    }

    /// The three-way branch: merge with a prior summary, condense a long
    /// first message, or seed from a short one verbatim.
    async fn next_summary(
        &self,
        prior: Option<&str>,
        new_text: &str,
        sender_name: Option<&str>,
        persona_focused: bool,
    ) -> Result<String> {
        if let Some(prior) = prior {
            let prompt = if persona_focused {
                merge_persona_prompt(prior, new_text, sender_name)
            } else {
                merge_room_prompt(prior, new_text, sender_name)
            };
            let merged = self.consolidate(&prompt).await?;
            return Ok(cap_chars(merged.trim(), MAX_SUMMARY_CHARS));
        }

        if new_text.chars().count() > CONDENSE_THRESHOLD_CHARS {
            let prompt = if persona_focused {
                condense_persona_prompt(new_text, sender_name)
            } else {
                condense_room_prompt(new_text, sender_name)
            };
            let condensed = self.consolidate(&prompt).await?;
            return Ok(cap_chars(condensed.trim(), MAX_SUMMARY_CHARS));
        }

        Ok(cap_chars(&seed_summary(new_text, sender_name), MAX_SUMMARY_CHARS))
    }

    /// Run one consolidation prompt through the dispatcher. Low priority so
    /// ambient summary work never starves interactive chat jobs.
    async fn consolidate(&self, prompt: &str) -> Result<String> {
        let handle = self
            .queue
            .enqueue(
                JobPayload::Llm {
                    prompt: prompt.to_string(),
                    system_prompt: None,
                    max_tokens: SUMMARY_MAX_TOKENS,
                    temperature: SUMMARY_TEMPERATURE,
                },
                EnqueueOptions::with_priority(Priority::Low),
            )
            .await
            .map_err(|e| anyhow!("failed to enqueue summary job: {e}"))?;

        match handle.await_result().await {
            Ok(JobOutcome::Completion(completion)) => Ok(completion.answer),
            Ok(other) => Err(anyhow!("summary job returned unexpected outcome: {other:?}")),
            Err(e) => Err(anyhow!("summary consolidation failed: {e}")),
        }
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<RoomAggregate>> {
        let id = deterministic_id(&ROOM_NAMESPACE, room_id).to_string();
        let points = self.store.retrieve(collections::ROOMS, &[id]).await?;
        Ok(points.first().and_then(|p| RoomAggregate::from_payload(&p.payload)))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserAggregate>> {
        let id = deterministic_id(&USER_NAMESPACE, user_id).to_string();
        let points = self.store.retrieve(collections::USERS, &[id]).await?;
        Ok(points.first().and_then(|p| UserAggregate::from_payload(&p.payload)))
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<()> {
        let id = deterministic_id(&ROOM_NAMESPACE, room_id).to_string();
        self.store.delete_points(collections::ROOMS, &[id]).await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let id = deterministic_id(&USER_NAMESPACE, user_id).to_string();
        self.store.delete_points(collections::USERS, &[id]).await
    }
}

fn seed_summary(new_text: &str, sender_name: Option<&str>) -> String {
    match sender_name {
        Some(name) => format!("{name}: {new_text}"),
        None => new_text.to_string(),
    }
}

fn attributed(new_text: &str, sender_name: Option<&str>) -> String {
    match sender_name {
        Some(name) => format!("{name} wrote: {new_text}"),
        None => new_text.to_string(),
    }
}

fn merge_room_prompt(prior: &str, new_text: &str, sender_name: Option<&str>) -> String {
    format!(
        "You maintain a rolling summary of a group chat room.\n\
         Merge the new message into the existing summary. Keep topics, \
         decisions, questions and the overall tone. Write in the language \
         the conversation uses. Do not invent details. \
         Stay under {MAX_SUMMARY_CHARS} characters.\n\n\
         Existing summary:\n{prior}\n\n\
         New message:\n{}\n\n\
         Updated summary:",
        attributed(new_text, sender_name)
    )
}

fn condense_room_prompt(new_text: &str, sender_name: Option<&str>) -> String {
    format!(
        "Condense this first chat-room message into a short summary that a \
         later reader can build on. Keep the language of the message. \
         Stay under {MAX_SUMMARY_CHARS} characters.\n\n\
         Message:\n{}\n\n\
         Summary:",
        attributed(new_text, sender_name)
    )
}

fn merge_persona_prompt(prior: &str, new_text: &str, sender_name: Option<&str>) -> String {
    format!(
        "You maintain a personalisation profile of one chat user. Merge what \
         the new message reveals about their preferences, interests, writing \
         style and recurring topics into the existing profile. Write in the \
         language the user writes in. Do not invent details. \
         Stay under {MAX_SUMMARY_CHARS} characters.\n\n\
         Existing profile:\n{prior}\n\n\
         New message:\n{}\n\n\
         Updated profile:",
        attributed(new_text, sender_name)
    )
}

fn condense_persona_prompt(new_text: &str, sender_name: Option<&str>) -> String {
    format!(
        "Start a personalisation profile of a chat user from their first \
         message: note preferences, interests and writing style it reveals. \
         Write in the language the user writes in. \
         Stay under {MAX_SUMMARY_CHARS} characters.\n\n\
         Message:\n{}\n\n\
         Profile:",
        attributed(new_text, sender_name)
    )
}

/// Character-boundary-safe cap; summaries are mostly Arabic so byte slicing
/// is off the table.
fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_respects_char_boundaries() {
        let long = "م".repeat(MAX_SUMMARY_CHARS + 500);
        let capped = cap_chars(&long, MAX_SUMMARY_CHARS);
        assert_eq!(capped.chars().count(), MAX_SUMMARY_CHARS);

        let short = "قصير";
        assert_eq!(cap_chars(short, MAX_SUMMARY_CHARS), short);
    }

    #[test]
    fn seed_prefixes_sender_name() {
        assert_eq!(seed_summary("hi", Some("Omar")), "Omar: hi");
        assert_eq!(seed_summary("hi", None), "hi");
    }

    #[test]
    fn merge_prompt_contains_both_texts() {
        let prompt = merge_room_prompt("old summary", "new message", Some("Lina"));
        assert!(prompt.contains("old summary"));
        assert!(prompt.contains("Lina wrote: new message"));
    }

    #[test]
    fn persona_prompt_focuses_on_preferences() {
        let prompt = merge_persona_prompt("profile", "msg", None);
        assert!(prompt.contains("preferences"));
        assert!(prompt.contains("profile"));
    }
}
