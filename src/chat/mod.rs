// src/chat/mod.rs
// The two generative endpoints: a grounded conversational answer and a
// reply drafted on behalf of a user.

pub mod history;
pub mod parser;

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::context::prompt::{
    build_chat_prompt, build_reply_prompt, CHAT_SYSTEM_PROMPT, REPLY_SYSTEM_PROMPT,
};
use crate::context::{ContextAssembler, ContextReport};
use crate::error::{AppError, AppResult};
use crate::queue::{EnqueueOptions, JobOutcome, JobPayload, JobQueue, Priority};
use crate::vector::{AiChatRecord, MessageRecord};
use history::ChatHistoryStore;
use parser::parse_llm_reply;

const CHAT_MAX_TOKENS: u32 = 1_500;
const CHAT_TEMPERATURE: f32 = 0.5;
const REPLY_MAX_TOKENS: u32 = 1_000;
const REPLY_TEMPERATURE: f32 = 0.6;

/// Outcome of a chat turn.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub answer: String,
    pub suggested_answer: Option<String>,
    pub provider: String,
    pub model: String,
    pub context: ContextReport,
    pub processing_ms: u64,
}

/// Outcome of a reply turn; carries the target it replied to.
#[derive(Debug, Clone)]
pub struct ReplyAnswer {
    pub answer: String,
    pub suggested_answer: Option<String>,
    pub provider: String,
    pub model: String,
    pub target: MessageRecord,
    pub context: ContextReport,
    pub processing_ms: u64,
}

pub struct ChatService {
    assembler: Arc<ContextAssembler>,
    queue: Arc<JobQueue>,
    history: Arc<ChatHistoryStore>,
}

impl ChatService {
    pub fn new(
        assembler: Arc<ContextAssembler>,
        queue: Arc<JobQueue>,
        history: Arc<ChatHistoryStore>,
    ) -> Self {
        Self {
            assembler,
            queue,
            history,
        }
    }

    /// Answer a user's question grounded in room and user context. Exactly
    /// one AIChatRecord is persisted per successful call, asynchronously.
    pub async fn chat(&self, room_id: &str, user_id: &str, question: &str) -> AppResult<ChatAnswer> {
        let started = Instant::now();

        let bundle = self.assembler.assemble_chat(room_id, user_id).await?;
        let report = ContextReport::from(&bundle);
        let prompt = build_chat_prompt(&bundle, question, Utc::now());

        let completion = self
            .generate(prompt, CHAT_SYSTEM_PROMPT, CHAT_MAX_TOKENS, CHAT_TEMPERATURE)
            .await?;
        let parsed = parse_llm_reply(&completion.answer);

        self.persist_turn(AiChatRecord {
            id: String::new(),
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            question: question.to_string(),
            answer: parsed.answer.clone(),
            suggested_answer: parsed.suggested_answer.clone(),
            provider_name: completion.provider.clone(),
            model_name: completion.model.clone(),
            created_at: Utc::now(),
        });

        Ok(ChatAnswer {
            answer: parsed.answer,
            suggested_answer: parsed.suggested_answer,
            provider: completion.provider,
            model: completion.model,
            context: report,
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Draft a reply to a prior message on behalf of `sender_id`. The turn
    /// is intentionally not persisted.
    pub async fn reply(
        &self,
        room_id: &str,
        sender_id: &str,
        external_message_id: &str,
    ) -> AppResult<ReplyAnswer> {
        let started = Instant::now();

        let bundle = self
            .assembler
            .assemble_reply(room_id, sender_id, external_message_id)
            .await?;
        let report = ContextReport::from(&bundle);
        let target = bundle
            .target
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("reply bundle lost its target")))?;
        let prompt = build_reply_prompt(&bundle, &target, Utc::now());

        let completion = self
            .generate(prompt, REPLY_SYSTEM_PROMPT, REPLY_MAX_TOKENS, REPLY_TEMPERATURE)
            .await?;
        let parsed = parse_llm_reply(&completion.answer);

        Ok(ReplyAnswer {
            answer: parsed.answer,
            suggested_answer: parsed.suggested_answer,
            provider: completion.provider,
            model: completion.model,
            target,
            context: report,
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn generate(
        &self,
        prompt: String,
        system_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> AppResult<crate::providers::Completion> {
        let handle = self
            .queue
            .enqueue(
                JobPayload::Llm {
                    prompt,
                    system_prompt: Some(system_prompt.to_string()),
                    max_tokens,
                    temperature,
                },
                EnqueueOptions::with_priority(Priority::High),
            )
            .await?;

        match handle.await_result().await? {
            JobOutcome::Completion(completion) => Ok(completion),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "llm job returned unexpected outcome: {other:?}"
            ))),
        }
    }

    /// Fire-and-forget history write; a miss is logged, never surfaced.
    fn persist_turn(&self, record: AiChatRecord) {
        let history = self.history.clone();
        tokio::spawn(async move {
            if let Err(e) = history.insert(record).await {
                warn!("failed to persist chat turn: {:#}", e);
            }
        });
    }
}
