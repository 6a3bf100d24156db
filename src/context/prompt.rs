// src/context/prompt.rs
// Deterministic prompt composition. Section order, headings and formatting
// are fixed; behavioural tests match on them.

use chrono::{DateTime, Utc};

use super::ContextBundle;
use crate::vector::MessageRecord;

/// Persona and tone for the chat endpoint.
pub const CHAT_SYSTEM_PROMPT: &str = "أنت «ميجو»، مساعد ذكي وودود داخل غرفة دردشة جماعية. \
أجب بالعربية ما لم يكتب المستخدم بلغة أخرى، وكن موجزاً ودافئاً وطبيعياً. \
اعتمد على سياق الغرفة وملف المستخدم عند توفرهما ولا تختلق معلومات. \
أعد الناتج بصيغة JSON فقط.";

/// Shorter system prompt for the reply endpoint: speak as the user.
pub const REPLY_SYSTEM_PROMPT: &str = "You are drafting a reply on behalf of a chat-room user. \
Respond as that user would, in their voice and language, not as an assistant. \
Keep it short and natural. Output JSON only.";

const NO_CONTEXT_LINE: &str = "No context is available yet for this room.";

const JSON_OUTPUT_CONTRACT: &str = "Respond with a single JSON object and nothing else, exactly in \
this shape:\n{\"answer\": \"...\", \"suggested_answer\": \"...\"}";

/// Prompt for a chat turn.
pub fn build_chat_prompt(bundle: &ContextBundle, question: &str, now: DateTime<Utc>) -> String {
    let mut prompt = String::new();
    push_context_section(&mut prompt, bundle, now);

    prompt.push_str("## Task\n");
    prompt.push_str("Question from the user:\n");
    prompt.push_str(question);
    prompt.push_str("\n\n");

    prompt.push_str("## Instructions\n");
    if bundle.is_empty() {
        prompt.push_str(
            "Answer the question directly and warmly. There is no room history \
             to draw on, so do not pretend to know the room.\n",
        );
    } else {
        prompt.push_str(
            "Answer the question grounded in the context above. Prefer concrete \
             details from the room over generic statements. Match the language \
             of the question.\n",
        );
    }
    prompt.push_str(
        "Put your answer in \"answer\" and, in \"suggested_answer\", a short \
         follow-up message the user could send to the room next.\n\n",
    );

    prompt.push_str(JSON_OUTPUT_CONTRACT);
    prompt
}

/// Prompt for a reply turn. The target message is starred in the recent list
/// and restated in the task block.
pub fn build_reply_prompt(
    bundle: &ContextBundle,
    target: &MessageRecord,
    now: DateTime<Utc>,
) -> String {
    let mut prompt = String::new();
    push_context_section(&mut prompt, bundle, now);

    prompt.push_str("## Task\n");
    prompt.push_str("Draft a reply to this message:\n");
    prompt.push_str(&format_message_line(target, now, true));
    prompt.push_str("\n\n");

    prompt.push_str("## Instructions\n");
    if bundle.is_empty() {
        prompt.push_str(
            "Write the reply from the user's perspective using only the target \
             message itself. Match its language and register.\n",
        );
    } else {
        prompt.push_str(
            "Write the reply from the user's perspective, consistent with their \
             profile and the room's tone. Match the target message's language.\n",
        );
    }
    prompt.push_str(
        "Put the reply in \"answer\" and a slightly more casual variant in \
         \"suggested_answer\".\n\n",
    );

    prompt.push_str(JSON_OUTPUT_CONTRACT);
    prompt
}

fn push_context_section(prompt: &mut String, bundle: &ContextBundle, now: DateTime<Utc>) {
    prompt.push_str("## Context\n");

    if bundle.is_empty() {
        prompt.push_str(NO_CONTEXT_LINE);
        prompt.push_str("\n\n");
        return;
    }

    if let Some(summary) = &bundle.room_summary {
        prompt.push_str("### Room summary\n");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }

    if let Some(profile) = &bundle.user_profile {
        prompt.push_str("### User profile\n");
        prompt.push_str(profile);
        prompt.push_str("\n\n");
    }

    if !bundle.ai_history.is_empty() {
        prompt.push_str("### Previous AI chats\n");
        // Already oldest-first.
        for turn in &bundle.ai_history {
            prompt.push_str("- Q: ");
            prompt.push_str(&turn.question);
            prompt.push_str("\n  A: ");
            prompt.push_str(&turn.answer);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    if !bundle.recent_messages.is_empty() {
        prompt.push_str("### Recent messages\n");
        let starred_id = bundle.target.as_ref().map(|t| t.id.as_str());
        // Newest first.
        for message in &bundle.recent_messages {
            let starred = starred_id == Some(message.id.as_str());
            prompt.push_str(&format_message_line(message, now, starred));
            prompt.push('\n');
        }
        prompt.push('\n');
    }
}

fn format_message_line(message: &MessageRecord, now: DateTime<Utc>, starred: bool) -> String {
    let sender = message
        .sender_name
        .as_deref()
        .or(message.sender_id.as_deref())
        .unwrap_or("unknown");
    let marker = if starred { "⭐ " } else { "" };
    format!(
        "- {}[{}] {}: {}",
        marker,
        relative_time(message.created_at, now),
        sender,
        message.text
    )
}

/// Coarse relative-time label for message lines.
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3_600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3_600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::AiChatRecord;
    use chrono::Duration;

    fn bundle() -> ContextBundle {
        ContextBundle {
            room_summary: None,
            user_profile: None,
            ai_history: Vec::new(),
            recent_messages: Vec::new(),
            target: None,
        }
    }

    fn message(id: &str, text: &str, minutes_ago: i64, now: DateTime<Utc>) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            external_message_id: format!("ext-{id}"),
            room_id: "r1".into(),
            sender_id: Some("u1".into()),
            sender_name: Some("Sara".into()),
            text: text.into(),
            created_at: now - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(now, now), "just now");
        assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(relative_time(now - Duration::hours(2), now), "2h ago");
        assert_eq!(relative_time(now - Duration::days(3), now), "3d ago");
        // Clock skew must not produce negative labels.
        assert_eq!(relative_time(now + Duration::minutes(5), now), "just now");
    }

    #[test]
    fn empty_bundle_renders_no_context_branch() {
        let now = Utc::now();
        let prompt = build_chat_prompt(&bundle(), "مرحبا", now);
        assert!(prompt.contains("## Context"));
        assert!(prompt.contains(NO_CONTEXT_LINE));
        assert!(prompt.contains("## Task"));
        assert!(prompt.contains("مرحبا"));
        assert!(prompt.contains("no room history"));
        assert!(prompt.contains("\"answer\""));
        assert!(prompt.contains("\"suggested_answer\""));
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let now = Utc::now();
        let mut b = bundle();
        b.room_summary = Some("ملخص".into());
        b.user_profile = Some("ملف".into());
        b.ai_history.push(AiChatRecord {
            id: "h1".into(),
            user_id: "u1".into(),
            room_id: "r1".into(),
            question: "سؤال سابق".into(),
            answer: "جواب سابق".into(),
            suggested_answer: None,
            provider_name: "groq".into(),
            model_name: "m".into(),
            created_at: now,
        });
        b.recent_messages.push(message("m1", "أهلا", 3, now));

        let prompt = build_chat_prompt(&b, "كيف الحال؟", now);

        let context = prompt.find("## Context").unwrap();
        let room = prompt.find("### Room summary").unwrap();
        let profile = prompt.find("### User profile").unwrap();
        let history = prompt.find("### Previous AI chats").unwrap();
        let recent = prompt.find("### Recent messages").unwrap();
        let task = prompt.find("## Task").unwrap();
        let instructions = prompt.find("## Instructions").unwrap();

        assert!(context < room && room < profile && profile < history);
        assert!(history < recent && recent < task && task < instructions);
        assert!(prompt.contains("- Q: سؤال سابق"));
        assert!(prompt.contains("[3m ago] Sara: أهلا"));
        assert!(!prompt.contains(NO_CONTEXT_LINE));
    }

    #[test]
    fn reply_prompt_stars_the_target() {
        let now = Utc::now();
        let target = message("t1", "رسالة الهدف", 10, now);
        let mut b = bundle();
        b.recent_messages.push(message("m2", "أخرى", 2, now));
        b.recent_messages.push(target.clone());
        b.target = Some(target.clone());

        let prompt = build_reply_prompt(&b, &target, now);
        assert!(prompt.contains("Draft a reply to this message:"));
        assert!(prompt.contains("⭐ [10m ago] Sara: رسالة الهدف"));
        // The non-target line is not starred.
        assert!(prompt.contains("- [2m ago] Sara: أخرى"));
        assert!(prompt.contains("from the user's perspective"));
    }

    #[test]
    fn system_prompts_differ_by_endpoint() {
        assert!(CHAT_SYSTEM_PROMPT.contains("ميجو"));
        assert!(REPLY_SYSTEM_PROMPT.contains("not as an assistant"));
        assert_ne!(CHAT_SYSTEM_PROMPT, REPLY_SYSTEM_PROMPT);
    }
}
