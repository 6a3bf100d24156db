// tests/prompt_assembly_test.rs
// End-to-end checks of prompt composition: section order, relative-time
// labels, the starred reply target, and the no-context branch.

use chrono::{Duration, Utc};
use majlis::context::prompt::{
    build_chat_prompt, build_reply_prompt, CHAT_SYSTEM_PROMPT, REPLY_SYSTEM_PROMPT,
};
use majlis::context::{ContextBundle, ContextReport};
use majlis::vector::{AiChatRecord, MessageRecord};

fn message(id: &str, sender: &str, text: &str, minutes_ago: i64) -> MessageRecord {
    let now = Utc::now();
    MessageRecord {
        id: id.to_string(),
        external_message_id: format!("ext-{id}"),
        room_id: "r1".to_string(),
        sender_id: Some(sender.to_string()),
        sender_name: Some(sender.to_string()),
        text: text.to_string(),
        created_at: now - Duration::minutes(minutes_ago),
    }
}

fn turn(question: &str, answer: &str, minutes_ago: i64) -> AiChatRecord {
    AiChatRecord {
        id: "t".to_string(),
        user_id: "u1".to_string(),
        room_id: "r1".to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        suggested_answer: None,
        provider_name: "groq".to_string(),
        model_name: "llama-3.3-70b-versatile".to_string(),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

fn full_bundle() -> ContextBundle {
    ContextBundle {
        room_summary: Some("الغرفة تناقش خطط السفر إلى جدة".to_string()),
        user_profile: Some("يحب القهوة المختصة ويكتب بالعربية".to_string()),
        // Oldest first, as the assembler delivers it.
        ai_history: vec![turn("أول سؤال", "أول جواب", 60), turn("ثاني سؤال", "ثاني جواب", 30)],
        recent_messages: vec![
            message("m3", "سارة", "من سيحجز الفندق؟", 2),
            message("m2", "عمر", "التذاكر اشتريتها", 10),
        ],
        target: None,
    }
}

#[test]
fn chat_prompt_renders_all_sections_in_order() {
    let prompt = build_chat_prompt(&full_bundle(), "متى موعد الرحلة؟", Utc::now());

    let positions: Vec<usize> = [
        "## Context",
        "### Room summary",
        "### User profile",
        "### Previous AI chats",
        "### Recent messages",
        "## Task",
        "## Instructions",
    ]
    .iter()
    .map(|heading| prompt.find(heading).unwrap_or_else(|| panic!("missing {heading}")))
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "sections out of order");

    // Prior turns oldest first; recent messages newest first with labels.
    let first = prompt.find("أول سؤال").unwrap();
    let second = prompt.find("ثاني سؤال").unwrap();
    assert!(first < second);

    let newest = prompt.find("[2m ago] سارة").unwrap();
    let older = prompt.find("[10m ago] عمر").unwrap();
    assert!(newest < older);

    assert!(prompt.contains("متى موعد الرحلة؟"));
    assert!(prompt.contains("{\"answer\": \"...\", \"suggested_answer\": \"...\"}"));
}

#[test]
fn chat_prompt_without_context_uses_the_empty_branch() {
    let bundle = ContextBundle {
        room_summary: None,
        user_profile: None,
        ai_history: vec![],
        recent_messages: vec![],
        target: None,
    };
    let prompt = build_chat_prompt(&bundle, "hello", Utc::now());

    assert!(prompt.contains("No context is available yet for this room."));
    assert!(!prompt.contains("### Room summary"));
    assert!(!prompt.contains("### Recent messages"));

    let report = ContextReport::from(&bundle);
    assert_eq!(report.quality, 0);
    assert!(!report.has_room_summary);
    assert_eq!(report.latest_messages_count, 0);
}

#[test]
fn reply_prompt_stars_only_the_target() {
    let target = message("m2", "عمر", "التذاكر اشتريتها", 10);
    let mut bundle = full_bundle();
    bundle.ai_history.clear();
    bundle.target = Some(target.clone());

    let prompt = build_reply_prompt(&bundle, &target, Utc::now());

    assert!(prompt.contains("Draft a reply to this message:"));
    assert!(prompt.contains("⭐ [10m ago] عمر: التذاكر اشتريتها"));
    // The other recent message stays unstarred.
    assert!(prompt.contains("- [2m ago] سارة: من سيحجز الفندق؟"));
    assert_eq!(prompt.matches('⭐').count(), 2, "target starred in list and task block");
}

#[test]
fn system_prompts_pin_the_personas() {
    assert!(CHAT_SYSTEM_PROMPT.contains("ميجو"));
    assert!(CHAT_SYSTEM_PROMPT.contains("JSON"));
    assert!(REPLY_SYSTEM_PROMPT.contains("not as an assistant"));
}

#[test]
fn quality_score_reflects_available_sources() {
    let full = ContextReport::from(&full_bundle());
    assert_eq!(full.quality, 100);

    let mut partial = full_bundle();
    partial.user_profile = None;
    partial.ai_history.clear();
    let report = ContextReport::from(&partial);
    assert_eq!(report.quality, 60); // room 30 + recent 30
}
