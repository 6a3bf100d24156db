// src/chat/parser.rs
// Recovery ladder for LLM output. Models emit JSON inside prose or code
// fences inconsistently; the strategies run in a fixed order that tests
// depend on:
//   (a) direct JSON parse
//   (b) strip triple-backtick fences, retry
//   (c) extract the first {...} region, retry
//   (d) regex-extract the "answer"/"suggested_answer" string literals
//   (e) treat the whole raw text as the answer
// A final pass unwraps an answer that is itself a JSON object.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// What a generation turn parsed down to.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub answer: String,
    pub suggested_answer: Option<String>,
}

pub fn parse_llm_reply(raw: &str) -> ParsedReply {
    let trimmed = raw.trim();

    // (a) direct parse
    if let Some(reply) = try_json(trimmed) {
        return unwrap_nested(reply);
    }

    // (b) strip code fences
    if let Some(inner) = strip_fences(trimmed) {
        if let Some(reply) = try_json(&inner) {
            return unwrap_nested(reply);
        }
    }

    // (c) first {...} region
    if let Some(region) = brace_region(trimmed) {
        if let Some(reply) = try_json(region) {
            return unwrap_nested(reply);
        }
    }

    // (d) regex string literals
    if let Some(reply) = extract_literals(trimmed) {
        return unwrap_nested(reply);
    }

    // (e) the raw text is the answer
    ParsedReply {
        answer: trimmed.to_string(),
        suggested_answer: None,
    }
}

fn try_json(text: &str) -> Option<ParsedReply> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let answer = match object.get("answer")? {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let suggested_answer = match object.get("suggested_answer") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    Some(ParsedReply {
        answer,
        suggested_answer,
    })
}

fn strip_fences(text: &str) -> Option<String> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex is valid")
    });
    fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn brace_region(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn extract_literals(text: &str) -> Option<ParsedReply> {
    static ANSWER: OnceLock<Regex> = OnceLock::new();
    static SUGGESTED: OnceLock<Regex> = OnceLock::new();
    let answer_re = ANSWER.get_or_init(|| {
        Regex::new(r#""answer"\s*:\s*"((?:\\.|[^"\\])*)""#).expect("answer regex is valid")
    });
    let suggested_re = SUGGESTED.get_or_init(|| {
        Regex::new(r#""suggested_answer"\s*:\s*"((?:\\.|[^"\\])*)""#)
            .expect("suggested regex is valid")
    });

    let answer = answer_re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()))?;
    let suggested_answer = suggested_re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()))
        .filter(|s| !s.is_empty());

    Some(ParsedReply {
        answer,
        suggested_answer,
    })
}

/// Decode JSON string escapes in a captured literal body.
fn unescape(escaped: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{escaped}\""))
        .unwrap_or_else(|_| escaped.to_string())
}

/// Some models nest the whole object inside the answer field; parse once
/// more if so.
fn unwrap_nested(reply: ParsedReply) -> ParsedReply {
    let candidate = reply.answer.trim();
    if candidate.starts_with('{') {
        if let Some(inner) = try_json(candidate) {
            return ParsedReply {
                answer: inner.answer,
                suggested_answer: inner.suggested_answer.or(reply.suggested_answer),
            };
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_json_parses() {
        let reply = parse_llm_reply(r#"{"answer": "أهلا", "suggested_answer": "كيف الحال؟"}"#);
        assert_eq!(reply.answer, "أهلا");
        assert_eq!(reply.suggested_answer.as_deref(), Some("كيف الحال؟"));
    }

    #[test]
    fn null_suggested_answer_maps_to_none() {
        let reply = parse_llm_reply(r#"{"answer": "hi", "suggested_answer": null}"#);
        assert_eq!(reply.answer, "hi");
        assert!(reply.suggested_answer.is_none());
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n{\"answer\": \"hello\", \"suggested_answer\": \"more\"}\n```";
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "hello");
        assert_eq!(reply.suggested_answer.as_deref(), Some("more"));
    }

    #[test]
    fn bare_fence_without_language_tag_parses() {
        let raw = "```\n{\"answer\": \"x\", \"suggested_answer\": \"y\"}\n```";
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "x");
    }

    #[test]
    fn json_inside_prose_parses() {
        let raw = "Sure! Here is the result:\n{\"answer\": \"ok\", \"suggested_answer\": \"next\"}\nHope that helps.";
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "ok");
        assert_eq!(reply.suggested_answer.as_deref(), Some("next"));
    }

    #[test]
    fn broken_json_falls_back_to_literal_extraction() {
        // Trailing comma defeats the JSON parser; the regex rung catches it.
        let raw = r#"{"answer": "saved by regex", "suggested_answer": "also saved",}"#;
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "saved by regex");
        assert_eq!(reply.suggested_answer.as_deref(), Some("also saved"));
    }

    #[test]
    fn escaped_quotes_survive_literal_extraction() {
        let raw = r#"noise {"answer": "he said \"hi\"", "suggested_answer": "ok", extra garbage"#;
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "he said \"hi\"");
    }

    #[test]
    fn plain_text_becomes_the_answer() {
        let reply = parse_llm_reply("مرحبا، كيف أساعدك اليوم؟");
        assert_eq!(reply.answer, "مرحبا، كيف أساعدك اليوم؟");
        assert!(reply.suggested_answer.is_none());
    }

    #[test]
    fn nested_answer_object_is_unwrapped() {
        let raw = r#"{"answer": "{\"answer\": \"inner\", \"suggested_answer\": \"inner-s\"}", "suggested_answer": null}"#;
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "inner");
        assert_eq!(reply.suggested_answer.as_deref(), Some("inner-s"));
    }

    #[test]
    fn non_string_answer_is_stringified() {
        let reply = parse_llm_reply(r#"{"answer": 42}"#);
        assert_eq!(reply.answer, "42");
    }

    #[test]
    fn empty_suggested_answer_maps_to_none() {
        let reply = parse_llm_reply(r#"{"answer": "a", "suggested_answer": ""}"#);
        assert!(reply.suggested_answer.is_none());
    }
}
