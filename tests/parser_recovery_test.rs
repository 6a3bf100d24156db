// tests/parser_recovery_test.rs
// The recovery ladder against the kinds of output the upstream models
// actually produce: clean JSON, fenced JSON, JSON buried in prose, broken
// JSON, and plain text.

use majlis::chat::parser::parse_llm_reply;

#[test]
fn well_formed_json_with_and_without_fences() {
    let cases = [
        r#"{"answer": "التذكرة محجوزة", "suggested_answer": "هل أرسل التفاصيل؟"}"#,
        "```json\n{\"answer\": \"التذكرة محجوزة\", \"suggested_answer\": \"هل أرسل التفاصيل؟\"}\n```",
        "```\n{\"answer\": \"التذكرة محجوزة\", \"suggested_answer\": \"هل أرسل التفاصيل؟\"}\n```",
        "Here is my response:\n{\"answer\": \"التذكرة محجوزة\", \"suggested_answer\": \"هل أرسل التفاصيل؟\"}\nLet me know!",
    ];

    for raw in cases {
        let reply = parse_llm_reply(raw);
        assert_eq!(reply.answer, "التذكرة محجوزة", "failed on: {raw}");
        assert_eq!(
            reply.suggested_answer.as_deref(),
            Some("هل أرسل التفاصيل؟"),
            "failed on: {raw}"
        );
    }
}

#[test]
fn broken_json_recovers_via_literal_extraction() {
    // Unquoted key elsewhere breaks the parse but the target literals survive.
    let raw = r#"{answer_count: 1, "answer": "regex rung", "suggested_answer": "still here"}"#;
    let reply = parse_llm_reply(raw);
    assert_eq!(reply.answer, "regex rung");
    assert_eq!(reply.suggested_answer.as_deref(), Some("still here"));
}

#[test]
fn prose_only_output_becomes_the_answer_verbatim() {
    let raw = "عذراً، لا أستطيع الإجابة على هذا السؤال الآن.";
    let reply = parse_llm_reply(raw);
    assert_eq!(reply.answer, raw);
    assert!(reply.suggested_answer.is_none());
}

#[test]
fn whitespace_is_trimmed_before_parsing() {
    let raw = "\n\n  {\"answer\": \"trimmed\", \"suggested_answer\": null}  \n";
    let reply = parse_llm_reply(raw);
    assert_eq!(reply.answer, "trimmed");
    assert!(reply.suggested_answer.is_none());
}

#[test]
fn doubly_wrapped_answer_is_unwrapped_once_more() {
    let raw = r#"{"answer": "{\"answer\": \"الجواب الداخلي\", \"suggested_answer\": \"اقتراح\"}"}"#;
    let reply = parse_llm_reply(raw);
    assert_eq!(reply.answer, "الجواب الداخلي");
    assert_eq!(reply.suggested_answer.as_deref(), Some("اقتراح"));
}

#[test]
fn missing_suggested_answer_is_none_not_empty() {
    let reply = parse_llm_reply(r#"{"answer": "فقط جواب"}"#);
    assert_eq!(reply.answer, "فقط جواب");
    assert!(reply.suggested_answer.is_none());
}
