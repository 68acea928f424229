//! Transcript parsing (§4.4): newline-delimited JSON messages, extracting
//! the last user and last assistant text to populate a turn's
//! `user_message`/`assistant_summary`.
//!
//! Two message content shapes are recognized: a bare string, or a list of
//! typed blocks (`{"type": "text"|"input_text"|"output_text", "text": ...}`).
//! Anything else is ignored rather than rejected — the parser is
//! deliberately permissive, matching how lenient the original's JSONL
//! consumers are about odd/future message shapes.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    text: Option<String>,
}

impl MessageContent {
    fn as_text(&self) -> Option<String> {
        match self {
            MessageContent::Text(s) => Some(s.clone()),
            MessageContent::Blocks(blocks) => {
                let joined: String = blocks
                    .iter()
                    .filter(|b| {
                        matches!(
                            b.block_type.as_deref(),
                            Some("text") | Some("input_text") | Some("output_text")
                        )
                    })
                    .filter_map(|b| b.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("");
                if joined.is_empty() {
                    None
                } else {
                    Some(joined)
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedTranscript {
    pub last_user: Option<String>,
    pub last_assistant: Option<String>,
}

/// Parse a newline-delimited JSON transcript, keeping only the last user
/// and last assistant text seen. Unrecognized or malformed lines are
/// skipped, never fatal.
pub fn parse(transcript: &str) -> ParsedTranscript {
    let mut result = ParsedTranscript::default();

    for line in transcript.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<RawMessage>(line) else { continue };
        let Some(text) = message.content.as_text() else { continue };

        match message.role.as_str() {
            "user" => result.last_user = Some(text),
            "assistant" => result.last_assistant = Some(text),
            _ => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_string_content() {
        let transcript = r#"{"role":"user","content":"Fix auth bug"}
{"role":"assistant","content":"Fixed it"}"#;
        let parsed = parse(transcript);
        assert_eq!(parsed.last_user.as_deref(), Some("Fix auth bug"));
        assert_eq!(parsed.last_assistant.as_deref(), Some("Fixed it"));
    }

    #[test]
    fn parses_block_content_and_keeps_last_of_each_role() {
        let transcript = r#"{"role":"user","content":[{"type":"input_text","text":"first"}]}
{"role":"assistant","content":[{"type":"output_text","text":"reply one"}]}
{"role":"user","content":[{"type":"text","text":"second"}]}
{"role":"assistant","content":[{"type":"text","text":"reply two"}]}"#;
        let parsed = parse(transcript);
        assert_eq!(parsed.last_user.as_deref(), Some("second"));
        assert_eq!(parsed.last_assistant.as_deref(), Some("reply two"));
    }

    #[test]
    fn ignores_malformed_lines() {
        let transcript = "not json\n{\"role\":\"user\",\"content\":\"ok\"}\n{broken";
        let parsed = parse(transcript);
        assert_eq!(parsed.last_user.as_deref(), Some("ok"));
    }

    #[test]
    fn ignores_unrecognized_roles() {
        let transcript = r#"{"role":"system","content":"setup"}"#;
        let parsed = parse(transcript);
        assert_eq!(parsed.last_user, None);
        assert_eq!(parsed.last_assistant, None);
    }
}
