/// Events emitted while streaming an LLM completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    Delta { text: String },

    /// Stream completed successfully; carries the final usage numbers.
    Done {
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
    },

    /// Error during streaming. Terminal.
    Error { message: String },
}

/// Parse a single SSE line from a provider's streaming API.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: message_start") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "message_start"),
            other => panic!("unexpected: {:?}", other),
        }
        match parse_sse_line(r#"data: {"x":1}"#) {
            Some(SseParsed::Data(d)) => assert_eq!(d, r#"{"x":1}"#),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(parse_sse_line(": keep-alive comment").is_none());
    }
}
