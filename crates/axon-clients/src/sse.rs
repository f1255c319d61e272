/// Parse a single SSE line from an OpenAI-compatible streaming API.
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

/// Accumulates raw bytes and yields complete lines, holding back the
/// trailing partial line until its newline arrives.
#[derive(Default)]
pub struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut lines: Vec<String> = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_line() {
        match parse_sse_line("data: {\"x\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"x\":1}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_event_line() {
        match parse_sse_line("event: message_stop") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "message_stop"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push("data: {\"a\"").is_empty());
        let lines = buf.push(":1}\ndata: next");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string()]);
        let lines = buf.push("\n");
        assert_eq!(lines, vec!["data: next".to_string()]);
    }
}
