//! Incremental Server-Sent Events parser for upstream model streams.

/// Feeds arbitrary byte-chunk boundaries and yields complete `data:`
/// payloads. Consecutive `data:` fields are joined with `\n`; comment
/// lines and non-data fields are skipped, since the OpenAI-compatible
/// endpoints only ever carry payloads in `data:`.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return any completed data payloads.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(std::mem::take(&mut self.data));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
        }

        payloads
    }

    /// Flush a trailing payload when the stream ends without a blank line.
    pub fn finish(mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let trailing = std::mem::take(&mut self.buffer);
            self.push(&format!("{trailing}\n"));
        }
        if self.data.is_empty() {
            None
        } else {
            Some(self.data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_payload_per_blank_line() {
        let mut parser = SseParser::new();
        let payloads = parser.push("data: one\n\ndata: two\n\n");
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut parser = SseParser::new();
        let payloads = parser.push(": keepalive\ndata: a\ndata: b\n\n");
        assert_eq!(payloads, vec!["a\nb".to_string()]);
    }

    #[test]
    fn handles_chunk_boundaries_inside_lines() {
        let mut parser = SseParser::new();
        assert!(parser.push("da").is_empty());
        assert!(parser.push("ta: hel").is_empty());
        let payloads = parser.push("lo\n\n");
        assert_eq!(payloads, vec!["hello".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_payload() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: tail").is_empty());
        assert_eq!(parser.finish(), Some("tail".to_string()));
    }
}
