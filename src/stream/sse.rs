//! Wire-format frame parsing.
//!
//! The stream arrives as text blocks separated by a blank line. Each block
//! carries an optional `event:` line and one or more `data:` lines; lines
//! starting with `:` are comments. Transport chunks can split a block at any
//! byte, so the parser accumulates input and only drains complete blocks,
//! carrying the incomplete tail forward until more bytes arrive.

/// A parsed wire-format block, before payload validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Event name from the `event:` field, defaulting to "message".
    pub event_name: String,
    /// All `data:` lines of the block, joined with newlines.
    pub data: String,
}

/// Incremental parser for the blank-line-delimited wire format.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: String,
}

impl FrameParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of transport text and drain every complete block.
    ///
    /// Splitting one delivery across any number of chunks yields the same
    /// frame sequence as feeding it whole.
    pub fn feed(&mut self, chunk: &str) -> Vec<RawFrame> {
        self.buf.push_str(chunk);

        let mut frames = Vec::new();
        while let Some((block_end, delimiter_end)) = next_block_boundary(&self.buf) {
            let block = self.buf[..block_end].to_string();
            self.buf.drain(..delimiter_end);
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Unparsed trailing input, if any.
    pub fn remainder(&self) -> &str {
        &self.buf
    }

    /// Drop any buffered partial block.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Locate the first blank line in the buffer.
///
/// Returns the byte offset where the block ends (start of the blank line)
/// and the offset just past the blank line's terminator. The text after the
/// last delimiter is never parsed.
fn next_block_boundary(buf: &str) -> Option<(usize, usize)> {
    let bytes = buf.as_bytes();
    let mut line_start = 0usize;

    for (i, b) in bytes.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let mut line_end = i;
        if line_end > line_start && bytes[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        if line_end == line_start {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

/// Parse one complete block into a raw frame.
///
/// Returns `None` for blocks with no `data:` lines.
fn parse_block(block: &str) -> Option<RawFrame> {
    let mut event_name: Option<String> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_name = Some(value.trim().to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(RawFrame {
        event_name: event_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_single_block() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("event: thinking\ndata: {\"content\":\"hm\"}\n\n");
        assert_eq!(
            frames,
            vec![RawFrame {
                event_name: "thinking".to_string(),
                data: "{\"content\":\"hm\"}".to_string(),
            }]
        );
        assert!(parser.remainder().is_empty());
    }

    #[test]
    fn test_event_name_defaults_to_message() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("data: {}\n\n");
        assert_eq!(frames[0].event_name, "message");
    }

    #[test]
    fn test_block_without_data_yields_nothing() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("event: heartbeat\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn test_comment_lines_ignored() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(": keepalive comment\ndata: 1\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "1");
    }

    #[test]
    fn test_multiple_data_lines_joined_in_order() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("data: first\ndata: second\ndata: third\n\n");
        assert_eq!(frames[0].data, "first\nsecond\nthird");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("event: log\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_name, "log");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn test_event_name_is_trimmed() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("event:  status \ndata: {}\n\n");
        assert_eq!(frames[0].event_name, "status");
    }

    #[test]
    fn test_trailing_partial_block_stays_buffered() {
        let mut parser = FrameParser::new();
        let frames = parser.feed("data: done\n\ndata: not yet");
        assert_eq!(frames.len(), 1);
        assert_eq!(parser.remainder(), "data: not yet");

        let frames = parser.feed("\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "not yet");
    }

    #[test]
    fn test_value_without_colon_is_field_name() {
        // A bare "data" line is a data field with an empty value.
        let mut parser = FrameParser::new();
        let frames = parser.feed("data\ndata: x\n\n");
        assert_eq!(frames[0].data, "\nx");
    }

    #[test]
    fn test_chunking_invariance() {
        let payload = "event: thinking\ndata: {\"content\":\"a\"}\n\n\
                       : comment\nevent: status\ndata: {\"status\":\"running\"}\n\n\
                       data: {\"id\":\"m1\"}\ndata: {\"more\":true}\n\n";

        let mut whole = FrameParser::new();
        let expected = whole.feed(payload);
        assert_eq!(expected.len(), 3);

        for split in 0..=payload.len() {
            if !payload.is_char_boundary(split) {
                continue;
            }
            let mut parser = FrameParser::new();
            let mut frames = parser.feed(&payload[..split]);
            frames.extend(parser.feed(&payload[split..]));
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_chunking_invariance_byte_at_a_time() {
        let payload = "event: metrics\r\ndata: {\"loop_count\":1}\r\n\r\ndata: {}\n\n";

        let mut whole = FrameParser::new();
        let expected = whole.feed(payload);

        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for i in 0..payload.len() {
            frames.extend(parser.feed(&payload[i..i + 1]));
        }
        assert_eq!(frames, expected);
    }
}
