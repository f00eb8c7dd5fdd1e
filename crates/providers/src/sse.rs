//! Line decoder for server-sent-event bodies.
//!
//! Bytes are buffered until a full line is available so that multi-byte
//! UTF-8 sequences split across network chunks decode correctly. Only
//! `data:` lines carry payloads; comments, blank lines and other fields
//! are dropped. A line longer than the decoder's limit ends the stream.

use promptgate_core::error::ProviderError;

/// Longest accepted line, newline excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One meaningful line of an SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// The payload of a `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Feed raw bytes, returning every complete line they finish.
    ///
    /// Fails once a line, complete or still pending, exceeds the limit. The
    /// pending bytes are discarded so the decoder does not keep growing.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseLine>, ProviderError> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos > self.max_line_bytes {
                return Err(self.oversized());
            }
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(parsed) = parse_line(&line[..line.len() - 1]) {
                out.push(parsed);
            }
        }

        if self.buffer.len() > self.max_line_bytes {
            return Err(self.oversized());
        }
        Ok(out)
    }

    fn oversized(&mut self) -> ProviderError {
        self.buffer = Vec::new();
        ProviderError::StreamInterrupted(format!(
            "stream line exceeds {} bytes",
            self.max_line_bytes
        ))
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<SseLine> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data).trim();

    if data == "[DONE]" {
        Some(SseLine::Done)
    } else {
        Some(SseLine::Data(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_lines_and_sentinel() {
        let mut dec = SseDecoder::new();
        let lines = dec
            .push(b"data: {\"a\":1}\n\n: keep-alive\nevent: ping\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(
            lines,
            vec![SseLine::Data("{\"a\":1}".into()), SseLine::Done]
        );
    }

    #[test]
    fn buffers_partial_lines() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"del").unwrap().is_empty());
        assert_eq!(
            dec.push(b"ta\":1}\r\n").unwrap(),
            vec![SseLine::Data("{\"delta\":1}".into())]
        );
    }

    #[test]
    fn multibyte_split_across_chunks() {
        let text = "data: héllo\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut dec = SseDecoder::new();
        assert!(dec.push(&text[..split]).unwrap().is_empty());
        assert_eq!(
            dec.push(&text[split..]).unwrap(),
            vec![SseLine::Data("héllo".into())]
        );
    }

    #[test]
    fn data_without_space_and_trailing_line() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data:{}").unwrap().is_empty());
        assert_eq!(dec.finish(), Some(SseLine::Data("{}".into())));
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn unterminated_line_over_limit_fails() {
        let mut dec = SseDecoder::new();
        let chunk = vec![b'x'; 512 * 1024];
        assert!(dec.push(b"data: ").unwrap().is_empty());
        assert!(dec.push(&chunk).unwrap().is_empty());

        let err = dec.push(&chunk).unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
        assert!(err.to_string().contains("1048576"));
        // Pending bytes are dropped rather than retained.
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn complete_line_over_limit_fails() {
        let mut dec = SseDecoder::new().with_max_line_bytes(16);
        let err = dec.push(b"data: 0123456789abcdef\n").unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));

        let mut dec = SseDecoder::new().with_max_line_bytes(16);
        assert_eq!(
            dec.push(b"data: short\n").unwrap(),
            vec![SseLine::Data("short".into())]
        );
    }
}
