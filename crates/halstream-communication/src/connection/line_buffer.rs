//! Splits an inbound byte stream into lines.

/// Longest line kept; anything longer is noise on the link
pub const MAX_LINE_LENGTH: usize = 4096;

/// Accumulates bytes until a `\n` completes a line
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Dropping the rest of an overlong line
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every completed, non-blank line
    ///
    /// `\r` is dropped; invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    self.pending.clear();
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                b'\r' => {}
                _ if self.discarding => {}
                _ if self.pending.len() >= MAX_LINE_LENGTH => {
                    tracing::warn!(
                        "Discarding a line longer than {} bytes without a terminator",
                        MAX_LINE_LENGTH
                    );
                    self.pending.clear();
                    self.discarding = true;
                }
                _ => self.pending.push(byte),
            }
        }
        lines
    }

    /// Bytes received after the last terminator
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"<Idle|MPos:0.000").is_empty());
        assert_eq!(
            buffer.push(b",0.000,0.000>\r\nok\r\n\r\nerr"),
            vec!["<Idle|MPos:0.000,0.000,0.000>".to_string(), "ok".to_string()]
        );
        assert_eq!(buffer.remainder(), b"err");
        assert_eq!(buffer.push(b"or:20\n"), vec!["error:20".to_string()]);
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut buffer = LineBuffer::new();
        let noise = vec![b'x'; MAX_LINE_LENGTH + 10];
        assert!(buffer.push(&noise).is_empty());
        assert!(buffer.remainder().is_empty());
        assert!(buffer.push(b"more noise").is_empty());
        assert_eq!(buffer.push(b"\nok\n"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(&[b'o', 0xFF, b'k', b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('o'));
    }
}
