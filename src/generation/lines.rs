//! Newline-delimited record framing for streamed response bodies.

/// Reassembles newline-delimited records from arbitrarily split byte chunks.
///
/// Splitting happens on the raw `\n` byte, which never occurs inside a multi-byte UTF-8
/// sequence, so characters straddling chunk boundaries survive intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every line completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(position) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=position).collect();
            lines.push(decode(&line[..line.len() - 1]));
        }
        lines
    }

    /// Return whatever trailing line was left without a terminator.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode(&rest))
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buffer.push(b":2}\n"), vec!["{\"b\":2}"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn keeps_multibyte_characters_intact() {
        let mut buffer = LineBuffer::default();
        let text = "caf\u{e9}\n".as_bytes();
        assert!(buffer.push(&text[..4]).is_empty());
        assert_eq!(buffer.push(&text[4..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
        assert_eq!(buffer.finish(), None);
    }
}
