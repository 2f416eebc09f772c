//! Line framing for the IRC byte stream.
//!
//! Inbound bytes arrive in arbitrary chunks; [`LineBuffer`] keeps the
//! partial tail between reads and yields complete lines with the CR/LF
//! terminator stripped. Outbound lines go through [`frame`], which caps
//! them at the protocol limit. A line that is too long is truncated, never
//! split into two wire lines.

/// Maximum size of one protocol line including the trailing CRLF.
pub const MAX_LINE: usize = 512;

/// Maximum payload of an outbound line (everything except CRLF).
pub const MAX_PAYLOAD: usize = MAX_LINE - 2;

/// Inbound lines longer than this are cut; the remainder up to the next
/// LF is discarded. Servers with tags can legitimately exceed 512 bytes.
pub const MAX_INBOUND: usize = 8192;

/// Accumulates raw bytes and splits them into protocol lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Set while we are skipping the tail of an over-long line.
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the socket, returning every line completed by
    /// them. Bytes after the last LF stay buffered for the next call.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    self.buf.clear();
                    continue;
                }
                lines.push(finish(&mut self.buf));
                continue;
            }
            if self.discarding {
                continue;
            }
            self.buf.push(b);
            if self.buf.len() >= MAX_INBOUND {
                tracing::warn!(len = self.buf.len(), "Inbound line too long, truncating");
                lines.push(finish(&mut self.buf));
                self.discarding = true;
            }
        }
        lines
    }

    /// Bytes received after the last complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn finish(buf: &mut Vec<u8>) -> String {
    while matches!(buf.last(), Some(b'\r') | Some(b'\n')) {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

/// Prepare one outbound line for the wire: cut at the first embedded CR or
/// LF, truncate to [`MAX_PAYLOAD`] bytes on a character boundary, and
/// append CRLF.
pub fn frame(line: &str) -> String {
    let line = match line.find(['\r', '\n']) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut end = line.len().min(MAX_PAYLOAD);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    if end < line.len() {
        tracing::debug!(len = line.len(), "Outbound line truncated to {MAX_PAYLOAD} bytes");
    }
    let mut out = String::with_capacity(end + 2);
    out.push_str(&line[..end]);
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_lines_are_kept_between_reads() {
        let mut lb = LineBuffer::new();
        assert!(lb.extend(b":irc.example.net NOT").is_empty());
        assert_eq!(lb.pending(), 20);
        let lines = lb.extend(b"ICE * :hi\r\nPING :x\r\n:a");
        assert_eq!(lines, vec![":irc.example.net NOTICE * :hi", "PING :x"]);
        assert_eq!(lb.pending(), 2);
    }

    #[test]
    fn bare_lf_and_stray_cr_are_stripped() {
        let mut lb = LineBuffer::new();
        let lines = lb.extend(b"one\ntwo\r\r\n\r\n");
        assert_eq!(lines, vec!["one", "two", ""]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let mut lb = LineBuffer::new();
        let lines = lb.extend(b"PRIVMSG #c :caf\xe9\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("PRIVMSG #c :caf"));
    }

    #[test]
    fn overlong_inbound_line_is_cut_and_tail_discarded() {
        let mut lb = LineBuffer::new();
        let mut data = vec![b'a'; MAX_INBOUND + 100];
        data.extend_from_slice(b"\r\nPING :ok\r\n");
        let lines = lb.extend(&data);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_INBOUND);
        assert_eq!(lines[1], "PING :ok");
    }

    #[test]
    fn frame_appends_crlf() {
        assert_eq!(frame("NICK bob"), "NICK bob\r\n");
    }

    #[test]
    fn frame_truncates_instead_of_splitting() {
        let long = format!("PRIVMSG #c :{}", "x".repeat(600));
        let framed = frame(&long);
        assert_eq!(framed.len(), MAX_LINE);
        assert_eq!(framed.matches("\r\n").count(), 1);
    }

    #[test]
    fn frame_respects_char_boundaries() {
        let long = format!("PRIVMSG #c :{}", "é".repeat(300));
        let framed = frame(&long);
        assert!(framed.len() <= MAX_LINE);
        assert!(framed.ends_with("\r\n"));
    }

    #[test]
    fn frame_cuts_embedded_newlines() {
        assert_eq!(frame("PRIVMSG #c :a\r\nQUIT"), "PRIVMSG #c :a\r\n");
    }
}
