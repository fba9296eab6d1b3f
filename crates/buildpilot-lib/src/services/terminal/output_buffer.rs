// Terminal output buffer
// Append-only text with a byte cap. When the cap is exceeded the oldest
// content is dropped from the front. Offsets are absolute (bytes written since
// creation) so a reader's mark stays meaningful across truncation.

/// Bounded terminal output buffer
#[derive(Debug)]
pub struct TerminalOutputBuffer {
    content: String,
    /// Absolute offset of `content[0]`
    start_offset: usize,
    max_size: usize,
    truncated: bool,
}

impl TerminalOutputBuffer {
    /// Default max size: 50KB
    pub const DEFAULT_MAX_SIZE: usize = 50_000;

    pub fn new() -> Self {
        Self::with_max_size(Self::DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            content: String::new(),
            start_offset: 0,
            max_size: max_size.max(1),
            truncated: false,
        }
    }

    /// Append output, dropping old content to stay within the cap
    pub fn push(&mut self, data: &str) {
        self.content.push_str(data);

        if self.content.len() > self.max_size {
            let mut cut = self.content.len() - self.max_size;
            while !self.content.is_char_boundary(cut) {
                cut += 1;
            }
            self.content.drain(..cut);
            self.start_offset += cut;
            self.truncated = true;
        }
    }

    /// Absolute offset one past the last byte written
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.content.len()
    }

    /// Output written after `mark`. If part of it was already truncated away,
    /// everything still retained is returned.
    pub fn since(&self, mark: usize) -> &str {
        if mark <= self.start_offset {
            return &self.content;
        }
        let mut rel = (mark - self.start_offset).min(self.content.len());
        while !self.content.is_char_boundary(rel) {
            rel += 1;
        }
        &self.content[rel..]
    }

    pub fn contents(&self) -> &str {
        &self.content
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Current retained size in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn clear(&mut self) {
        self.start_offset = self.end_offset();
        self.content.clear();
    }
}

impl Default for TerminalOutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_limit() {
        let mut buf = TerminalOutputBuffer::with_max_size(100);
        buf.push("hello ");
        buf.push("world");
        assert_eq!(buf.contents(), "hello world");
        assert_eq!(buf.end_offset(), 11);
        assert!(!buf.is_truncated());
    }

    #[test]
    fn test_front_truncation_keeps_offsets_absolute() {
        let mut buf = TerminalOutputBuffer::with_max_size(10);
        buf.push("0123456789");
        let mark = buf.end_offset();
        buf.push("abcde");

        assert!(buf.is_truncated());
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.contents(), "56789abcde");
        assert_eq!(buf.end_offset(), 15);
        assert_eq!(buf.since(mark), "abcde");
    }

    #[test]
    fn test_since_before_retained_window_returns_everything() {
        let mut buf = TerminalOutputBuffer::with_max_size(4);
        buf.push("abcdefgh");
        assert_eq!(buf.since(0), "efgh");
    }

    #[test]
    fn test_truncation_never_splits_a_character() {
        let mut buf = TerminalOutputBuffer::with_max_size(5);
        buf.push("ééé");
        // 6 bytes; dropping one byte would split the first character
        assert_eq!(buf.contents(), "éé");
        assert!(buf.size() <= 5);
    }

    #[test]
    fn test_clear_moves_start_forward() {
        let mut buf = TerminalOutputBuffer::with_max_size(100);
        buf.push("abc");
        buf.clear();
        assert_eq!(buf.end_offset(), 3);
        buf.push("d");
        assert_eq!(buf.since(3), "d");
    }
}
