//! Reassembles raw terminal output into lines.
//!
//! Boundaries are `\n`, `\r` and `\r\n` (one boundary). A pending remainder
//! that ends like a prompt (`:` or `?`, ignoring trailing blanks) is flushed
//! immediately, since interactive prompts rarely end with a newline.
//! Blank lines are dropped.

use std::borrow::Cow;

/// One framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedLine {
    pub text: String,
    /// Fragments of the same terminal line flushed by earlier reads.
    pub flushed_before: String,
    /// Flushed before its line ended.
    pub partial: bool,
}

impl FramedLine {
    /// The terminal line up to and including this piece.
    pub fn whole(&self) -> Cow<'_, str> {
        if self.flushed_before.is_empty() {
            Cow::Borrowed(&self.text)
        } else {
            Cow::Owned(format!("{}{}", self.flushed_before, self.text))
        }
    }
}

#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    flushed: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for a boundary.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Forget the fragments flushed so far on the current line.
    pub fn clear_flushed(&mut self) {
        self.flushed.clear();
    }

    /// Feed one read's worth of bytes; returns every line it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FramedLine> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let end = start + offset;
            let flushed_before = std::mem::take(&mut self.flushed);
            if let Some(text) = line_text(&self.pending[start..end]) {
                lines.push(FramedLine {
                    text,
                    flushed_before,
                    partial: false,
                });
            }
            start = end + 1;
            if self.pending[end] == b'\r' && self.pending.get(start) == Some(&b'\n') {
                start += 1;
            }
        }
        self.pending.drain(..start);

        if is_dangling_prompt(&self.pending) {
            if let Some(text) = line_text(&self.pending) {
                let flushed_before = self.flushed.clone();
                self.flushed.push_str(&text);
                lines.push(FramedLine {
                    text,
                    flushed_before,
                    partial: true,
                });
            }
            self.pending.clear();
        }
        lines
    }

    /// Flush whatever is left, trimmed. Used once the child is gone.
    pub fn finish(&mut self) -> Option<String> {
        self.flushed.clear();
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn line_text(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    (!line.trim().is_empty()).then(|| line.into_owned())
}

fn is_dangling_prompt(pending: &[u8]) -> bool {
    let trimmed = pending.trim_ascii_end();
    matches!(trimmed.last(), Some(b':' | b'?'))
}
