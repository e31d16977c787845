/// Drops escape sequences and control bytes, keeping printable text.
pub fn strip_ansi(text: &str) -> String {
    strip_ansi_escapes::strip_str(text)
}

/// Splits raw terminal chunks into lines, holding back an unterminated tail
/// until the next chunk arrives.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: String,
    last_was_cr: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines completed by `chunk`, already stripped of escapes.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for ch in chunk.chars() {
            match ch {
                '\n' if self.last_was_cr => {
                    self.last_was_cr = false;
                }
                '\n' | '\r' => {
                    self.last_was_cr = ch == '\r';
                    let raw = std::mem::take(&mut self.pending);
                    lines.push(strip_ansi(&raw));
                }
                _ => {
                    self.last_was_cr = false;
                    self.pending.push(ch);
                }
            }
        }
        lines
    }

    /// Unterminated text of the current line, escapes stripped
    pub fn pending(&self) -> String {
        strip_ansi(&self.pending)
    }

    pub fn finish(&mut self) -> Option<String> {
        self.last_was_cr = false;
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(strip_ansi(&raw))
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.last_was_cr = false;
    }
}
