use super::types::*;

pub const DEFAULT_LIVE_BUDGET: usize = 8000;
pub const DEFAULT_LINE_CAP: usize = 400;

/// Client-side log of a login session: a character-budgeted text buffer,
/// a capped list of lines, and the transcript fetched from the server.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    live: String,
    live_chars: usize,
    budget: usize,
    lines: Vec<LogLine>,
    line_cap: usize,
    history: Vec<ServerLogEntry>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_BUDGET, DEFAULT_LINE_CAP)
    }
}

impl LogBuffer {
    pub fn new(budget: usize, line_cap: usize) -> Self {
        Self {
            live: String::new(),
            live_chars: 0,
            budget: budget.max(1),
            lines: Vec::new(),
            line_cap: line_cap.max(1),
            history: Vec::new(),
        }
    }

    pub fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.live.push_str(chunk);
        self.live_chars += chunk.chars().count();

        if self.live_chars > self.budget {
            let excess = self.live_chars - self.budget;
            let cut = self
                .live
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.live.len());
            self.live.drain(..cut);
            self.live_chars = self.budget;
        }
    }

    pub fn append_line(&mut self, line: impl Into<String>) {
        self.push_line(LogDirection::Output, line.into());
    }

    pub fn append_input(&mut self, line: impl Into<String>) {
        self.push_line(LogDirection::Input, line.into());
    }

    /// Past the cap the oldest quarter goes in one drain, so a full log is
    /// not shifted on every append.
    fn push_line(&mut self, direction: LogDirection, text: String) {
        self.lines.push(LogLine { direction, text });
        if self.lines.len() > self.line_cap {
            let keep = self.low_water();
            let excess = self.lines.len() - keep;
            self.lines.drain(..excess);
        }
    }

    fn low_water(&self) -> usize {
        (self.line_cap * 3 / 4).max(1)
    }

    /// Overwrites the server transcript; never merges.
    pub fn replace_history(&mut self, entries: Vec<ServerLogEntry>) {
        self.history = entries;
    }

    pub fn clear_live(&mut self) {
        self.live.clear();
        self.live_chars = 0;
        self.lines.clear();
    }

    pub fn clear(&mut self) {
        self.clear_live();
        self.history.clear();
    }

    pub fn live(&self) -> &str {
        &self.live
    }

    pub fn live_chars(&self) -> usize {
        self.live_chars
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn history(&self) -> &[ServerLogEntry] {
        &self.history
    }
}
