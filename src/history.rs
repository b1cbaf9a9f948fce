//! Lines entered during this session.

/// Default number of lines kept.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Session history with a fixed capacity. Once full, further lines are not recorded.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<String>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_SIZE)
    }
}

impl History {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    /// Records `line`. Returns `false` if it was empty or the history is full.
    pub fn record(&mut self, line: &str) -> bool {
        if line.is_empty() || self.entries.len() >= self.limit {
            return false;
        }
        self.entries.push(line.to_string());
        true
    }

    /// Entries numbered from 1, oldest first.
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, line)| (i + 1, line.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
