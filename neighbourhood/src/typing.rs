use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Default)]
struct Entry {
    /// When the typing flag was last written.
    flagged_at: Option<Instant>,
    /// Bumped on every keystroke; a pending clear only fires if it still matches.
    generation: u64,
}

/// Client-side typing debouncer keyed by (user, chat).
pub struct TypingTracker {
    entries: Mutex<HashMap<(String, String), Entry>>,
    debounce: Duration,
}

/// Outcome of a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    /// Whether the typing flag should be written now.
    pub write_flag: bool,
    /// Token for the idle timeout scheduled after this keystroke.
    pub generation: u64,
}

impl TypingTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    /// Register a typing action.
    pub fn typing(&self, user_id: &str, chat_id: &str) -> Keystroke {
        let mut guard = self.entries.lock();
        let entry = guard
            .entry((user_id.to_string(), chat_id.to_string()))
            .or_default();
        let now = Instant::now();
        let write_flag = match entry.flagged_at {
            Some(prev) => now.duration_since(prev) >= self.debounce,
            None => true,
        };
        if write_flag {
            entry.flagged_at = Some(now);
        }
        entry.generation += 1;
        Keystroke {
            write_flag,
            generation: entry.generation,
        }
    }

    /// True if no keystroke happened since the one that produced `generation`.
    pub fn is_idle_since(&self, user_id: &str, chat_id: &str, generation: u64) -> bool {
        self.entries
            .lock()
            .get(&(user_id.to_string(), chat_id.to_string()))
            .map_or(true, |e| e.generation == generation)
    }

    /// Forget the flag so the next keystroke writes it again. Returns whether one was set.
    pub fn stop(&self, user_id: &str, chat_id: &str) -> bool {
        let mut guard = self.entries.lock();
        match guard.get_mut(&(user_id.to_string(), chat_id.to_string())) {
            Some(entry) => {
                entry.generation += 1;
                entry.flagged_at.take().is_some()
            }
            None => false,
        }
    }
}
