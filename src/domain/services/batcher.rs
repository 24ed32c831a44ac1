#[cfg(test)]
#[path = "batcher_test.rs"]
mod tests;

use std::time::Duration;

use tokio::time::Instant;

/// Collects decoded text and decides when it is worth pushing to the
/// transcript: once enough characters are pending, or once the interval since
/// the last flush has passed.
#[derive(Debug)]
pub struct TextBatcher {
    pending: String,
    pending_chars: usize,
    accumulated: String,
    threshold: usize,
    interval: Duration,
    last_flush: Instant,
}

impl TextBatcher {
    pub fn new(threshold: usize, interval: Duration) -> TextBatcher {
        return TextBatcher {
            pending: String::new(),
            pending_chars: 0,
            accumulated: String::new(),
            threshold,
            interval,
            last_flush: Instant::now(),
        };
    }

    /// Queues text, returning true once the size threshold is reached.
    pub fn push(&mut self, text: &str) -> bool {
        self.pending.push_str(text);
        self.pending_chars += text.chars().count();

        return self.pending_chars >= self.threshold;
    }

    pub fn has_pending(&self) -> bool {
        return !self.pending.is_empty();
    }

    /// When the pending text must be flushed at the latest.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.has_pending() {
            return None;
        }

        return Some(self.last_flush + self.interval);
    }

    /// Moves pending text into the accumulated total and returns the total.
    /// Returns `None` without touching anything when nothing is pending.
    pub fn flush(&mut self) -> Option<&str> {
        if !self.has_pending() {
            return None;
        }

        self.accumulated.push_str(&self.pending);
        self.pending.clear();
        self.pending_chars = 0;
        self.last_flush = Instant::now();

        return Some(&self.accumulated);
    }

    pub fn accumulated(&self) -> &str {
        return &self.accumulated;
    }
}
