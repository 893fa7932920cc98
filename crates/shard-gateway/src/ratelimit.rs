//! Token bucket for outbound frames
//!
//! The bucket does not own a timer. The caller hands it the current instant and polls
//! again at [`RateLimiter::next_refill`]; items come back in the order they were queued.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-window token bucket holding a FIFO of items waiting for a token
#[derive(Debug)]
pub struct RateLimiter<T> {
    capacity: u32,
    window: Duration,
    tokens: u32,
    /// When the first token of the current window was spent
    window_start: Option<Instant>,
    queue: VecDeque<T>,
}

impl<T> RateLimiter<T> {
    /// Create a full bucket
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            tokens: capacity,
            window_start: None,
            queue: VecDeque::new(),
        }
    }

    /// Queue an item and return everything that may be sent now, oldest first
    ///
    /// The returned items always start with earlier queued ones; `item` is only
    /// released once nothing is waiting ahead of it.
    pub fn queue(&mut self, item: T, now: Instant) -> Vec<T> {
        self.queue.push_back(item);
        self.release(now)
    }

    /// Refill if the window has passed and release as many waiting items as tokens allow
    pub fn release(&mut self, now: Instant) -> Vec<T> {
        self.refill(now);

        let mut released = Vec::new();
        while self.tokens > 0 {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            self.tokens -= 1;
            self.window_start.get_or_insert(now);
            released.push(item);
        }
        released
    }

    /// When waiting items can next be released; `None` if nothing waits
    #[must_use]
    pub fn next_refill(&self) -> Option<Instant> {
        if self.queue.is_empty() {
            return None;
        }
        self.window_start.map(|start| start + self.window)
    }

    /// Drop waiting items, keeping the token count
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Items waiting for a token
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Tokens left in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.tokens
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now >= start + self.window {
                self.tokens = self.capacity;
                self.window_start = None;
            }
        }
    }
}
