//! Scroll interaction: background-refresh pause and auto-scroll decisions.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the thread viewport as reported by the UI.
#[derive(Clone, Debug)]
pub struct ScrollTracker {
    pause: Duration,
    last_scroll: Option<Instant>,
    at_bottom: bool,
    unseen: usize,
    scroll_requested: bool,
}

impl ScrollTracker {
    /// Create a tracker that pauses refresh for `pause` after each scroll.
    #[must_use]
    pub const fn new(pause: Duration) -> Self {
        Self {
            pause,
            last_scroll: None,
            at_bottom: true,
            unseen: 0,
            scroll_requested: false,
        }
    }

    /// Record a user scroll and whether the viewport now sits at the bottom.
    pub fn on_scroll(&mut self, at_bottom: bool) {
        self.last_scroll = Some(Instant::now());
        self.at_bottom = at_bottom;
        if at_bottom {
            self.unseen = 0;
        }
    }

    /// Background refresh is paused while the user scrolled recently.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.last_scroll
            .is_some_and(|at| at.elapsed() < self.pause)
    }

    /// Whether the viewport is at the bottom.
    #[must_use]
    pub const fn at_bottom(&self) -> bool {
        self.at_bottom
    }

    /// New content arrived; returns whether the view should scroll to it.
    pub fn on_new_content(&mut self) -> bool {
        self.on_new_messages(1)
    }

    /// `count` messages arrived at once, e.g. from a poll.
    ///
    /// At the bottom this records a scroll request for [`Self::take_scroll_request`];
    /// scrolled up, the messages count as unseen.
    pub fn on_new_messages(&mut self, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        if self.at_bottom {
            self.scroll_requested = true;
            true
        } else {
            self.unseen += count;
            false
        }
    }

    /// Whether the view owes a scroll to the bottom; clears the request.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_requested)
    }

    /// Messages that arrived while scrolled up.
    #[must_use]
    pub const fn unseen(&self) -> usize {
        self.unseen
    }

    /// Forget everything, e.g. when another conversation is selected.
    pub fn reset(&mut self) {
        self.last_scroll = None;
        self.at_bottom = true;
        self.unseen = 0;
        self.scroll_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_expires() {
        let mut tracker = ScrollTracker::new(Duration::from_secs(8));
        assert!(!tracker.is_paused());

        tracker.on_scroll(false);
        assert!(tracker.is_paused());

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(tracker.is_paused());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!tracker.is_paused());
    }

    #[test]
    fn test_auto_scroll_only_at_bottom() {
        let mut tracker = ScrollTracker::new(Duration::from_secs(8));
        assert!(tracker.on_new_content());

        tracker.on_scroll(false);
        assert!(!tracker.on_new_content());
        assert!(!tracker.on_new_content());
        assert_eq!(tracker.unseen(), 2);

        tracker.on_scroll(true);
        assert_eq!(tracker.unseen(), 0);
        assert!(tracker.on_new_content());
    }

    #[test]
    fn test_batch_counts_and_scroll_request() {
        let mut tracker = ScrollTracker::new(Duration::from_secs(8));
        assert!(!tracker.on_new_messages(0));
        assert!(!tracker.take_scroll_request());

        assert!(tracker.on_new_messages(3));
        assert!(tracker.take_scroll_request());
        assert!(!tracker.take_scroll_request());

        tracker.on_scroll(false);
        assert!(!tracker.on_new_messages(2));
        assert_eq!(tracker.unseen(), 2);
        assert!(!tracker.take_scroll_request());
    }
}
