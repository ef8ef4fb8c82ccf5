//! Message cache and the open chat thread.

pub mod cache;
pub mod grouping;
pub mod reducer;
pub mod scroll;
pub mod session;
pub mod thread;

pub use cache::{CacheStats, MessageCache};
pub use grouping::{DateGroup, date_label, group_by_date};
pub use reducer::{Applied, apply_message, reconcile};
pub use scroll::ScrollTracker;
pub use session::{ChatSession, SelectionToken, SendOutcome};
pub use thread::{ThreadState, ThreadStatus};
