//! Non-visual view state.

pub mod layout;

pub use layout::{Layout, MOBILE_BREAKPOINT_PX, Pane, ViewState};
