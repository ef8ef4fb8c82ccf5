//! Pane navigation for the inbox and chat views.

use crate::core::ids::ConversationId;

/// Viewport width below which only one pane is shown.
pub const MOBILE_BREAKPOINT_PX: u32 = 768;

/// Layout class of the viewport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Single pane.
    Mobile,
    /// List and chat side by side.
    Desktop,
}

impl Layout {
    /// Classify a viewport width in CSS pixels.
    #[must_use]
    pub const fn for_width(width: u32) -> Self {
        if width < MOBILE_BREAKPOINT_PX {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

/// A dashboard pane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pane {
    /// Conversation list.
    List,
    /// Open thread.
    Chat,
    /// Visitor info.
    Info,
}

/// Which panes are visible and what is selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewState {
    layout: Layout,
    active: Pane,
    selected: Option<ConversationId>,
    info_open: bool,
}

impl ViewState {
    /// Initial view for a viewport `width` pixels wide.
    #[must_use]
    pub const fn new(width: u32) -> Self {
        Self {
            layout: Layout::for_width(width),
            active: Pane::List,
            selected: None,
            info_open: false,
        }
    }

    /// Current layout.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Pane in focus (the only visible one on mobile).
    #[must_use]
    pub const fn active(&self) -> Pane {
        self.active
    }

    /// Selected conversation.
    #[must_use]
    pub const fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    /// The viewport was resized.
    pub fn resize(&mut self, width: u32) {
        self.layout = Layout::for_width(width);
        if self.layout == Layout::Mobile && self.active != Pane::List && self.selected.is_none() {
            self.active = Pane::List;
        }
    }

    /// A conversation was picked from the list.
    pub fn select(&mut self, id: ConversationId) {
        self.selected = Some(id);
        self.active = Pane::Chat;
    }

    /// Back button: info to chat, chat to list.
    pub fn back(&mut self) {
        match self.active {
            Pane::Info => {
                self.info_open = false;
                self.active = Pane::Chat;
            }
            Pane::Chat => {
                self.active = Pane::List;
                if self.layout == Layout::Mobile {
                    self.selected = None;
                }
            }
            Pane::List => {}
        }
    }

    /// Open or close the visitor info pane.
    pub fn toggle_info(&mut self) {
        if self.selected.is_none() {
            return;
        }
        self.info_open = !self.info_open;
        self.active = if self.info_open { Pane::Info } else { Pane::Chat };
    }

    /// Forget the selection (conversation closed elsewhere, logout).
    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.info_open = false;
        self.active = Pane::List;
    }

    /// Panes to render, left to right.
    #[must_use]
    pub fn visible_panes(&self) -> Vec<Pane> {
        match self.layout {
            Layout::Mobile => vec![self.active],
            Layout::Desktop => {
                let mut panes = vec![Pane::List, Pane::Chat];
                if self.info_open {
                    panes.push(Pane::Info);
                }
                panes
            }
        }
    }
}
