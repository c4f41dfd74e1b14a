//! Selected-message cursor
//!
//! Up/down input moves a cursor over the rendered list. Commands typed without
//! an explicit position apply to the selected message. The cursor knows
//! nothing about the messages themselves, only the list length.

/// Cursor over the rendered message list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    selected: Option<usize>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Move towards older messages; from nothing, select the newest
    pub fn up(&mut self, len: usize) -> Option<usize> {
        self.selected = match (self.selected, len) {
            (_, 0) => None,
            (None, len) => Some(len - 1),
            (Some(i), len) => Some(i.min(len - 1).saturating_sub(1)),
        };
        self.selected
    }

    /// Move towards newer messages, stopping at the newest
    pub fn down(&mut self, len: usize) -> Option<usize> {
        self.selected = match (self.selected, len) {
            (_, 0) | (None, _) => None,
            (Some(i), len) => Some((i + 1).min(len - 1)),
        };
        self.selected
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Keep the cursor inside a list that may have shrunk
    pub fn clamp(&mut self, len: usize) -> Option<usize> {
        self.selected = match (self.selected, len) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => None,
        };
        self.selected
    }

    pub fn is_selected(&self, position: usize) -> bool {
        self.selected == Some(position)
    }
}
