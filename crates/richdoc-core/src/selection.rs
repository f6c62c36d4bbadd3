//! Selections and caret state.
//!
//! A [`Selection`] spans two caret slots in global index units. [`CaretState`] pairs the caret
//! with an optional selection, the shape history records store around each action.

use std::ops::Range;

/// Selection direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionDirection {
    /// Head after anchor
    Forward,
    /// Head before anchor
    Backward,
}

/// A selection between two caret slots. `head` is where the caret is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Fixed end
    pub anchor: usize,
    /// Moving end (the caret)
    pub head: usize,
}

impl Selection {
    /// Create a selection
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Ordered `[start, end)` range
    pub fn range(&self) -> Range<usize> {
        self.anchor.min(self.head)..self.anchor.max(self.head)
    }

    /// Whether the selection covers nothing
    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    /// Direction
    pub fn direction(&self) -> SelectionDirection {
        if self.anchor <= self.head {
            SelectionDirection::Forward
        } else {
            SelectionDirection::Backward
        }
    }

    /// Whether `pos` lies within the selection, both ends included
    pub fn contains_inclusive(&self, pos: usize) -> bool {
        let range = self.range();
        range.start <= pos && pos <= range.end
    }
}

/// Caret plus optional selection, as captured by history records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaretState {
    /// Caret slot
    pub caret: usize,
    /// Active selection
    pub selection: Option<Selection>,
}

impl CaretState {
    /// A bare caret
    pub fn at(caret: usize) -> Self {
        Self {
            caret,
            selection: None,
        }
    }
}

/// Move a caret slot across an edit that replaced `[start, old_end)` with `new_len` units.
///
/// Slots at or past the old end move by the length delta; slots inside the replaced range
/// collapse to `start`.
pub fn shift_position(pos: usize, start: usize, old_end: usize, new_len: usize) -> usize {
    if old_end > start && pos >= old_end {
        pos - (old_end - start) + new_len
    } else if pos > start && pos < old_end {
        start
    } else if pos > start {
        pos + new_len
    } else {
        pos
    }
}

/// [`shift_position`] applied to both ends of a selection.
pub fn shift_selection(selection: Selection, start: usize, old_end: usize, new_len: usize) -> Selection {
    Selection {
        anchor: shift_position(selection.anchor, start, old_end, new_len),
        head: shift_position(selection.head, start, old_end, new_len),
    }
}
