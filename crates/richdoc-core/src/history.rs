//! Undo/redo history.
//!
//! An [`Action`] stores two explicit part lists captured when the edit was made: `forward`
//! replays the edit, `inverse` restores the state before it. Each [`ActionPart`] only knows how
//! to apply itself. [`Action::perform`] is a two-state flip-flop: it undoes while the action is
//! in [`ActionState::Undo`], redoes while it is in [`ActionState::Redo`], and flips the state.
//!
//! [`History`] keeps two bounded stacks. A [`HistoryCache`] buffers the actions of a logical
//! operation and folds them into a single compound action.

use crate::error::{DocumentError, Result};
use crate::fragment::ParagraphData;
use crate::selection::CaretState;
use crate::tree::{EnvPath, EnvironmentKind};
use std::collections::VecDeque;
use std::ops::Range;

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// One forward replay step.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPart {
    /// Replace `remove` paragraphs of an environment starting at slot `index`.
    ReplaceParagraphs {
        /// Environment addressed by its path from the root.
        environment: EnvPath,
        /// First paragraph slot.
        index: usize,
        /// Number of paragraphs removed.
        remove: usize,
        /// Paragraphs inserted in their place.
        insert: Vec<ParagraphData>,
    },
    /// Change the kind of a sub-environment.
    SetEnvironmentKind {
        /// Environment addressed by its path from the root.
        environment: EnvPath,
        /// New kind.
        kind: EnvironmentKind,
    },
}

/// Something history parts can be applied to.
pub trait ActionTarget {
    /// Apply one part.
    fn apply_part(&mut self, part: &ActionPart) -> Result<()>;
    /// Put caret and selection back.
    fn restore_caret(&mut self, caret: &CaretState);
}

/// Direction the next [`Action::perform`] call takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// The edit is applied; performing undoes it.
    Undo,
    /// The edit is undone; performing redoes it.
    Redo,
}

/// User-visible category of an action (menu labels, grouping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Text typed or inserted.
    InsertText,
    /// Text removed.
    RemoveText,
    /// Image inserted.
    InsertImage,
    /// Paragraph break inserted.
    NewLine,
    /// Environment inserted.
    AddEnvironment,
    /// Text attributes changed.
    Attributes,
    /// Paragraph alignment changed.
    Alignment,
    /// Environment retyped.
    EnvironmentKind,
    /// Fragment pasted.
    Paste,
    /// Several actions folded together.
    Compound,
}

/// A reversible edit.
#[derive(Debug, Clone)]
pub struct Action {
    kind: ActionKind,
    range: Range<usize>,
    state: ActionState,
    forward: Vec<ActionPart>,
    inverse: Vec<ActionPart>,
    caret_before: CaretState,
    caret_after: CaretState,
}

impl Action {
    /// A freshly applied action (state `Undo`).
    pub fn new(
        kind: ActionKind,
        range: Range<usize>,
        forward: Vec<ActionPart>,
        inverse: Vec<ActionPart>,
        caret_before: CaretState,
        caret_after: CaretState,
    ) -> Self {
        Self {
            kind,
            range,
            state: ActionState::Undo,
            forward,
            inverse,
            caret_before,
            caret_after,
        }
    }

    /// Fold `actions` (in the order they were applied) into one action.
    pub fn compound(actions: Vec<Action>) -> Option<Action> {
        let first = actions.first()?;
        let caret_before = first.caret_before.clone();
        let mut range = first.range.clone();
        let mut forward = Vec::new();
        let mut inverse = Vec::new();
        let mut caret_after = caret_before.clone();
        for action in &actions {
            range.start = range.start.min(action.range.start);
            range.end = range.end.max(action.range.end);
            forward.extend(action.forward.iter().cloned());
            caret_after = action.caret_after.clone();
        }
        for action in actions.iter().rev() {
            inverse.extend(action.inverse.iter().cloned());
        }
        Some(Action::new(
            ActionKind::Compound,
            range,
            forward,
            inverse,
            caret_before,
            caret_after,
        ))
    }

    /// Category.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Global range touched by the edit (in post-edit coordinates).
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Current state.
    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Forward parts.
    pub fn forward(&self) -> &[ActionPart] {
        &self.forward
    }

    /// Inverse parts.
    pub fn inverse(&self) -> &[ActionPart] {
        &self.inverse
    }

    /// Perform the opposite of the current state and flip it.
    ///
    /// When a part fails, the parts already applied are reverted and the state is kept.
    pub fn perform<T: ActionTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        let (parts, opposite, caret, next) = match self.state {
            ActionState::Undo => {
                (&self.inverse, &self.forward, &self.caret_before, ActionState::Redo)
            }
            ActionState::Redo => {
                (&self.forward, &self.inverse, &self.caret_after, ActionState::Undo)
            }
        };
        for (applied, part) in parts.iter().enumerate() {
            if let Err(err) = target.apply_part(part) {
                roll_back(target, parts, opposite, applied);
                return Err(err);
            }
        }
        target.restore_caret(caret);
        self.state = next;
        Ok(())
    }
}

/// Revert the first `applied` parts of `parts`. Part `i` of one list is reverted by part
/// `n - 1 - i` of the other.
fn roll_back<T: ActionTarget + ?Sized>(
    target: &mut T,
    parts: &[ActionPart],
    opposite: &[ActionPart],
    applied: usize,
) {
    if parts.len() != opposite.len() {
        tracing::error!(
            parts = parts.len(),
            opposite = opposite.len(),
            "unpaired history parts, cannot roll back"
        );
        return;
    }
    for part in &opposite[opposite.len() - applied..] {
        if let Err(err) = target.apply_part(part) {
            tracing::error!(error = %err, "history rollback failed");
            return;
        }
    }
}

/// Bounded undo/redo stacks.
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Action>,
    redo: Vec<Action>,
    capacity: usize,
    /// `undo.len()` at the last save point. May exceed `undo.len()` while the save point sits
    /// in the redo stack.
    clean_index: Option<usize>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl History {
    /// Create a history keeping at most `capacity` undo steps.
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            capacity: capacity.max(1),
            clean_index: Some(0),
        }
    }

    /// Maximum undo depth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the maximum undo depth, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.undo.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Record an applied action. Clears the redo stack.
    pub fn push(&mut self, action: Action) {
        if !self.redo.is_empty() {
            if let Some(clean) = self.clean_index
                && clean > self.undo.len()
            {
                self.clean_index = None;
            }
            self.redo.clear();
        }
        if self.undo.len() >= self.capacity {
            self.evict_oldest();
        }
        self.undo.push_back(action);
    }

    /// Undo the newest action.
    ///
    /// A failed replay leaves the action on the undo stack.
    pub fn undo<T: ActionTarget + ?Sized>(&mut self, target: &mut T) -> Result<Range<usize>> {
        let action = self
            .undo
            .back_mut()
            .ok_or(DocumentError::IllegalState("nothing to undo"))?;
        if let Err(err) = action.perform(target) {
            tracing::warn!(error = %err, "undo failed to replay");
            return Err(err);
        }
        let range = action.range();
        if let Some(action) = self.undo.pop_back() {
            self.redo.push(action);
        }
        Ok(range)
    }

    /// Redo the most recently undone action.
    pub fn redo<T: ActionTarget + ?Sized>(&mut self, target: &mut T) -> Result<Range<usize>> {
        let action = self
            .redo
            .last_mut()
            .ok_or(DocumentError::IllegalState("nothing to redo"))?;
        if let Err(err) = action.perform(target) {
            tracing::warn!(error = %err, "redo failed to replay");
            return Err(err);
        }
        let range = action.range();
        if let Some(action) = self.redo.pop() {
            self.undo.push_back(action);
        }
        Ok(range)
    }

    /// Number of undoable actions.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of redoable actions.
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Whether undo is possible.
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether redo is possible.
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Kind of the action the next undo would revert.
    pub fn next_undo_kind(&self) -> Option<ActionKind> {
        self.undo.back().map(Action::kind)
    }

    /// Kind of the action the next redo would replay.
    pub fn next_redo_kind(&self) -> Option<ActionKind> {
        self.redo.last().map(Action::kind)
    }

    /// Whether the current state equals the last save point.
    pub fn is_clean(&self) -> bool {
        self.clean_index == Some(self.undo.len())
    }

    /// Make the current state the save point.
    pub fn mark_clean(&mut self) {
        self.clean_index = Some(self.undo.len());
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.clean_index = Some(0);
    }

    fn evict_oldest(&mut self) {
        if self.undo.pop_front().is_some() {
            self.clean_index = match self.clean_index {
                Some(0) | None => None,
                Some(clean) => Some(clean - 1),
            };
        }
    }
}

/// Buffers actions of one logical operation; nested `begin`/`end` pairs are flattened.
#[derive(Debug, Clone, Default)]
pub struct HistoryCache {
    depth: usize,
    actions: Vec<Action>,
}

impl HistoryCache {
    /// Open a (possibly nested) group.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Whether a group is open.
    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// Buffer an action of the open group.
    pub fn record(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Close a group. Returns the folded action once the outermost group closes.
    pub fn end(&mut self) -> Result<Option<Action>> {
        if self.depth == 0 {
            return Err(DocumentError::IllegalState("no compound edit is open"));
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(None);
        }
        let actions = std::mem::take(&mut self.actions);
        Ok(match actions.len() {
            0 => None,
            1 => actions.into_iter().next(),
            _ => Action::compound(actions),
        })
    }

    /// Close every open group and hand back the buffered actions, newest last.
    pub fn abort(&mut self) -> Vec<Action> {
        self.depth = 0;
        std::mem::take(&mut self.actions)
    }

    /// Number of buffered actions; pass it to [`HistoryCache::abort_to`] later.
    pub fn mark(&self) -> usize {
        self.actions.len()
    }

    /// Close the innermost group and hand back the actions buffered after `mark`, newest last.
    /// Actions of enclosing groups stay buffered.
    pub fn abort_to(&mut self, mark: usize) -> Vec<Action> {
        self.depth = self.depth.saturating_sub(1);
        let mark = mark.min(self.actions.len());
        self.actions.split_off(mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Target that records a log of applied parts as retyped-environment paths.
    #[derive(Default)]
    struct Log {
        applied: Vec<usize>,
        caret: usize,
    }

    /// Tag of a part the [`Log`] target refuses.
    const BROKEN: usize = 99;

    impl ActionTarget for Log {
        fn apply_part(&mut self, part: &ActionPart) -> Result<()> {
            if let ActionPart::SetEnvironmentKind { environment, .. } = part {
                if environment.0[0] == BROKEN {
                    return Err(DocumentError::IllegalState("missing environment"));
                }
                self.applied.push(environment.0[0]);
            }
            Ok(())
        }

        fn restore_caret(&mut self, caret: &CaretState) {
            self.caret = caret.caret;
        }
    }

    fn part(tag: usize) -> ActionPart {
        ActionPart::SetEnvironmentKind {
            environment: EnvPath(vec![tag]),
            kind: EnvironmentKind::quote(None),
        }
    }

    fn action(fwd: usize, inv: usize) -> Action {
        Action::new(
            ActionKind::InsertText,
            0..1,
            vec![part(fwd)],
            vec![part(inv)],
            CaretState::at(fwd),
            CaretState::at(inv),
        )
    }

    #[test]
    fn test_perform_flips_state() {
        let mut log = Log::default();
        let mut a = action(1, 2);
        assert_eq!(a.state(), ActionState::Undo);
        a.perform(&mut log).unwrap();
        assert_eq!(a.state(), ActionState::Redo);
        a.perform(&mut log).unwrap();
        assert_eq!(a.state(), ActionState::Undo);
        assert_eq!(log.applied, vec![2, 1]);
    }

    #[test]
    fn test_compound_reverses_inverses() {
        let mut log = Log::default();
        let mut a = Action::compound(vec![action(1, 10), action(2, 20), action(3, 30)]).unwrap();
        a.perform(&mut log).unwrap();
        assert_eq!(log.applied, vec![30, 20, 10]);
        assert_eq!(log.caret, 1);
        log.applied.clear();
        a.perform(&mut log).unwrap();
        assert_eq!(log.applied, vec![1, 2, 3]);
        assert_eq!(log.caret, 30);
    }

    #[test]
    fn test_history_bound_and_branching() {
        let mut log = Log::default();
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(action(i, i));
        }
        assert_eq!(history.undo_len(), 3);

        history.undo(&mut log).unwrap();
        assert_eq!(history.redo_len(), 1);
        history.push(action(9, 9));
        assert_eq!(history.redo_len(), 0);
        assert!(history.redo(&mut log).is_err());
    }

    #[test]
    fn test_failed_undo_reverts_applied_parts() {
        let mut log = Log::default();
        let mut history = History::default();
        history.push(Action::compound(vec![action(1, BROKEN), action(2, 20)]).unwrap());

        assert!(history.undo(&mut log).is_err());
        // 20 was applied before the failure, then reverted by its forward counterpart.
        assert_eq!(log.applied, vec![20, 2]);
        assert_eq!(log.caret, 0);
        assert_eq!(history.undo_len(), 1);
        assert_eq!(history.redo_len(), 0);
    }

    #[test]
    fn test_failed_redo_keeps_action_redoable() {
        let mut log = Log::default();
        let mut history = History::default();
        history.push(Action::compound(vec![action(3, 30), action(BROKEN, 40)]).unwrap());
        history.undo(&mut log).unwrap();
        assert_eq!(log.applied, vec![40, 30]);
        log.applied.clear();

        assert!(history.redo(&mut log).is_err());
        assert_eq!(log.applied, vec![3, 30]);
        assert_eq!(history.redo_len(), 1);
        assert_eq!(history.undo_len(), 0);
        assert!(history.can_redo());
    }

    #[test]
    fn test_empty_history_is_illegal_state() {
        let mut log = Log::default();
        let mut history = History::default();
        assert_eq!(
            history.undo(&mut log).unwrap_err(),
            DocumentError::IllegalState("nothing to undo")
        );
    }

    #[test]
    fn test_cache_nesting() {
        let mut cache = HistoryCache::default();
        cache.begin();
        cache.begin();
        cache.record(action(1, 1));
        assert!(cache.end().unwrap().is_none());
        cache.record(action(2, 2));
        let folded = cache.end().unwrap().unwrap();
        assert_eq!(folded.kind(), ActionKind::Compound);
        assert_eq!(folded.forward().len(), 2);
        assert!(cache.end().is_err());
    }

    #[test]
    fn test_abort_to_keeps_outer_actions() {
        let mut cache = HistoryCache::default();
        cache.begin();
        cache.record(action(1, 1));
        cache.begin();
        let mark = cache.mark();
        cache.record(action(2, 2));
        cache.record(action(3, 3));
        let rolled_back = cache.abort_to(mark);
        assert_eq!(rolled_back.len(), 2);
        assert!(cache.is_open());
        let folded = cache.end().unwrap().unwrap();
        assert_eq!(folded.kind(), ActionKind::InsertText);
    }
}
