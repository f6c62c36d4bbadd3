//! Editor State Interface
//!
//! Structured, read-only views of the editor for frontends, plus version tracking and change
//! notifications.
//!
//! # Overview
//!
//! - **State Queries**: document, caret, viewport and history snapshots
//! - **Version Tracking**: every observable change bumps a version number
//! - **Change Notifications**: subscribers are called with a [`StateChange`] record
//!
//! # Example
//!
//! ```rust
//! use richdoc_core::{Command, EditCommand, EditorStateManager, StateChangeType};
//! use std::sync::{Arc, Mutex};
//!
//! let mut manager = EditorStateManager::default();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! manager.subscribe(move |change| sink.lock().unwrap().push(change.change_type));
//!
//! manager
//!     .execute(Command::Edit(EditCommand::InsertText {
//!         pos: 0,
//!         text: "Hello".to_string(),
//!         attributes: None,
//!         parse_markup: false,
//!     }))
//!     .unwrap();
//!
//! assert_eq!(manager.get_document_state().len, 5);
//! assert!(seen.lock().unwrap().contains(&StateChangeType::DocumentModified));
//! ```

use crate::attributes::TextAttributes;
use crate::commands::{Command, CommandExecutor, CommandResult, EditorCore};
use crate::config::EditorConfig;
use crate::error::Result;
use crate::history::ActionKind;
use crate::selection::Selection;
use crate::tree::{Alignment, Document, EnvironmentType};
use std::ops::Range;

/// Document state
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    /// Document length in index units
    pub len: usize,
    /// Number of paragraphs, nested ones included
    pub paragraph_count: usize,
    /// Number of sub-environments (the root excluded)
    pub environment_count: usize,
    /// Whether the document differs from its last save point
    pub is_modified: bool,
    /// State version number
    pub version: u64,
}

/// Caret state
#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    /// Caret slot
    pub caret: usize,
    /// Active selection
    pub selection: Option<Selection>,
    /// Type of the environment holding the caret
    pub environment_type: EnvironmentType,
    /// Effective alignment of the caret's paragraph
    pub alignment: Alignment,
    /// Whether the caret's paragraph is a list point
    pub list_point: bool,
    /// Attributes typed text would get at the caret
    pub typing_attributes: Option<TextAttributes>,
}

/// Viewport state
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    /// Root content width in pixels
    pub width: f32,
    /// Viewport height (set by the frontend)
    pub height: Option<f32>,
    /// Scroll offset in pixels
    pub scroll_top: f32,
    /// Height of the laid out document; `None` while layout is dirty
    pub document_height: Option<f32>,
}

/// Undo/redo stack state
#[derive(Debug, Clone, PartialEq)]
pub struct UndoRedoState {
    /// Can undo
    pub can_undo: bool,
    /// Can redo
    pub can_redo: bool,
    /// Undo stack depth
    pub undo_depth: usize,
    /// Redo stack depth
    pub redo_depth: usize,
    /// Kind of the action the next undo reverts
    pub next_undo: Option<ActionKind>,
}

/// State change type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeType {
    /// Document content modified
    DocumentModified,
    /// Caret moved
    CursorMoved,
    /// Selection changed
    SelectionChanged,
    /// Viewport or wrapping changed
    ViewportChanged,
    /// Image loads finished and paragraphs were queued for relayout
    ImagesLoaded,
}

/// State change record
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// Change type
    pub change_type: StateChangeType,
    /// Old version number
    pub old_version: u64,
    /// New version number
    pub new_version: u64,
    /// Affected index range, when known
    pub affected_region: Option<Range<usize>>,
}

impl StateChange {
    /// Create a new state change record without an affected region.
    pub fn new(change_type: StateChangeType, old_version: u64, new_version: u64) -> Self {
        Self {
            change_type,
            old_version,
            new_version,
            affected_region: None,
        }
    }

    /// Attach the affected index range to this change record.
    pub fn with_region(mut self, region: Range<usize>) -> Self {
        self.affected_region = Some(region);
        self
    }
}

/// Complete editor state snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    /// Document state
    pub document: DocumentState,
    /// Caret state
    pub cursor: CursorState,
    /// Viewport state
    pub viewport: ViewportState,
    /// Undo/redo state
    pub undo_redo: UndoRedoState,
}

/// State change callback function type
pub type StateChangeCallback = Box<dyn FnMut(&StateChange) + Send>;

/// Editor state manager
///
/// Wraps a [`CommandExecutor`] and turns the effect of every command into versioned change
/// notifications:
///
/// 1. the frontend executes commands via [`execute()`](EditorStateManager::execute),
/// 2. the manager compares revision, caret and selection before and after,
/// 3. for each observed change it bumps the version and calls the subscribers,
/// 4. the frontend pulls whatever `get_*_state()` snapshots it needs.
///
/// Commands that fail, or succeed without changing anything, leave the version alone.
pub struct EditorStateManager {
    executor: CommandExecutor,
    state_version: u64,
    callbacks: Vec<StateChangeCallback>,
    scroll_top: f32,
    viewport_height: Option<f32>,
}

impl Default for EditorStateManager {
    fn default() -> Self {
        Self::new(CommandExecutor::default())
    }
}

impl EditorStateManager {
    /// Create a new state manager around an executor
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            state_version: 0,
            callbacks: Vec::new(),
            scroll_top: 0.0,
            viewport_height: None,
        }
    }

    /// Manager over an existing document
    pub fn with_document(document: Document, config: EditorConfig) -> Self {
        Self::new(CommandExecutor::with_document(document, config))
    }

    /// The wrapped executor
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// The wrapped executor, mutably. Call [`mark_modified`](Self::mark_modified) after
    /// changing state through it.
    pub fn executor_mut(&mut self) -> &mut CommandExecutor {
        &mut self.executor
    }

    /// Get a reference to the Editor Core
    pub fn editor(&self) -> &EditorCore {
        self.executor.editor()
    }

    /// Execute a command and notify subscribers of what it changed.
    pub fn execute(&mut self, command: Command) -> Result<CommandResult> {
        let revision = self.executor.revision();
        let caret = self.executor.caret();
        let selection = self.executor.selection();
        let width = self.executor.editor().config().viewport_width;
        let wrap = self.executor.editor().config().wrap_mode;

        let result = self.executor.execute(command)?;

        if self.executor.revision() != revision {
            let region = match &result {
                CommandResult::Range(range) => Some(range.clone()),
                _ => None,
            };
            self.bump(StateChangeType::DocumentModified, region);
        }
        if self.executor.selection() != selection {
            self.bump(StateChangeType::SelectionChanged, None);
        } else if self.executor.caret() != caret {
            self.bump(StateChangeType::CursorMoved, None);
        }
        let config = self.executor.editor().config();
        if config.viewport_width != width || config.wrap_mode != wrap {
            self.bump(StateChangeType::ViewportChanged, None);
        }
        Ok(result)
    }

    /// Apply finished image loads; notifies when any paragraph needs relayout.
    pub fn poll_image_loads(&mut self) -> usize {
        let touched = self.executor.poll_image_loads();
        if touched > 0 {
            self.bump(StateChangeType::ImagesLoaded, None);
        }
        touched
    }

    /// Get current version number
    pub fn version(&self) -> u64 {
        self.state_version
    }

    /// Set the viewport height
    pub fn set_viewport_height(&mut self, height: f32) {
        self.viewport_height = Some(height);
    }

    /// Set the scroll offset
    pub fn set_scroll_top(&mut self, scroll_top: f32) {
        let old = self.scroll_top;
        self.scroll_top = scroll_top.max(0.0);
        if old != self.scroll_top {
            self.notify(StateChange::new(
                StateChangeType::ViewportChanged,
                self.state_version,
                self.state_version,
            ));
        }
    }

    /// Get the complete state
    pub fn get_full_state(&self) -> EditorState {
        EditorState {
            document: self.get_document_state(),
            cursor: self.get_cursor_state(),
            viewport: self.get_viewport_state(),
            undo_redo: self.get_undo_redo_state(),
        }
    }

    /// Get document state
    pub fn get_document_state(&self) -> DocumentState {
        let doc = self.executor.document();
        DocumentState {
            len: doc.len(),
            paragraph_count: doc.paragraph_count(),
            environment_count: doc.environment_count(),
            is_modified: !self.executor.is_clean(),
            version: self.state_version,
        }
    }

    /// Get caret state
    pub fn get_cursor_state(&self) -> CursorState {
        let caret = self.executor.caret();
        let doc = self.executor.document();
        CursorState {
            caret,
            selection: self.executor.selection(),
            environment_type: self
                .executor
                .environment_type_at(caret)
                .unwrap_or(EnvironmentType::Root),
            alignment: self.executor.alignment_at(caret).unwrap_or(Alignment::Left),
            list_point: self.executor.is_list_point_at(caret).unwrap_or(false),
            typing_attributes: doc.typing_attributes(caret).map(|a| (*a).clone()),
        }
    }

    /// Get viewport state
    pub fn get_viewport_state(&self) -> ViewportState {
        let editor = self.executor.editor();
        let layout = editor.layout();
        ViewportState {
            width: editor.config().viewport_width,
            height: self.viewport_height,
            scroll_top: self.scroll_top,
            document_height: (!layout.is_dirty())
                .then(|| layout.document_height(editor.document())),
        }
    }

    /// Get undo/redo state
    pub fn get_undo_redo_state(&self) -> UndoRedoState {
        let history = self.executor.history();
        UndoRedoState {
            can_undo: history.can_undo(),
            can_redo: history.can_redo(),
            undo_depth: history.undo_len(),
            redo_depth: history.redo_len(),
            next_undo: history.next_undo_kind(),
        }
    }

    /// Subscribe to state change notifications
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&StateChange) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Check if state has changed since a version
    pub fn has_changed_since(&self, version: u64) -> bool {
        self.state_version > version
    }

    /// Record a change made through [`executor_mut`](Self::executor_mut)
    pub fn mark_modified(&mut self, change_type: StateChangeType) {
        self.bump(change_type, None);
    }

    /// Mark the document as saved
    pub fn mark_saved(&mut self) {
        self.executor.mark_clean();
    }

    fn bump(&mut self, change_type: StateChangeType, region: Option<Range<usize>>) {
        let old_version = self.state_version;
        self.state_version += 1;
        let mut change = StateChange::new(change_type, old_version, self.state_version);
        if let Some(region) = region {
            change = change.with_region(region);
        }
        tracing::trace!(?change_type, version = self.state_version, "state changed");
        self.notify(change);
    }

    fn notify(&mut self, change: StateChange) {
        for callback in &mut self.callbacks {
            callback(&change);
        }
    }
}
