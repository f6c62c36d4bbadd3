//! Edit engine and command interface.
//!
//! # Overview
//!
//! [`CommandExecutor`] is the single mutation surface of the kernel. Every edit follows the same
//! steps:
//!
//! 1. validate positions and nesting against the live tree,
//! 2. copy the paragraphs the edit touches into an owned window,
//! 3. transform and normalize the window,
//! 4. splice it back, mark the layout dirty and move caret and selection,
//! 5. record the forward and inverse splices as one history action.
//!
//! A failing edit returns before step 4, so the document, caret and history stay untouched.
//!
//! # Example
//!
//! ```rust
//! use richdoc_core::{CommandExecutor, Command, EditCommand, TextAttributes};
//!
//! let mut executor = CommandExecutor::default();
//! executor.insert_text(0, "Hello", None, false).unwrap();
//! executor
//!     .set_attributes(2, 4, TextAttributes::new().with_bold(true))
//!     .unwrap();
//! assert_eq!(executor.attributes_at(3).and_then(|a| a.bold()), Some(true));
//!
//! executor.execute(Command::Edit(EditCommand::Undo)).unwrap();
//! assert_eq!(executor.attributes_at(3).and_then(|a| a.bold()), None);
//! ```

use crate::attributes::{AttributeKey, AttributeTable, TextAttributes};
use crate::config::EditorConfig;
use crate::error::{DocumentError, NestedContent, Result};
use crate::fragment::{
    EnvironmentData, Fragment, ParagraphBody, ParagraphData, Section, strip_paragraphs,
};
use crate::history::{
    Action, ActionKind, ActionPart, ActionTarget, History, HistoryCache,
};
use crate::image::{ImageCache, ImageLoadQueue, ImageLoader, SecImage};
use crate::layout::{
    FontCache, FontMetrics, LayoutContext, LayoutPipeline, MonospaceMetrics, Rect, RefreshStats,
    WrapMode, WrapStrategy, wrap_strategy,
};
use crate::markup::{MarkupExporter, MarkupParser, TextSyntax};
use crate::paint::{HitTestResult, PaintStats, PaintSurface, hit_test, paint};
use crate::position::Placement;
use crate::selection::{CaretState, Selection, shift_position, shift_selection};
use crate::transform::{NormalizeOptions, PropsRule, Window};
use crate::tree::{
    Alignment, Document, EnvId, EnvironmentKind, EnvironmentType, ParaId, ParagraphProps,
};
use std::ops::Range;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

/// Text editing commands
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// Insert text (or markup) at a position
    InsertText {
        /// Caret slot to insert at.
        pos: usize,
        /// Text or markup source.
        text: String,
        /// Attributes of the new runs; `None` continues the attributes at `pos`.
        attributes: Option<TextAttributes>,
        /// Run `text` through the registered markup parser.
        parse_markup: bool,
    },
    /// Remove a range
    RemoveText {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Merge runs that end up next to each other with equal attributes.
        merge_attributes: bool,
    },
    /// Insert an empty sub-environment
    AddEnvironment {
        /// Caret slot to insert at.
        pos: usize,
        /// Kind of the new environment.
        kind: EnvironmentKind,
        /// Mark the environment paragraph as a list point.
        list_point: bool,
        /// Keep an empty paragraph behind the environment.
        trailing_newline: bool,
    },
    /// Move a range into a new sub-environment
    WrapInEnvironment {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Kind of the new environment.
        kind: EnvironmentKind,
        /// Mark the environment paragraph as a list point.
        list_point: bool,
    },
    /// Insert an image
    AddImage {
        /// Caret slot to insert at.
        pos: usize,
        /// The image.
        image: SecImage,
    },
    /// Insert a paragraph break
    AddNewLine {
        /// Caret slot to insert at.
        pos: usize,
        /// Attributes of the break; `None` continues the attributes at `pos`.
        attributes: Option<TextAttributes>,
        /// Alignment of the new paragraph.
        alignment: Alignment,
        /// Whether the new paragraph is a list point.
        list_point: bool,
    },
    /// Patch the attributes of a range
    SetAttributes {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Keys to set; unset keys are left alone.
        attributes: TextAttributes,
    },
    /// Remove attribute keys from a range
    RemoveAttributes {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Keys to remove.
        keys: Vec<AttributeKey>,
    },
    /// Align every paragraph the range touches
    SetLineAlignment {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
        /// New alignment.
        alignment: Alignment,
    },
    /// Retype the environment at a position
    SetEnvironmentKind {
        /// Any caret slot inside the environment.
        pos: usize,
        /// New kind.
        kind: EnvironmentKind,
    },
    /// Remove a range and return it
    Cut {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
    },
    /// Insert a fragment
    Paste {
        /// Caret slot to insert at.
        pos: usize,
        /// Content to insert.
        fragment: Fragment,
    },
    /// Undo the newest action
    Undo,
    /// Redo the newest undone action
    Redo,
}

/// Caret and selection commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCommand {
    /// Move the caret to a slot
    GoTo {
        /// Target caret slot.
        pos: usize,
    },
    /// Move the caret right by index units
    Forward {
        /// Number of units.
        count: usize,
    },
    /// Move the caret left by index units
    Backward {
        /// Number of units.
        count: usize,
    },
    /// Move the caret past the next grapheme cluster
    NextGrapheme,
    /// Move the caret before the previous grapheme cluster
    PreviousGrapheme,
    /// Select a range; the caret goes to `head`
    SetSelection {
        /// Fixed end.
        anchor: usize,
        /// Moving end.
        head: usize,
    },
    /// Move the head of the selection (starting one at the caret if needed)
    ExtendSelection {
        /// New head.
        to: usize,
    },
    /// Drop the selection
    ClearSelection,
    /// Select the whole document
    SelectAll,
}

/// View and query commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewCommand {
    /// Set the root content width
    SetViewportWidth {
        /// Width in pixels.
        width: f32,
    },
    /// Change soft wrapping
    SetWrapMode {
        /// Wrap mode.
        mode: WrapMode,
        /// Columns for char wrapping.
        columns: usize,
    },
    /// Recompute dirty layout
    RefreshLayout,
    /// Render a range as text
    GetText {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Output syntax.
        syntax: TextSyntax,
    },
    /// Copy a range as a fragment
    Copy {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
    },
}

/// Unified command enum
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Text editing commands
    Edit(EditCommand),
    /// Cursor command
    Cursor(CursorCommand),
    /// View commands
    View(ViewCommand),
}

/// Command execution result
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Success, no return value
    Success,
    /// Success, returns text
    Text(String),
    /// Success, returns a caret slot
    Position(usize),
    /// Success, returns the number of index units inserted
    Inserted(usize),
    /// Success, returns a fragment (copy, cut)
    Fragment(Fragment),
    /// Success, returns the range an undo or redo touched
    Range(Range<usize>),
    /// Success, returns layout counters
    Refreshed(RefreshStats),
}

struct EditParts {
    forward: Vec<ActionPart>,
    inverse: Vec<ActionPart>,
    delta: isize,
}

/// Editor state: the document plus everything derived from it.
///
/// `EditorCore` aggregates:
///
/// - **Document**: the environment/paragraph/section tree
/// - **LayoutPipeline**: cached lines and offsets with a dirty work queue
/// - **AttributeTable / FontCache**: attribute identities and the fonts derived from them
/// - **ImageCache**: sizes of loaded images
/// - **Caret & Selection**
///
/// It applies history parts ([`ActionTarget`]) but records nothing itself; edits go through
/// [`CommandExecutor`].
pub struct EditorCore {
    document: Document,
    layout: LayoutPipeline,
    caret: usize,
    selection: Option<Selection>,
    attributes: AttributeTable,
    /// Table size that triggers the next compaction.
    compact_above: usize,
    fonts: FontCache,
    images: ImageCache,
    metrics: Box<dyn FontMetrics>,
    wrap: Box<dyn WrapStrategy>,
    config: EditorConfig,
}

/// Smallest attribute table worth compacting.
const MIN_COMPACT_SIZE: usize = 256;

impl EditorCore {
    /// Empty document.
    pub fn new(config: EditorConfig) -> Self {
        Self::with_document(Document::new(), config)
    }

    /// Editor over an existing document.
    pub fn with_document(document: Document, config: EditorConfig) -> Self {
        Self {
            document,
            layout: LayoutPipeline::new(config.layout_config()),
            caret: 0,
            selection: None,
            attributes: AttributeTable::new(),
            compact_above: MIN_COMPACT_SIZE,
            fonts: FontCache::new(),
            images: ImageCache::new(),
            metrics: Box::new(MonospaceMetrics::default()),
            wrap: wrap_strategy(config.wrap_mode, config.wrap_columns),
            config,
        }
    }

    /// The document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The layout cache.
    pub fn layout(&self) -> &LayoutPipeline {
        &self.layout
    }

    /// Configuration in effect.
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Caret slot.
    pub fn caret(&self) -> usize {
        self.caret
    }

    /// Active selection.
    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Caret plus selection.
    pub fn caret_state(&self) -> CaretState {
        CaretState {
            caret: self.caret,
            selection: self.selection,
        }
    }

    /// Attribute identity table.
    pub fn attribute_table(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Loaded image sizes.
    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    /// Replace the font measurement provider; everything is re-measured on the next refresh.
    pub fn set_font_metrics(&mut self, metrics: Box<dyn FontMetrics>) {
        self.metrics = metrics;
        self.fonts.clear();
        self.layout.invalidate_all();
    }

    /// Replace the wrap strategy.
    pub fn set_wrap_strategy(&mut self, wrap: Box<dyn WrapStrategy>) {
        self.wrap = wrap;
        self.layout.invalidate_all();
    }

    /// Change the soft wrapping mode.
    pub fn set_wrap_mode(&mut self, mode: WrapMode, columns: usize) {
        self.config.wrap_mode = mode;
        self.config.wrap_columns = columns;
        self.set_wrap_strategy(wrap_strategy(mode, columns));
    }

    /// Change the root content width.
    pub fn set_viewport_width(&mut self, width: f32) {
        self.config.viewport_width = width;
        self.layout.set_viewport_width(width);
    }

    /// Drop attribute identities and fonts; every paragraph is re-measured.
    pub fn clear_caches(&mut self) {
        self.attributes.clear();
        self.fonts.clear();
        self.layout.invalidate_all();
    }

    /// Release attribute sets that neither the document nor the history refers to anymore.
    /// Returns the number of released sets.
    pub fn compact_attributes(&mut self) -> usize {
        let dropped = self.attributes.compact();
        self.compact_above = (self.attributes.len() * 2).max(MIN_COMPACT_SIZE);
        dropped
    }

    /// Recompute dirty layout.
    pub fn refresh_layout(&mut self) -> RefreshStats {
        if self.attributes.len() > self.compact_above {
            self.compact_attributes();
        }
        let mut ctx = LayoutContext {
            metrics: &*self.metrics,
            wrap: &*self.wrap,
            attributes: &mut self.attributes,
            fonts: &mut self.fonts,
            images: &self.images,
        };
        self.layout.refresh(&self.document, &mut ctx)
    }

    /// Refresh, then paint everything intersecting `clip`.
    pub fn paint(&mut self, clip: Rect, surface: &mut dyn PaintSurface) -> PaintStats {
        self.refresh_layout();
        let mut ctx = LayoutContext {
            metrics: &*self.metrics,
            wrap: &*self.wrap,
            attributes: &mut self.attributes,
            fonts: &mut self.fonts,
            images: &self.images,
        };
        paint(&self.document, &self.layout, &mut ctx, clip, surface)
    }

    /// Refresh, then find what lies under a document point.
    pub fn hit_test(&mut self, x: f32, y: f32) -> Option<HitTestResult> {
        self.refresh_layout();
        hit_test(&self.document, &self.layout, x, y)
    }

    /// Refresh, then compute the caret rectangle.
    pub fn caret_rect(&mut self) -> Option<Rect> {
        self.refresh_layout();
        self.layout.caret_rect(&self.document, self.caret)
    }

    /// Total document height after a refresh.
    pub fn document_height(&mut self) -> f32 {
        self.refresh_layout();
        self.layout.document_height(&self.document)
    }

    fn set_caret(&mut self, caret: usize, selection: Option<Selection>) {
        let len = self.document.len();
        self.caret = caret.min(len);
        self.selection = selection
            .map(|s| Selection::new(s.anchor.min(len), s.head.min(len)))
            .filter(|s| !s.is_empty());
    }

    /// Run `transform` on a window covering `[s, e]` and splice the result back.
    fn edit<F>(&mut self, s: usize, e: usize, options: NormalizeOptions, transform: F) -> Result<Option<EditParts>>
    where
        F: FnOnce(&mut Window, usize, &mut AttributeTable) -> Result<()>,
    {
        let window = self.document.edit_window(s, e);
        let mut data = self.document.window_data(&window);
        let old = data.paragraphs.clone();
        transform(&mut data, window.base, &mut self.attributes)?;
        data.normalize(options);
        if data.paragraphs.is_empty() && window.bounds.at_start && window.bounds.at_end {
            data.paragraphs.push(ParagraphData::empty());
        }
        if data.paragraphs == old {
            return Ok(None);
        }

        let path = self.document.env_path(window.environment);
        let forward = ActionPart::ReplaceParagraphs {
            environment: path.clone(),
            index: window.first,
            remove: window.count,
            insert: data.paragraphs.clone(),
        };
        let inverse = ActionPart::ReplaceParagraphs {
            environment: path,
            index: window.first,
            remove: data.paragraphs.len(),
            insert: old,
        };
        let report =
            self.document
                .splice(window.environment, window.first, window.count, data.paragraphs)?;
        self.layout.on_splice(&report);
        Ok(Some(EditParts {
            forward: vec![forward],
            inverse: vec![inverse],
            delta: report.delta,
        }))
    }
}

impl ActionTarget for EditorCore {
    fn apply_part(&mut self, part: &ActionPart) -> Result<()> {
        match part {
            ActionPart::ReplaceParagraphs {
                environment,
                index,
                remove,
                insert,
            } => {
                let env = self
                    .document
                    .resolve_path(environment)
                    .ok_or(DocumentError::IllegalState("history refers to a missing environment"))?;
                let report = self.document.splice(env, *index, *remove, insert.clone())?;
                self.layout.on_splice(&report);
            }
            ActionPart::SetEnvironmentKind { environment, kind } => {
                let env = self
                    .document
                    .resolve_path(environment)
                    .ok_or(DocumentError::IllegalState("history refers to a missing environment"))?;
                self.document.set_environment_kind(env, kind.clone())?;
                self.layout.on_environment_changed(&self.document, env);
            }
        }
        Ok(())
    }

    fn restore_caret(&mut self, caret: &CaretState) {
        self.set_caret(caret.caret, caret.selection);
    }
}

/// Number of chars of the grapheme cluster starting at char `offset` of `text`.
fn grapheme_len_after(text: &str, offset: usize) -> usize {
    let mut seen = 0;
    for grapheme in text.graphemes(true) {
        let n = grapheme.chars().count();
        if seen == offset {
            return n;
        }
        if seen > offset {
            break;
        }
        seen += n;
    }
    1
}

/// Number of chars of the grapheme cluster ending at char `offset` of `text`.
fn grapheme_len_before(text: &str, offset: usize) -> usize {
    let mut seen = 0;
    for grapheme in text.graphemes(true) {
        let n = grapheme.chars().count();
        if seen + n == offset {
            return n;
        }
        if seen + n > offset {
            break;
        }
        seen += n;
    }
    1
}

/// Command executor
///
/// Owns the [`EditorCore`], the undo/redo [`History`] and the collaborators the kernel consumes
/// (markup parser, exporters, image loader).
///
/// # Example
///
/// ```rust
/// use richdoc_core::{CommandExecutor, EnvironmentKind};
///
/// let mut executor = CommandExecutor::default();
/// executor.insert_text(0, "abcdef", None, false).unwrap();
/// executor
///     .wrap_in_environment(0, 6, EnvironmentKind::quote(None), false)
///     .unwrap();
///
/// // six characters plus the enter and leave markers
/// assert_eq!(executor.document().len(), 8);
/// executor.undo().unwrap();
/// assert_eq!(executor.get_text(0, 6, Default::default()).unwrap(), "abcdef");
/// ```
pub struct CommandExecutor {
    editor: EditorCore,
    history: History,
    cache: HistoryCache,
    parser: Option<Box<dyn MarkupParser>>,
    exporters: Vec<Box<dyn MarkupExporter>>,
    loader: Option<ImageLoadQueue>,
    revision: u64,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl CommandExecutor {
    /// Create an executor over an empty document.
    pub fn new(config: EditorConfig) -> Self {
        Self::with_document(Document::new(), config)
    }

    /// Create an executor over an existing document.
    pub fn with_document(document: Document, config: EditorConfig) -> Self {
        let history = History::new(config.history_capacity);
        Self {
            editor: EditorCore::with_document(document, config),
            history,
            cache: HistoryCache::default(),
            parser: None,
            exporters: Vec::new(),
            loader: None,
            revision: 0,
        }
    }

    /// Execute command
    pub fn execute(&mut self, command: Command) -> Result<CommandResult> {
        match command {
            Command::Edit(edit) => self.execute_edit(edit),
            Command::Cursor(cursor) => self.execute_cursor(cursor),
            Command::View(view) => self.execute_view(view),
        }
    }

    /// Execute commands in order, stopping at the first error.
    pub fn execute_batch(&mut self, commands: Vec<Command>) -> Result<Vec<CommandResult>> {
        commands.into_iter().map(|c| self.execute(c)).collect()
    }

    fn execute_edit(&mut self, command: EditCommand) -> Result<CommandResult> {
        match command {
            EditCommand::InsertText {
                pos,
                text,
                attributes,
                parse_markup,
            } => self
                .insert_text(pos, &text, attributes, parse_markup)
                .map(CommandResult::Inserted),
            EditCommand::RemoveText {
                start,
                end,
                merge_attributes,
            } => self
                .remove_text(start, end, merge_attributes)
                .map(|_| CommandResult::Success),
            EditCommand::AddEnvironment {
                pos,
                kind,
                list_point,
                trailing_newline,
            } => self
                .add_environment(kind, pos, list_point, trailing_newline)
                .map(|_| CommandResult::Success),
            EditCommand::WrapInEnvironment {
                start,
                end,
                kind,
                list_point,
            } => self
                .wrap_in_environment(start, end, kind, list_point)
                .map(|_| CommandResult::Success),
            EditCommand::AddImage { pos, image } => {
                self.add_image(image, pos).map(|_| CommandResult::Success)
            }
            EditCommand::AddNewLine {
                pos,
                attributes,
                alignment,
                list_point,
            } => self
                .add_new_line(pos, attributes, alignment, list_point)
                .map(|_| CommandResult::Success),
            EditCommand::SetAttributes {
                start,
                end,
                attributes,
            } => self
                .set_attributes(start, end, attributes)
                .map(|_| CommandResult::Success),
            EditCommand::RemoveAttributes { start, end, keys } => self
                .remove_attributes(start, end, &keys)
                .map(|_| CommandResult::Success),
            EditCommand::SetLineAlignment {
                start,
                end,
                alignment,
            } => self
                .set_line_alignment(start, end, alignment)
                .map(|_| CommandResult::Success),
            EditCommand::SetEnvironmentKind { pos, kind } => self
                .set_environment_kind(pos, kind)
                .map(|_| CommandResult::Success),
            EditCommand::Cut { start, end } => self.cut(start, end).map(CommandResult::Fragment),
            EditCommand::Paste { pos, fragment } => {
                self.paste(pos, fragment).map(CommandResult::Inserted)
            }
            EditCommand::Undo => self.undo().map(CommandResult::Range),
            EditCommand::Redo => self.redo().map(CommandResult::Range),
        }
    }

    fn execute_cursor(&mut self, command: CursorCommand) -> Result<CommandResult> {
        match command {
            CursorCommand::GoTo { pos } => self.go_to_position(pos)?,
            CursorCommand::Forward { count } => self.forward(count),
            CursorCommand::Backward { count } => self.backward(count),
            CursorCommand::NextGrapheme => self.next_grapheme(),
            CursorCommand::PreviousGrapheme => self.previous_grapheme(),
            CursorCommand::SetSelection { anchor, head } => self.set_selection(anchor, head)?,
            CursorCommand::ExtendSelection { to } => self.extend_selection(to)?,
            CursorCommand::ClearSelection => self.clear_selection(),
            CursorCommand::SelectAll => self.select_all(),
        }
        Ok(CommandResult::Position(self.editor.caret))
    }

    fn execute_view(&mut self, command: ViewCommand) -> Result<CommandResult> {
        match command {
            ViewCommand::SetViewportWidth { width } => {
                if !(width.is_finite() && width > 0.0) {
                    return Err(DocumentError::IllegalState("viewport width must be positive"));
                }
                self.editor.set_viewport_width(width);
                Ok(CommandResult::Success)
            }
            ViewCommand::SetWrapMode { mode, columns } => {
                self.editor.set_wrap_mode(mode, columns);
                Ok(CommandResult::Success)
            }
            ViewCommand::RefreshLayout => Ok(CommandResult::Refreshed(self.refresh_layout())),
            ViewCommand::GetText { start, end, syntax } => {
                self.get_text(start, end, syntax).map(CommandResult::Text)
            }
            ViewCommand::Copy { start, end } => self.copy(start, end).map(CommandResult::Fragment),
        }
    }

    // ---------------------------------------------------------------- accessors

    /// The editor state.
    pub fn editor(&self) -> &EditorCore {
        &self.editor
    }

    /// The editor state, mutably (layout and cache knobs; edits go through the executor).
    pub fn editor_mut(&mut self) -> &mut EditorCore {
        &mut self.editor
    }

    /// The document.
    pub fn document(&self) -> &Document {
        &self.editor.document
    }

    /// The undo/redo history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Counter bumped by every committed edit, undo and redo.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Caret slot.
    pub fn caret(&self) -> usize {
        self.editor.caret
    }

    /// Active selection.
    pub fn selection(&self) -> Option<Selection> {
        self.editor.selection
    }

    /// Register the markup parser used by `insert_text(.., parse_markup = true)`.
    pub fn set_markup_parser(&mut self, parser: Box<dyn MarkupParser>) {
        self.parser = Some(parser);
    }

    /// Register an exporter; a later exporter for the same syntax replaces the earlier one.
    pub fn add_exporter(&mut self, exporter: Box<dyn MarkupExporter>) {
        let syntax = exporter.syntax();
        self.exporters.retain(|e| e.syntax() != syntax);
        self.exporters.push(exporter);
    }

    /// Install the image loading service.
    pub fn set_image_loader(&mut self, loader: Arc<dyn ImageLoader>) {
        self.loader = Some(ImageLoadQueue::new(loader));
    }

    // ---------------------------------------------------------------- history plumbing

    fn record(&mut self, action: Action) {
        tracing::debug!(kind = ?action.kind(), range = ?action.range(), "edit committed");
        self.revision += 1;
        if self.cache.is_open() {
            self.cache.record(action);
        } else {
            self.history.push(action);
        }
    }

    fn commit(&mut self, kind: ActionKind, range: Range<usize>, parts: EditParts, before: CaretState) {
        let action = Action::new(
            kind,
            range,
            parts.forward,
            parts.inverse,
            before,
            self.editor.caret_state(),
        );
        self.record(action);
    }

    /// Start a group of edits that undo as one step. Groups nest.
    pub fn begin_compound(&mut self) {
        self.cache.begin();
    }

    /// Close a group; the outermost close pushes the folded action.
    pub fn end_compound(&mut self) -> Result<()> {
        if let Some(action) = self.cache.end()? {
            self.history.push(action);
        }
        Ok(())
    }

    fn rollback_compound(&mut self, mark: usize) {
        let mut actions = self.cache.abort_to(mark);
        for action in actions.iter_mut().rev() {
            if let Err(err) = action.perform(&mut self.editor) {
                tracing::warn!(%err, "failed to roll back a partial compound edit");
            }
        }
    }

    /// Undo the newest action; returns the range it touched.
    pub fn undo(&mut self) -> Result<Range<usize>> {
        if self.cache.is_open() {
            return Err(DocumentError::IllegalState("cannot undo inside a compound edit"));
        }
        let range = self.history.undo(&mut self.editor)?;
        self.revision += 1;
        tracing::debug!(?range, "undo");
        Ok(range)
    }

    /// Redo the newest undone action; returns the range it touched.
    pub fn redo(&mut self) -> Result<Range<usize>> {
        if self.cache.is_open() {
            return Err(DocumentError::IllegalState("cannot redo inside a compound edit"));
        }
        let range = self.history.redo(&mut self.editor)?;
        self.revision += 1;
        tracing::debug!(?range, "redo");
        Ok(range)
    }

    /// Whether undo is possible.
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether redo is possible.
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Number of undo steps.
    pub fn undo_len(&self) -> usize {
        self.history.undo_len()
    }

    /// Number of redo steps.
    pub fn redo_len(&self) -> usize {
        self.history.redo_len()
    }

    /// Whether the document is at its last save point.
    pub fn is_clean(&self) -> bool {
        self.history.is_clean()
    }

    /// Mark the current state as saved.
    pub fn mark_clean(&mut self) {
        self.history.mark_clean();
    }

    // ---------------------------------------------------------------- edits

    fn share(&mut self, attributes: Option<TextAttributes>, pos: usize) -> Arc<TextAttributes> {
        match attributes {
            Some(attributes) => self.editor.attributes.share(attributes),
            None => self
                .editor
                .document
                .typing_attributes(pos)
                .unwrap_or_else(|| self.editor.attributes.plain()),
        }
    }

    fn insert_fragment(
        &mut self,
        pos: usize,
        fragment: Fragment,
        rule: PropsRule,
        kind: ActionKind,
        options: NormalizeOptions,
    ) -> Result<usize> {
        self.editor.document.check_position(pos)?;
        if fragment.is_empty() {
            return Ok(0);
        }
        let before = self.editor.caret_state();
        let plain = self.editor.attributes.plain();
        let Some(parts) = self.editor.edit(pos, pos, options, |window, base, _| {
            window.insert(pos - base, fragment, rule, &plain).map(|_| ())
        })?
        else {
            return Ok(0);
        };
        let inserted = parts.delta.max(0) as usize;
        let selection = before
            .selection
            .map(|s| shift_selection(s, pos, pos, inserted));
        self.editor.set_caret(pos + inserted, selection);
        self.commit(kind, pos..pos + inserted, parts, before);
        Ok(inserted)
    }

    /// Insert `text` at `pos`; with `parse_markup` the text goes through the registered parser
    /// first. Returns the number of index units inserted.
    pub fn insert_text(
        &mut self,
        pos: usize,
        text: &str,
        attributes: Option<TextAttributes>,
        parse_markup: bool,
    ) -> Result<usize> {
        self.editor.document.check_position(pos)?;
        if text.is_empty() {
            return Ok(0);
        }
        let attributes = self.share(attributes, pos);
        let fragment = if parse_markup {
            let parser = self
                .parser
                .as_ref()
                .ok_or(DocumentError::IllegalState("no markup parser registered"))?;
            parser.parse(text, &attributes)?
        } else {
            Fragment::from_text(text, attributes)
        };
        self.request_images(&fragment);
        self.insert_fragment(
            pos,
            fragment,
            PropsRule::Inherit,
            ActionKind::InsertText,
            NormalizeOptions::default(),
        )
    }

    /// Remove `[start, end)`. Sub-environments only partially covered keep their markers, so the
    /// document may shrink by less than `end - start`. With `merge_attrs` runs that meet at the
    /// seam are merged when their attributes are equal.
    pub fn remove_text(&mut self, start: usize, end: usize, merge_attrs: bool) -> Result<()> {
        self.editor.document.check_range(start, end)?;
        if start == end {
            return Ok(());
        }
        let before = self.editor.caret_state();
        let options = NormalizeOptions {
            keep_trailing: false,
            coalesce: merge_attrs,
        };
        let Some(parts) = self.editor.edit(start, end, options, |window, base, _| {
            window.remove(start - base, end - base);
            Ok(())
        })?
        else {
            return Ok(());
        };
        let removed = (-parts.delta).max(0) as usize;
        let caret = shift_position(before.caret, start, start + removed, 0);
        let selection = before
            .selection
            .map(|s| shift_selection(s, start, start + removed, 0));
        self.editor.set_caret(caret, selection);
        self.commit(ActionKind::RemoveText, start..start, parts, before);
        Ok(())
    }

    /// Insert an empty `kind` environment at `pos`; the caret moves into it.
    pub fn add_environment(
        &mut self,
        kind: EnvironmentKind,
        pos: usize,
        is_list_point: bool,
        add_trailing_newline: bool,
    ) -> Result<()> {
        let props = ParagraphProps {
            list_point: is_list_point,
            ..ParagraphProps::default()
        };
        let fragment = Fragment::environment(EnvironmentData::new(kind), props);
        let options = NormalizeOptions {
            keep_trailing: add_trailing_newline,
            coalesce: true,
        };
        self.insert_fragment(
            pos,
            fragment,
            PropsRule::AsGiven,
            ActionKind::AddEnvironment,
            options,
        )?;
        self.editor.set_caret(pos + 1, None);
        Ok(())
    }

    /// Move `[start, end)` into a new `kind` environment as one undo step.
    pub fn wrap_in_environment(
        &mut self,
        start: usize,
        end: usize,
        kind: EnvironmentKind,
        is_list_point: bool,
    ) -> Result<()> {
        self.editor.document.check_range(start, end)?;
        let content = self.editor.document.fragment(start, end)?;
        content.validate_nesting(kind.env_type())?;
        let (env, _) = self.editor.document.innermost(start, end);
        let parent = self
            .editor
            .document
            .environment(env)
            .map(|e| e.env_type())
            .unwrap_or(EnvironmentType::Root);
        if !parent.allows_environment(kind.env_type()) {
            return Err(DocumentError::IllegalNesting {
                parent,
                child: NestedContent::Environment(kind.env_type()),
            });
        }

        self.begin_compound();
        let mark = self.cache.mark();
        let result = self.wrap_steps(start, end, kind, is_list_point);
        match result {
            Ok(()) => self.end_compound(),
            Err(err) => {
                self.rollback_compound(mark);
                Err(err)
            }
        }
    }

    fn wrap_steps(
        &mut self,
        start: usize,
        end: usize,
        kind: EnvironmentKind,
        is_list_point: bool,
    ) -> Result<()> {
        let content = self.cut(start, end)?;
        self.add_environment(kind, start, is_list_point, false)?;
        self.paste(start + 1, content)?;
        Ok(())
    }

    /// Insert an image at `pos`.
    pub fn add_image(&mut self, image: SecImage, pos: usize) -> Result<()> {
        let fragment = Fragment::image(image);
        self.request_images(&fragment);
        self.insert_fragment(
            pos,
            fragment,
            PropsRule::Inherit,
            ActionKind::InsertImage,
            NormalizeOptions::default(),
        )?;
        Ok(())
    }

    /// Insert a paragraph break at `pos`; the new paragraph gets `align` and `is_list_point`.
    pub fn add_new_line(
        &mut self,
        pos: usize,
        attributes: Option<TextAttributes>,
        align: Alignment,
        is_list_point: bool,
    ) -> Result<()> {
        self.editor.document.check_position(pos)?;
        let attributes = self.share(attributes, pos);
        let props = ParagraphProps {
            alignment: align,
            list_point: is_list_point,
        };
        self.insert_fragment(
            pos,
            Fragment::from_text("\n", attributes),
            PropsRule::Explicit(props),
            ActionKind::NewLine,
            NormalizeOptions {
                keep_trailing: true,
                coalesce: true,
            },
        )?;
        Ok(())
    }

    fn map_attributes<F>(&mut self, start: usize, end: usize, mut map: F) -> Result<()>
    where
        F: FnMut(&TextAttributes) -> TextAttributes,
    {
        self.editor.document.check_range(start, end)?;
        if start == end {
            return Ok(());
        }
        let before = self.editor.caret_state();
        let Some(parts) = self.editor.edit(
            start,
            end,
            NormalizeOptions::default(),
            |window, base, table| {
                window.map_attributes(start - base, end - base, &mut |attrs: &Arc<TextAttributes>| {
                    table.share(map(attrs))
                });
                Ok(())
            },
        )?
        else {
            return Ok(());
        };
        self.commit(ActionKind::Attributes, start..end, parts, before);
        Ok(())
    }

    /// Apply the keys set in `patch` to every run in `[start, end)`; other keys stay.
    pub fn set_attributes(&mut self, start: usize, end: usize, patch: TextAttributes) -> Result<()> {
        self.map_attributes(start, end, |attrs| attrs.merged(&patch))
    }

    /// Remove `keys` from every run in `[start, end)`.
    pub fn remove_attributes(&mut self, start: usize, end: usize, keys: &[AttributeKey]) -> Result<()> {
        self.map_attributes(start, end, |attrs| attrs.without(keys))
    }

    /// Align every paragraph that `[start, end]` touches.
    pub fn set_line_alignment(&mut self, start: usize, end: usize, align: Alignment) -> Result<()> {
        self.editor.document.check_range(start, end)?;
        let before = self.editor.caret_state();
        let Some(parts) = self.editor.edit(
            start,
            end,
            NormalizeOptions {
                keep_trailing: true,
                coalesce: true,
            },
            |window, base, _| {
                window.set_alignment(start - base, end - base, align);
                Ok(())
            },
        )?
        else {
            return Ok(());
        };
        self.commit(ActionKind::Alignment, start..end, parts, before);
        Ok(())
    }

    /// Retype the innermost environment holding `pos`.
    pub fn set_environment_kind(&mut self, pos: usize, kind: EnvironmentKind) -> Result<()> {
        let env = self.editor.document.environment_at(pos)?;
        let doc = &self.editor.document;
        let environment = doc
            .environment(env)
            .ok_or(DocumentError::IllegalState("dangling environment"))?;
        let Some(parent_para) = environment.parent() else {
            return Err(DocumentError::IllegalState("the root environment cannot be retyped"));
        };
        let old_kind = environment.kind().clone();
        if old_kind == kind {
            return Ok(());
        }
        let range = doc.environment_range(env);
        let before = self.editor.caret_state();
        let path = doc.env_path(env);

        let becomes_code =
            !kind.env_type().allows_attributes() && old_kind.env_type().allows_attributes();
        let parts = if becomes_code {
            self.retype_with_splice(env, parent_para, kind)?
        } else {
            self.editor.document.set_environment_kind(env, kind.clone())?;
            self.editor
                .layout
                .on_environment_changed(&self.editor.document, env);
            EditParts {
                forward: vec![ActionPart::SetEnvironmentKind {
                    environment: path.clone(),
                    kind,
                }],
                inverse: vec![ActionPart::SetEnvironmentKind {
                    environment: path,
                    kind: old_kind,
                }],
                delta: 0,
            }
        };
        self.commit(ActionKind::EnvironmentKind, range, parts, before);
        Ok(())
    }

    /// Retype into an environment that drops attributes: the environment paragraph is replaced
    /// by a stripped copy so undo restores the styled runs.
    fn retype_with_splice(
        &mut self,
        env: EnvId,
        parent_para: ParaId,
        kind: EnvironmentKind,
    ) -> Result<EditParts> {
        let doc = &self.editor.document;
        let outer = doc
            .paragraph(parent_para)
            .map(|p| p.environment())
            .ok_or(DocumentError::IllegalState("dangling environment paragraph"))?;
        let slot = doc
            .environment(outer)
            .and_then(|e| e.paragraphs().index_of(parent_para))
            .ok_or(DocumentError::IllegalState("dangling environment paragraph"))?;
        let outer_type = doc
            .environment(outer)
            .map(|e| e.env_type())
            .unwrap_or(EnvironmentType::Root);
        if !outer_type.allows_environment(kind.env_type()) {
            return Err(DocumentError::IllegalNesting {
                parent: outer_type,
                child: NestedContent::Environment(kind.env_type()),
            });
        }
        let old = doc.paragraph_data(parent_para);
        let mut new = old.clone();
        if let ParagraphBody::Environment(data) = &mut new.body {
            Fragment::new(data.paragraphs.clone()).validate_nesting(kind.env_type())?;
            data.kind = kind;
            let plain = self.editor.attributes.plain();
            strip_paragraphs(&mut data.paragraphs, &plain);
        }
        let path = doc.env_path(outer);
        let report = self.editor.document.splice(outer, slot, 1, vec![new.clone()])?;
        self.editor.layout.on_splice(&report);
        tracing::trace!(?env, "environment retyped through splice");
        Ok(EditParts {
            forward: vec![ActionPart::ReplaceParagraphs {
                environment: path.clone(),
                index: slot,
                remove: 1,
                insert: vec![new],
            }],
            inverse: vec![ActionPart::ReplaceParagraphs {
                environment: path,
                index: slot,
                remove: 1,
                insert: vec![old],
            }],
            delta: report.delta,
        })
    }

    // ---------------------------------------------------------------- clipboard

    /// Owned copy of `[start, end)`.
    pub fn copy(&self, start: usize, end: usize) -> Result<Fragment> {
        self.editor.document.fragment(start, end)
    }

    /// Copy `[start, end)`, then remove it.
    pub fn cut(&mut self, start: usize, end: usize) -> Result<Fragment> {
        let fragment = self.copy(start, end)?;
        self.remove_text(start, end, true)?;
        Ok(fragment)
    }

    /// Insert `fragment` at `pos`, keeping its paragraph properties. Returns the inserted length.
    pub fn paste(&mut self, pos: usize, fragment: Fragment) -> Result<usize> {
        self.request_images(&fragment);
        self.insert_fragment(
            pos,
            fragment,
            PropsRule::AsGiven,
            ActionKind::Paste,
            NormalizeOptions::default(),
        )
    }

    /// Render `[start, end)` in `syntax`.
    pub fn get_text(&self, start: usize, end: usize, syntax: TextSyntax) -> Result<String> {
        match syntax {
            TextSyntax::Plain => self.editor.document.text(start, end),
            _ => {
                let exporter = self
                    .exporters
                    .iter()
                    .find(|e| e.syntax() == syntax)
                    .ok_or(DocumentError::IllegalState("no exporter registered for this syntax"))?;
                Ok(exporter.export(&self.copy(start, end)?))
            }
        }
    }

    // ---------------------------------------------------------------- caret & selection

    /// Move the caret to `pos` and drop the selection.
    pub fn go_to_position(&mut self, pos: usize) -> Result<()> {
        self.editor.document.check_position(pos)?;
        self.editor.set_caret(pos, None);
        Ok(())
    }

    /// Move the caret `count` units right (clamped).
    pub fn forward(&mut self, count: usize) {
        let caret = self.editor.caret.saturating_add(count);
        self.editor.set_caret(caret, None);
    }

    /// Move the caret `count` units left (clamped).
    pub fn backward(&mut self, count: usize) {
        let caret = self.editor.caret.saturating_sub(count);
        self.editor.set_caret(caret, None);
    }

    /// Text of the caret's paragraph (up to its break) and the caret's offset in it.
    fn caret_paragraph_text(&self) -> Option<(String, usize)> {
        let doc = &self.editor.document;
        let location = doc.resolve(self.editor.caret).ok()?;
        let Placement::Text { offset, .. } = location.placement else {
            return None;
        };
        let para = location.paragraph;
        let start = doc.paragraph_start(para);
        let caret_end = doc.paragraph_len(para) - usize::from(doc.is_terminated(para));
        let text = doc.text(start, start + caret_end).ok()?;
        Some((text, offset))
    }

    /// Move the caret past the next grapheme cluster (one unit across breaks and markers).
    pub fn next_grapheme(&mut self) {
        let step = match self.caret_paragraph_text() {
            Some((text, offset)) if offset < text.chars().count() => grapheme_len_after(&text, offset),
            _ => 1,
        };
        self.forward(step);
    }

    /// Move the caret before the previous grapheme cluster.
    pub fn previous_grapheme(&mut self) {
        let step = match self.caret_paragraph_text() {
            Some((text, offset)) if offset > 0 => grapheme_len_before(&text, offset),
            _ => 1,
        };
        self.backward(step);
    }

    /// Select `[anchor, head]`; the caret goes to `head`.
    pub fn set_selection(&mut self, anchor: usize, head: usize) -> Result<()> {
        self.editor.document.check_position(anchor)?;
        self.editor.document.check_position(head)?;
        self.editor.set_caret(head, Some(Selection::new(anchor, head)));
        Ok(())
    }

    /// Move the selection head to `to`, anchoring at the caret when nothing is selected.
    pub fn extend_selection(&mut self, to: usize) -> Result<()> {
        let anchor = self
            .editor
            .selection
            .map(|s| s.anchor)
            .unwrap_or(self.editor.caret);
        self.set_selection(anchor, to)
    }

    /// Drop the selection, keeping the caret.
    pub fn clear_selection(&mut self) {
        self.editor.selection = None;
    }

    /// Select the whole document.
    pub fn select_all(&mut self) {
        let len = self.editor.document.len();
        self.editor.set_caret(len, Some(Selection::new(0, len)));
    }

    // ---------------------------------------------------------------- queries

    /// Attributes of the unit at index `pos` (`None` for images and markers).
    pub fn attributes_at(&self, pos: usize) -> Option<Arc<TextAttributes>> {
        self.editor.document.attributes_at(pos)
    }

    /// Attributes shared by every text run in `[start, end)`.
    pub fn common_attributes(&self, start: usize, end: usize) -> Result<TextAttributes> {
        self.editor.document.common_attributes(start, end)
    }

    /// Effective alignment of the paragraph at caret `pos`.
    pub fn alignment_at(&self, pos: usize) -> Result<Alignment> {
        let location = self.editor.document.resolve(pos)?;
        Ok(self.editor.document.effective_alignment(location.paragraph))
    }

    /// Innermost environment at caret `pos`.
    pub fn environment_at(&self, pos: usize) -> Result<EnvId> {
        self.editor.document.environment_at(pos)
    }

    /// Type of the innermost environment at caret `pos`.
    pub fn environment_type_at(&self, pos: usize) -> Result<EnvironmentType> {
        let env = self.environment_at(pos)?;
        self.editor
            .document
            .environment(env)
            .map(|e| e.env_type())
            .ok_or(DocumentError::IllegalState("dangling environment"))
    }

    /// Kind of the innermost environment at caret `pos`.
    pub fn environment_kind_at(&self, pos: usize) -> Result<EnvironmentKind> {
        let env = self.environment_at(pos)?;
        self.editor
            .document
            .environment(env)
            .map(|e| e.kind().clone())
            .ok_or(DocumentError::IllegalState("dangling environment"))
    }

    /// Whether the paragraph at caret `pos` is a list point.
    pub fn is_list_point_at(&self, pos: usize) -> Result<bool> {
        let location = self.editor.document.resolve(pos)?;
        Ok(self
            .editor
            .document
            .paragraph(location.paragraph)
            .is_some_and(|p| p.props().list_point))
    }

    // ---------------------------------------------------------------- layout & images

    /// Recompute dirty layout.
    pub fn refresh_layout(&mut self) -> RefreshStats {
        self.editor.refresh_layout()
    }

    /// Paint everything intersecting `clip`.
    pub fn paint(&mut self, clip: Rect, surface: &mut dyn PaintSurface) -> PaintStats {
        self.editor.paint(clip, surface)
    }

    /// What lies under a document point.
    pub fn hit_test(&mut self, x: f32, y: f32) -> Option<HitTestResult> {
        self.editor.hit_test(x, y)
    }

    fn request_images(&mut self, fragment: &Fragment) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        let mut sources = Vec::new();
        collect_image_sources(fragment.paragraphs(), &mut sources);
        for source in sources {
            if self.editor.images.size(&source).is_none() && !self.editor.images.is_failed(&source) {
                loader.request(&source);
            }
        }
    }

    /// Apply finished image loads; returns how many paragraphs were queued for relayout.
    pub fn poll_image_loads(&mut self) -> usize {
        let Some(loader) = self.loader.as_mut() else {
            return 0;
        };
        let mut touched = 0;
        for loaded in loader.drain() {
            self.editor.images.apply(&loaded);
            touched += self
                .editor
                .layout
                .on_image_loaded(&self.editor.document, &loaded.source);
        }
        touched
    }

    /// Block until one pending image load finishes and apply it.
    pub fn wait_for_image_load(&mut self) -> bool {
        let Some(loaded) = self.loader.as_mut().and_then(ImageLoadQueue::wait_one) else {
            return false;
        };
        self.editor.images.apply(&loaded);
        self.editor
            .layout
            .on_image_loaded(&self.editor.document, &loaded.source);
        true
    }

    /// Number of image loads in flight.
    pub fn pending_image_loads(&self) -> usize {
        self.loader.as_ref().map(ImageLoadQueue::pending).unwrap_or(0)
    }
}

fn collect_image_sources(paragraphs: &[ParagraphData], out: &mut Vec<String>) {
    for paragraph in paragraphs {
        match &paragraph.body {
            ParagraphBody::Text(sections) => {
                for section in sections {
                    if let Section::Image(image) = section
                        && !out.iter().any(|s| s == image.image.source())
                    {
                        out.push(image.image.source().to_string());
                    }
                }
            }
            ParagraphBody::Environment(env) => collect_image_sources(&env.paragraphs, out),
        }
    }
}
