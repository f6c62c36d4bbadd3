#![warn(missing_docs)]
//! Richdoc Core - Headless Rich-Text Document Kernel
//!
//! # Overview
//!
//! `richdoc-core` holds a rich-text document made of nested environments (quotes, code blocks,
//! lists) and keeps three things consistent with it: a linear index space for positions, a
//! reversible edit history, and an incremental layout cache that frontends paint from.
//! It does no rendering itself; fonts and drawing come in through the [`FontMetrics`] and
//! [`PaintSurface`] traits.
//!
//! # Core Features
//!
//! - **Linear Index Space**: every character, image, paragraph break and environment marker is
//!   one index unit, resolved in O(depth · log n)
//! - **Nesting Rules**: code blocks hold plain text only and are checked before any mutation
//! - **Window Transforms**: edits copy the touched paragraphs out, transform them and splice
//!   them back, so a failing edit never leaves partial state
//! - **Undo/Redo**: bounded history of structural splices with compound groups
//! - **Incremental Layout**: dirty flags per paragraph and environment, bottom-up height
//!   propagation, viewport-culled painting
//! - **Asynchronous Images**: loads run on worker threads and re-layout only the paragraphs
//!   that show the image
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  State Management & Notifications           │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  Command Interface & Edit Engine            │  ← Mutations, history
//! ├─────────────────────────────────────────────┤
//! │  Layout Pipeline / Paint / Hit Testing      │  ← Geometry
//! ├─────────────────────────────────────────────┤
//! │  Window Transforms & Fragments              │  ← Pure edit logic
//! ├─────────────────────────────────────────────┤
//! │  Position Resolution                        │  ← Index space
//! ├─────────────────────────────────────────────┤
//! │  Arena Tree (environments/paragraphs)       │  ← Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use richdoc_core::{CommandExecutor, EnvironmentKind, EnvironmentType, TextAttributes};
//!
//! let mut executor = CommandExecutor::default();
//! executor.insert_text(0, "Hello", None, false).unwrap();
//! executor.set_attributes(2, 4, TextAttributes::new().with_bold(true)).unwrap();
//! executor.add_environment(EnvironmentKind::quote(None), 5, false, false).unwrap();
//! executor.insert_text(6, "quoted", None, false).unwrap();
//!
//! assert_eq!(executor.environment_type_at(8).unwrap(), EnvironmentType::Quote);
//! assert!(executor.document().validate().is_ok());
//!
//! while executor.can_undo() {
//!     executor.undo().unwrap();
//! }
//! assert_eq!(executor.document().len(), 0);
//! ```
//!
//! # Module Description
//!
//! - [`tree`] - arena storage of environments, paragraphs and sections
//! - [`position`] - index space resolution and read queries
//! - [`fragment`] - detached, owned document content
//! - [`history`] - undo/redo actions and compound groups
//! - [`layout`] - fonts, wrapping and the incremental layout pipeline
//! - [`paint`] - culled painting and hit testing
//! - [`commands`] - edit engine and unified command interface
//! - [`state`] - state snapshots and change notifications
//! - [`markup`] - parser/exporter seams and the fragment builder
//! - [`config`] - JSON configuration

pub mod attributes;
pub mod child_list;
pub mod commands;
pub mod config;
pub mod error;
pub mod fragment;
pub mod history;
pub mod image;
pub mod layout;
pub mod markup;
pub mod paint;
pub mod position;
pub mod selection;
pub mod state;
mod transform;
pub mod tree;

pub use attributes::{
    AttributeId, AttributeKey, AttributeTable, AttributeValue, Rgb, TextAttributes, TextPosition,
};
pub use commands::{
    Command, CommandExecutor, CommandResult, CursorCommand, EditCommand, EditorCore, ViewCommand,
};
pub use config::{ConfigError, EditorConfig};
pub use error::{DocumentError, MarkupError, MarkupErrorKind, NestedContent, Result};
pub use fragment::{
    EnvironmentData, Fragment, ImageSection, ParagraphBody, ParagraphData, Section, TextSection,
};
pub use history::{Action, ActionKind, ActionPart, ActionTarget, History, HistoryCache};
pub use image::{ImageCache, ImageLoadQueue, ImageLoaded, ImageLoader, SecImage};
pub use layout::{
    DirtyFlags, FontCache, FontDescriptor, FontMetrics, LayoutConfig, LayoutContext,
    LayoutPipeline, MonospaceMetrics, Rect, RefreshStats, ResolvedFont, VerticalMetrics,
    WrapMode, WrapStrategy,
};
pub use markup::{FragmentBuilder, MarkupExporter, MarkupParser, TextSyntax};
pub use paint::{HitTestResult, PaintStats, PaintSurface, hit_test, paint};
pub use position::{Location, Placement, Unit};
pub use selection::{CaretState, Selection, SelectionDirection};
pub use state::{
    CursorState, DocumentState, EditorState, EditorStateManager, StateChange,
    StateChangeCallback, StateChangeType, UndoRedoState, ViewportState,
};
pub use tree::{
    Alignment, Document, EnvId, EnvPath, EnvironmentKind, EnvironmentType, ListStyle, ParaId,
    ParagraphProps, SectionId,
};
