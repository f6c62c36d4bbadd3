//! `richdoc-markup` - BBCode and HTML collaborators for `richdoc-core`.
//!
//! The kernel knows no markup grammar; it consumes the [`MarkupParser`] and [`MarkupExporter`]
//! capabilities. This crate provides:
//!
//! - [`BbcodeParser`]: BBCode into a detached fragment (the live document is only touched once
//!   the whole source parsed)
//! - [`BbcodeExporter`] and [`HtmlExporter`]: read-only renderings used by `get_text`
//!
//! # Example
//!
//! ```rust
//! use richdoc_core::{CommandExecutor, TextSyntax};
//!
//! let mut executor = CommandExecutor::default();
//! richdoc_markup::install(&mut executor).unwrap();
//!
//! executor.insert_text(0, "[b]bold[/b] text", None, true).unwrap();
//! assert_eq!(executor.attributes_at(0).and_then(|a| a.bold()), Some(true));
//!
//! let len = executor.document().len();
//! assert_eq!(
//!     executor.get_text(0, len, TextSyntax::Html).unwrap(),
//!     "<p><b>bold</b> text</p>\n"
//! );
//! ```

pub mod bbcode;
pub mod html;

pub use bbcode::{BbcodeExporter, BbcodeParser};
pub use html::HtmlExporter;

use richdoc_core::CommandExecutor;

/// Register the BBCode parser and both exporters on an executor.
pub fn install(executor: &mut CommandExecutor) -> Result<(), regex::Error> {
    executor.set_markup_parser(Box::new(BbcodeParser::new()?));
    executor.add_exporter(Box::new(BbcodeExporter));
    executor.add_exporter(Box::new(HtmlExporter));
    tracing::debug!("bbcode parser and bbcode/html exporters installed");
    Ok(())
}

