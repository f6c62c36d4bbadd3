//! Markup collaborator seams.
//!
//! The kernel does not know any markup grammar. Parsers build a detached [`Fragment`] through a
//! [`FragmentBuilder`] and the edit engine pastes it in one step, so a parse error can never leave
//! half an insertion behind. Exporters render fragments read-only.

use crate::attributes::TextAttributes;
use crate::error::{DocumentError, MarkupError, NestedContent, Result};
use crate::fragment::{EnvironmentData, Fragment, ParagraphData, Section};
use crate::image::SecImage;
use crate::tree::{Alignment, EnvironmentKind, EnvironmentType, ParagraphProps};
use std::sync::Arc;

/// Text serialization understood by [`crate::CommandExecutor::get_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextSyntax {
    /// Plain text (images as U+FFFC, environment markers as line breaks).
    #[default]
    Plain,
    /// BBCode.
    Bbcode,
    /// HTML.
    Html,
}

/// Markup to fragment.
pub trait MarkupParser {
    /// Parse `source`; plain text runs start from `base` attributes.
    fn parse(&self, source: &str, base: &TextAttributes) -> std::result::Result<Fragment, MarkupError>;
}

/// Fragment to markup.
pub trait MarkupExporter {
    /// Syntax produced.
    fn syntax(&self) -> TextSyntax;
    /// Render `fragment`.
    fn export(&self, fragment: &Fragment) -> String;
}

#[derive(Debug)]
struct Frame {
    kind: Option<EnvironmentKind>,
    props: ParagraphProps,
    paragraphs: Vec<ParagraphData>,
    current: Vec<Section>,
    current_props: ParagraphProps,
    /// Nothing was written since the environment opened or a child closed; a line break here
    /// is swallowed.
    fresh: bool,
}

impl Frame {
    fn new(kind: Option<EnvironmentKind>, props: ParagraphProps) -> Self {
        let kind_is_environment = kind.is_some();
        Self {
            kind,
            props,
            paragraphs: Vec::new(),
            current: Vec::new(),
            current_props: ParagraphProps::default(),
            fresh: kind_is_environment,
        }
    }

    fn env_type(&self) -> EnvironmentType {
        self.kind
            .as_ref()
            .map(EnvironmentKind::env_type)
            .unwrap_or(EnvironmentType::Root)
    }

    fn flush(&mut self, keep_empty: bool) {
        if keep_empty || !self.current.is_empty() {
            let sections = std::mem::take(&mut self.current);
            self.paragraphs
                .push(ParagraphData::text(sections).with_props(self.current_props));
        }
        self.current_props = ParagraphProps::default();
    }
}

/// Incremental builder used by markup parsers.
///
/// A line break directly after an opening or a closing environment tag is swallowed, the way
/// `[quote]\ntext\n[/quote]\n` is usually written.
#[derive(Debug)]
pub struct FragmentBuilder {
    frames: Vec<Frame>,
    plain: Arc<TextAttributes>,
}

impl Default for FragmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentBuilder {
    /// Start an empty fragment.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(None, ParagraphProps::default())],
            plain: Arc::new(TextAttributes::new()),
        }
    }

    /// Number of open environments.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Type of the innermost open environment (`Root` at the top level).
    pub fn current_type(&self) -> EnvironmentType {
        self.frames
            .last()
            .map(Frame::env_type)
            .unwrap_or(EnvironmentType::Root)
    }

    fn frame(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Append text; `'\n'` starts a new paragraph. Attributes are dropped inside code.
    pub fn push_text(&mut self, text: &str, attributes: Arc<TextAttributes>) {
        let attributes = if self.current_type().allows_attributes() {
            attributes
        } else {
            Arc::clone(&self.plain)
        };
        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            if !line.is_empty() {
                let frame = self.frame();
                frame.current.push(Section::text(line, Arc::clone(&attributes)));
                frame.fresh = false;
            }
            if lines.peek().is_some() {
                self.new_line();
            }
        }
    }

    /// Append an image.
    pub fn push_image(&mut self, image: SecImage) -> Result<()> {
        let parent = self.current_type();
        if !parent.allows_images() {
            return Err(DocumentError::IllegalNesting {
                parent,
                child: NestedContent::Image,
            });
        }
        let frame = self.frame();
        frame.current.push(Section::image(image));
        frame.fresh = false;
        Ok(())
    }

    /// End the current paragraph.
    pub fn new_line(&mut self) {
        let frame = self.frame();
        if frame.fresh && frame.current.is_empty() {
            frame.fresh = false;
            return;
        }
        frame.flush(true);
    }

    /// Alignment of the paragraph being built.
    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.frame().current_props.alignment = alignment;
    }

    /// Mark the paragraph being built as a list point.
    pub fn set_list_point(&mut self, list_point: bool) {
        self.frame().current_props.list_point = list_point;
    }

    /// Start a list point: ends the current paragraph unless it is still empty.
    pub fn list_item(&mut self) {
        let frame = self.frame();
        if !frame.current.is_empty() {
            frame.flush(true);
        }
        frame.current_props.list_point = true;
        frame.fresh = false;
    }

    /// Open a sub-environment at the current point.
    pub fn open_environment(&mut self, kind: EnvironmentKind) -> Result<()> {
        let parent = self.current_type();
        if !parent.allows_environment(kind.env_type()) {
            return Err(DocumentError::IllegalNesting {
                parent,
                child: NestedContent::Environment(kind.env_type()),
            });
        }
        let frame = self.frame();
        let props = frame.current_props;
        frame.flush(false);
        self.frames.push(Frame::new(Some(kind), props));
        Ok(())
    }

    /// Close the innermost environment; returns its kind, or `None` at the top level.
    pub fn close_environment(&mut self) -> Option<EnvironmentKind> {
        if self.frames.len() < 2 {
            return None;
        }
        let mut frame = self.frames.pop()?;
        let keep = frame.paragraphs.is_empty();
        frame.flush(keep);
        let kind = frame.kind?;
        let data = EnvironmentData::with_content(kind.clone(), Fragment::new(frame.paragraphs));
        let parent = self.frame();
        parent
            .paragraphs
            .push(ParagraphData::environment(data).with_props(frame.props));
        parent.fresh = true;
        Some(kind)
    }

    /// Close whatever is still open and build the fragment.
    pub fn finish(mut self) -> Fragment {
        while self.close_environment().is_some() {}
        let frame = self.frame();
        let trailing_break = !frame.fresh && !frame.paragraphs.is_empty();
        frame.flush(trailing_break);
        let paragraphs = std::mem::take(&mut frame.paragraphs);
        Fragment::new(paragraphs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Arc<TextAttributes> {
        Arc::new(TextAttributes::new())
    }

    #[test]
    fn test_builder_splits_lines() {
        let mut builder = FragmentBuilder::new();
        builder.push_text("one\ntwo", plain());
        let fragment = builder.finish();
        assert_eq!(fragment.paragraphs().len(), 2);
        assert_eq!(fragment.plain_text(), "one\ntwo");
    }

    #[test]
    fn test_builder_nests_environments() {
        let mut builder = FragmentBuilder::new();
        builder.push_text("a", plain());
        builder.open_environment(EnvironmentKind::quote(None)).unwrap();
        builder.push_text("\nquoted\n", plain());
        assert_eq!(builder.depth(), 1);
        builder.close_environment();
        builder.push_text("\nb", plain());
        let fragment = builder.finish();
        // "a" [quote: "quoted"] "b"
        assert_eq!(fragment.len(), 1 + (6 + 2) + 1);
        assert_eq!(fragment.plain_text(), "a\nquoted\nb");
    }

    #[test]
    fn test_builder_rejects_code_in_code() {
        let mut builder = FragmentBuilder::new();
        builder.open_environment(EnvironmentKind::code(None)).unwrap();
        let err = builder.open_environment(EnvironmentKind::code(None)).unwrap_err();
        assert!(matches!(err, DocumentError::IllegalNesting { .. }));
        let err = builder.push_image(SecImage::new("x.png", 1, 1)).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::IllegalNesting {
                child: NestedContent::Image,
                ..
            }
        ));
    }

    #[test]
    fn test_code_drops_attributes() {
        let mut builder = FragmentBuilder::new();
        builder.open_environment(EnvironmentKind::code(None)).unwrap();
        builder.push_text("let x;", Arc::new(TextAttributes::new().with_bold(true)));
        builder.close_environment();
        let fragment = builder.finish();
        let env = fragment.paragraphs()[0].environment_data().unwrap();
        let sections = env.paragraphs[0].sections().unwrap();
        assert!(sections[0].attributes().unwrap().is_empty());
    }
}
