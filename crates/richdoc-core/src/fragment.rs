//! Owned snapshots of document content.
//!
//! The live tree stores its nodes in an arena (see [`crate::tree`]). Everything that has to
//! outlive a single edit (clipboard content, history records, exporter input, parser output) is
//! expressed with the owned types of this module instead: [`Section`], [`ParagraphData`],
//! [`EnvironmentData`] and [`Fragment`]. Ropes and `Arc`s make cloning them cheap.
//!
//! # Paragraph termination
//!
//! A text paragraph ends with a literal `'\n'` exactly when the next paragraph of the same
//! environment is also a text paragraph. The boundary between a text paragraph and an
//! environment paragraph is carried by the environment markers instead, so it costs no index.

use crate::attributes::{TextAttributes, same_attributes};
use crate::error::{DocumentError, NestedContent, Result};
use crate::image::SecImage;
use crate::tree::{EnvironmentKind, EnvironmentType, ParagraphProps};
use ropey::Rope;
use std::sync::Arc;

/// Character used for images in plain-text renderings.
pub const OBJECT_REPLACEMENT: char = '\u{FFFC}';

/// Character used for environment markers in plain-text renderings.
pub const MARKER_CHAR: char = '\n';

/// A styled run of characters.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSection {
    /// The characters of the run.
    pub text: Rope,
    /// Shared formatting of the whole run.
    pub attributes: Arc<TextAttributes>,
}

/// An image (or smiley) occupying one index.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSection {
    /// Shared image value.
    pub image: Arc<SecImage>,
}

/// Leaf content of a text paragraph.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// Styled text run.
    Text(TextSection),
    /// Image or smiley.
    Image(ImageSection),
}

impl Section {
    /// Text run from a string slice.
    pub fn text(text: &str, attributes: Arc<TextAttributes>) -> Self {
        Section::Text(TextSection {
            text: Rope::from_str(text),
            attributes,
        })
    }

    /// Image section.
    pub fn image(image: impl Into<Arc<SecImage>>) -> Self {
        Section::Image(ImageSection {
            image: image.into(),
        })
    }

    /// Length in global index units.
    pub fn len(&self) -> usize {
        match self {
            Section::Text(t) => t.text.len_chars(),
            Section::Image(_) => 1,
        }
    }

    /// `true` for an empty text run.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attributes of a text run.
    pub fn attributes(&self) -> Option<&Arc<TextAttributes>> {
        match self {
            Section::Text(t) => Some(&t.attributes),
            Section::Image(_) => None,
        }
    }

    /// Append the plain-text rendering of this section to `out`.
    pub fn write_plain(&self, out: &mut String) {
        match self {
            Section::Text(t) => out.extend(t.text.chars()),
            Section::Image(_) => out.push(OBJECT_REPLACEMENT),
        }
    }
}

/// Owned content of one paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphData {
    /// Alignment and list flag.
    pub props: ParagraphProps,
    /// Either text sections or a nested environment.
    pub body: ParagraphBody,
}

/// Body of a paragraph.
#[derive(Debug, Clone, PartialEq)]
pub enum ParagraphBody {
    /// Text and image sections (possibly none).
    Text(Vec<Section>),
    /// A nested environment as the sole content.
    Environment(EnvironmentData),
}

/// Owned content of one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentData {
    /// Environment type and its parameters.
    pub kind: EnvironmentKind,
    /// Paragraphs; never empty.
    pub paragraphs: Vec<ParagraphData>,
}

impl EnvironmentData {
    /// Environment holding one empty paragraph.
    pub fn new(kind: EnvironmentKind) -> Self {
        Self {
            kind,
            paragraphs: vec![ParagraphData::empty()],
        }
    }

    /// Environment holding `content`.
    pub fn with_content(kind: EnvironmentKind, content: Fragment) -> Self {
        let mut paragraphs = content.into_paragraphs();
        if paragraphs.is_empty() {
            paragraphs.push(ParagraphData::empty());
        }
        Self { kind, paragraphs }
    }

    /// Length of the content between the markers.
    pub fn content_len(&self) -> usize {
        self.paragraphs.iter().map(ParagraphData::len).sum()
    }

    /// Length including both markers.
    pub fn len(&self) -> usize {
        self.content_len() + 2
    }
}

impl ParagraphData {
    /// Text paragraph from sections.
    pub fn text(sections: Vec<Section>) -> Self {
        Self {
            props: ParagraphProps::default(),
            body: ParagraphBody::Text(sections),
        }
    }

    /// Empty text paragraph.
    pub fn empty() -> Self {
        Self::text(Vec::new())
    }

    /// Paragraph wrapping an environment.
    pub fn environment(data: EnvironmentData) -> Self {
        Self {
            props: ParagraphProps::default(),
            body: ParagraphBody::Environment(data),
        }
    }

    /// Builder: replace the paragraph properties.
    pub fn with_props(mut self, props: ParagraphProps) -> Self {
        self.props = props;
        self
    }

    /// Length in global index units (markers included for environment paragraphs).
    pub fn len(&self) -> usize {
        match &self.body {
            ParagraphBody::Text(sections) => sections_len(sections),
            ParagraphBody::Environment(env) => env.len(),
        }
    }

    /// `true` for a zero-length text paragraph.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a text paragraph.
    pub fn is_text(&self) -> bool {
        matches!(self.body, ParagraphBody::Text(_))
    }

    /// Whether this text paragraph ends with its `'\n'`.
    pub fn is_terminated(&self) -> bool {
        match &self.body {
            ParagraphBody::Text(sections) => ends_with_newline(sections),
            ParagraphBody::Environment(_) => false,
        }
    }

    /// Sections of a text paragraph.
    pub fn sections(&self) -> Option<&[Section]> {
        match &self.body {
            ParagraphBody::Text(sections) => Some(sections),
            ParagraphBody::Environment(_) => None,
        }
    }

    /// Nested environment of an environment paragraph.
    pub fn environment_data(&self) -> Option<&EnvironmentData> {
        match &self.body {
            ParagraphBody::Environment(env) => Some(env),
            ParagraphBody::Text(_) => None,
        }
    }

    /// Last caret offset that still belongs to this text paragraph.
    pub(crate) fn caret_end(&self) -> usize {
        let len = self.len();
        if self.is_terminated() { len - 1 } else { len }
    }
}

/// A well-formed run of paragraphs, detached from any document.
///
/// The last paragraph is never terminated, so a fragment can be spliced into the middle of a
/// text paragraph. An empty fragment has no paragraph at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    paragraphs: Vec<ParagraphData>,
}

impl Fragment {
    /// Build a fragment from arbitrary paragraphs, repairing terminators and merging runs.
    pub fn new(paragraphs: Vec<ParagraphData>) -> Self {
        let mut paragraphs = paragraphs;
        repair_terminators(&mut paragraphs);
        crate::transform::normalize(
            &mut paragraphs,
            crate::transform::Bounds::DETACHED,
            crate::transform::NormalizeOptions::default(),
        );
        if paragraphs.iter().all(ParagraphData::is_empty) {
            paragraphs.clear();
        }
        Self { paragraphs }
    }

    /// Empty fragment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plain text, one paragraph per `'\n'`-separated line.
    pub fn from_text(text: &str, attributes: Arc<TextAttributes>) -> Self {
        if text.is_empty() {
            return Self::empty();
        }
        let mut paragraphs = Vec::new();
        let mut rest = text;
        loop {
            match rest.find('\n') {
                Some(i) => {
                    let line = &rest[..=i];
                    paragraphs.push(ParagraphData::text(vec![Section::text(
                        line,
                        Arc::clone(&attributes),
                    )]));
                    rest = &rest[i + 1..];
                }
                None => {
                    let sections = if rest.is_empty() {
                        Vec::new()
                    } else {
                        vec![Section::text(rest, Arc::clone(&attributes))]
                    };
                    paragraphs.push(ParagraphData::text(sections));
                    break;
                }
            }
        }
        Self { paragraphs }
    }

    /// A single image.
    pub fn image(image: impl Into<Arc<SecImage>>) -> Self {
        Self {
            paragraphs: vec![ParagraphData::text(vec![Section::image(image)])],
        }
    }

    /// A single environment paragraph.
    pub fn environment(data: EnvironmentData, props: ParagraphProps) -> Self {
        Self {
            paragraphs: vec![ParagraphData::environment(data).with_props(props)],
        }
    }

    /// The paragraphs.
    pub fn paragraphs(&self) -> &[ParagraphData] {
        &self.paragraphs
    }

    /// Take the paragraphs.
    pub fn into_paragraphs(self) -> Vec<ParagraphData> {
        self.paragraphs
    }

    /// Length in global index units.
    pub fn len(&self) -> usize {
        self.paragraphs.iter().map(ParagraphData::len).sum()
    }

    /// `true` when the fragment holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain-text rendering (images as U+FFFC, markers as `'\n'`); its char count equals `len()`.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        write_plain(&self.paragraphs, &mut out);
        out
    }

    /// Check that every piece of the fragment may live inside a `parent` environment.
    pub fn validate_nesting(&self, parent: EnvironmentType) -> Result<()> {
        validate_paragraphs(parent, &self.paragraphs)
    }

    /// Replace every text attribute with `plain` (used for code environments).
    pub(crate) fn strip_attributes(&mut self, plain: &Arc<TextAttributes>) {
        strip_paragraphs(&mut self.paragraphs, plain);
    }
}

pub(crate) fn sections_len(sections: &[Section]) -> usize {
    sections.iter().map(Section::len).sum()
}

pub(crate) fn ends_with_newline(sections: &[Section]) -> bool {
    for section in sections.iter().rev() {
        match section {
            Section::Text(t) => {
                let n = t.text.len_chars();
                if n == 0 {
                    continue;
                }
                return t.text.char(n - 1) == '\n';
            }
            Section::Image(_) => return false,
        }
    }
    false
}

/// Split at `offset`; a straddled text run is cut in two and keeps its attributes on both halves.
pub(crate) fn split_sections(sections: Vec<Section>, offset: usize) -> (Vec<Section>, Vec<Section>) {
    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut pos = 0;
    for section in sections {
        let len = section.len();
        if pos + len <= offset {
            head.push(section);
        } else if pos >= offset {
            tail.push(section);
        } else if let Section::Text(TextSection {
            mut text,
            attributes,
        }) = section
        {
            let right = text.split_off(offset - pos);
            head.push(Section::Text(TextSection {
                text,
                attributes: Arc::clone(&attributes),
            }));
            tail.push(Section::Text(TextSection {
                text: right,
                attributes,
            }));
        }
        pos += len;
    }
    (head, tail)
}

/// Cut `[a, b)` out of `sections`; returns `(kept, removed)`.
pub(crate) fn cut_sections(
    sections: Vec<Section>,
    a: usize,
    b: usize,
) -> (Vec<Section>, Vec<Section>) {
    let (mut head, rest) = split_sections(sections, a);
    let (middle, tail) = split_sections(rest, b - a);
    head.extend(tail);
    (head, middle)
}

/// Drop empty runs and merge neighbouring runs with equal attributes.
pub(crate) fn coalesce(sections: &mut Vec<Section>) {
    let mut out: Vec<Section> = Vec::with_capacity(sections.len());
    for section in sections.drain(..) {
        if section.is_empty() {
            continue;
        }
        if let Section::Text(cur) = &section
            && let Some(Section::Text(prev)) = out.last_mut()
            && same_attributes(&prev.attributes, &cur.attributes)
        {
            prev.text.append(cur.text.clone());
            continue;
        }
        out.push(section);
    }
    *sections = out;
}

pub(crate) fn write_plain(paragraphs: &[ParagraphData], out: &mut String) {
    for paragraph in paragraphs {
        match &paragraph.body {
            ParagraphBody::Text(sections) => {
                for section in sections {
                    section.write_plain(out);
                }
            }
            ParagraphBody::Environment(env) => {
                out.push(MARKER_CHAR);
                write_plain(&env.paragraphs, out);
                out.push(MARKER_CHAR);
            }
        }
    }
}

fn validate_paragraphs(parent: EnvironmentType, paragraphs: &[ParagraphData]) -> Result<()> {
    for paragraph in paragraphs {
        match &paragraph.body {
            ParagraphBody::Text(sections) => {
                if !parent.allows_images()
                    && sections.iter().any(|s| matches!(s, Section::Image(_)))
                {
                    return Err(DocumentError::IllegalNesting {
                        parent,
                        child: NestedContent::Image,
                    });
                }
            }
            ParagraphBody::Environment(env) => {
                let child = env.kind.env_type();
                if !parent.allows_environment(child) {
                    return Err(DocumentError::IllegalNesting {
                        parent,
                        child: NestedContent::Environment(child),
                    });
                }
                validate_paragraphs(child, &env.paragraphs)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn strip_paragraphs(paragraphs: &mut [ParagraphData], plain: &Arc<TextAttributes>) {
    for paragraph in paragraphs {
        match &mut paragraph.body {
            ParagraphBody::Text(sections) => {
                for section in sections.iter_mut() {
                    if let Section::Text(t) = section {
                        t.attributes = Arc::clone(plain);
                    }
                }
                coalesce(sections);
            }
            ParagraphBody::Environment(env) => strip_paragraphs(&mut env.paragraphs, plain),
        }
    }
}

/// Give every text paragraph followed by a text paragraph its `'\n'`, take it away from the
/// others, and make sure environments are never empty.
fn repair_terminators(paragraphs: &mut [ParagraphData]) {
    let next_is_text: Vec<bool> = (0..paragraphs.len())
        .map(|i| paragraphs.get(i + 1).is_some_and(ParagraphData::is_text))
        .collect();
    for (paragraph, next_text) in paragraphs.iter_mut().zip(next_is_text) {
        match &mut paragraph.body {
            ParagraphBody::Text(sections) => {
                let terminated = ends_with_newline(sections);
                if next_text && !terminated {
                    let attributes = sections
                        .iter()
                        .rev()
                        .find_map(|s| s.attributes().cloned())
                        .unwrap_or_default();
                    sections.push(Section::text("\n", attributes));
                } else if !next_text && terminated {
                    strip_newline(sections);
                }
            }
            ParagraphBody::Environment(env) => {
                if env.paragraphs.is_empty() {
                    env.paragraphs.push(ParagraphData::empty());
                }
                repair_terminators(&mut env.paragraphs);
            }
        }
    }
}

fn strip_newline(sections: &mut Vec<Section>) {
    while let Some(Section::Text(t)) = sections.last_mut() {
        let n = t.text.len_chars();
        if n == 0 {
            sections.pop();
            continue;
        }
        t.text.remove(n - 1..n);
        if n == 1 {
            sections.pop();
        }
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Arc<TextAttributes> {
        Arc::new(TextAttributes::new())
    }

    #[test]
    fn test_from_text_terminators() {
        let f = Fragment::from_text("ab\ncd\n", plain());
        assert_eq!(f.paragraphs().len(), 3);
        assert!(f.paragraphs()[0].is_terminated());
        assert!(f.paragraphs()[1].is_terminated());
        assert!(f.paragraphs()[2].is_empty());
        assert_eq!(f.len(), 6);
        assert_eq!(f.plain_text(), "ab\ncd\n");
    }

    #[test]
    fn test_split_and_coalesce() {
        let bold = Arc::new(TextAttributes::new().with_bold(true));
        let sections = vec![Section::text("hello", plain()), Section::text("world", bold)];
        let (head, tail) = split_sections(sections, 3);
        assert_eq!(sections_len(&head), 3);
        assert_eq!(sections_len(&tail), 7);

        let mut joined = head;
        joined.extend(tail);
        coalesce(&mut joined);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_new_repairs_terminators() {
        let f = Fragment::new(vec![
            ParagraphData::text(vec![Section::text("a", plain())]),
            ParagraphData::text(vec![Section::text("b\n", plain())]),
        ]);
        assert_eq!(f.plain_text(), "a\nb");
    }

    #[test]
    fn test_code_rejects_images_and_environments() {
        let image = Fragment::image(SecImage::new("x.png", 1, 1));
        assert!(image.validate_nesting(EnvironmentType::Code).is_err());
        assert!(image.validate_nesting(EnvironmentType::Quote).is_ok());

        let code = Fragment::environment(
            EnvironmentData::new(EnvironmentKind::code(None)),
            ParagraphProps::default(),
        );
        assert_eq!(
            code.validate_nesting(EnvironmentType::Code),
            Err(DocumentError::IllegalNesting {
                parent: EnvironmentType::Code,
                child: NestedContent::Environment(EnvironmentType::Code),
            })
        );
    }
}
