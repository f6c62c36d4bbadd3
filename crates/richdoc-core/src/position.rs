//! Global position model.
//!
//! Every character and every image occupies one index. A sub-environment adds two indices: the
//! enter marker in front of its content and the leave marker after it. Positions are caret slots:
//! position `p` is the slot in front of the unit at index `p`, and `len()` is the slot after the
//! last unit.
//!
//! For an environment whose enter marker sits at index `k` and leave marker at index `m`:
//!
//! - caret `k` is outside, in front of the environment,
//! - carets `k + 1 ..= m` are inside, from content start to content end,
//! - caret `m + 1` is outside, behind the environment.
//!
//! When a caret slot is claimed both by a text paragraph and by an environment boundary, the text
//! paragraph wins. A terminated text paragraph owns the slots up to (not past) its `'\n'`.

use crate::attributes::TextAttributes;
use crate::error::{DocumentError, Result};
use crate::fragment::{Fragment, MARKER_CHAR, OBJECT_REPLACEMENT, Section};
use crate::transform::{Bounds, Window};
use crate::tree::{Alignment, Document, EnvId, ParaId, ParagraphContent, SectionId};
use std::ops::Range;
use std::sync::Arc;

/// Where a caret slot sits relative to its paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Inside a text paragraph.
    Text {
        /// Offset from the paragraph start.
        offset: usize,
        /// Section holding the unit at `offset` (or the last section at paragraph end).
        section: Option<SectionId>,
        /// Offset inside `section`.
        section_offset: usize,
    },
    /// In front of an environment paragraph.
    BeforeEnvironment,
    /// Behind an environment paragraph.
    AfterEnvironment,
}

/// A resolved caret slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Innermost environment whose content holds the slot.
    pub environment: EnvId,
    /// Paragraph the slot belongs to.
    pub paragraph: ParaId,
    /// Slot of `paragraph` within `environment`.
    pub slot: usize,
    /// Placement within the paragraph.
    pub placement: Placement,
}

/// One index unit of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// A character of a text section.
    Char {
        /// Owning section.
        section: SectionId,
        /// Offset inside the section.
        offset: usize,
    },
    /// An image section.
    Image(SectionId),
    /// Enter marker of an environment.
    Enter(EnvId),
    /// Leave marker of an environment.
    Leave(EnvId),
}

/// Paragraph run touched by an edit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EditWindow {
    pub environment: EnvId,
    pub first: usize,
    pub count: usize,
    /// Global index of the window start.
    pub base: usize,
    pub bounds: Bounds,
}

impl Document {
    /// Fail with `InvalidPosition` unless `pos` is a caret slot.
    pub fn check_position(&self, pos: usize) -> Result<()> {
        let len = self.len();
        if pos > len {
            return Err(DocumentError::InvalidPosition { position: pos, len });
        }
        Ok(())
    }

    /// Fail with `InvalidRange` unless `start <= end <= len`.
    pub fn check_range(&self, start: usize, end: usize) -> Result<()> {
        let len = self.len();
        if start > end || end > len {
            return Err(DocumentError::InvalidRange { start, end, len });
        }
        Ok(())
    }

    /// Resolve a caret slot to its environment, paragraph and section.
    pub fn resolve(&self, pos: usize) -> Result<Location> {
        self.check_position(pos)?;
        let (env, base) = self.innermost(pos, pos);
        let list = self.environment(env).map(|e| e.paragraphs());
        let Some(list) = list else {
            return Err(DocumentError::IllegalState("dangling environment"));
        };
        let local = pos - base;
        let mut before = None;
        let mut after = None;
        for slot in list.touching(local, local) {
            let Some(para) = list.get(slot) else { continue };
            let start = list.start_of(slot);
            let end = list.end_of(slot);
            match self.paragraph(para).map(|p| p.content()) {
                Some(ParagraphContent::Text(sections)) => {
                    let caret_end = if self.is_terminated(para) { end - 1 } else { end };
                    if local <= caret_end {
                        let offset = local - start;
                        let (section, section_offset) = match sections.find(offset) {
                            Some((i, o)) => (sections.get(i), o),
                            None => match sections.last() {
                                Some(last) => (Some(last), sections.child_len(sections.len() - 1)),
                                None => (None, 0),
                            },
                        };
                        return Ok(Location {
                            environment: env,
                            paragraph: para,
                            slot,
                            placement: Placement::Text {
                                offset,
                                section,
                                section_offset,
                            },
                        });
                    }
                }
                Some(ParagraphContent::Environment(_)) => {
                    if start == local && before.is_none() {
                        before = Some((slot, para));
                    }
                    if end == local {
                        after = Some((slot, para));
                    }
                }
                None => {}
            }
        }
        let (slot, paragraph, placement) = match (before, after) {
            (Some((slot, para)), _) => (slot, para, Placement::BeforeEnvironment),
            (None, Some((slot, para))) => (slot, para, Placement::AfterEnvironment),
            (None, None) => return Err(DocumentError::IllegalState("unresolvable position")),
        };
        Ok(Location {
            environment: env,
            paragraph,
            slot,
            placement,
        })
    }

    /// Global caret slot of a resolved location.
    pub fn position_of(&self, location: &Location) -> usize {
        let start = self.paragraph_start(location.paragraph);
        match location.placement {
            Placement::Text { offset, .. } => start + offset,
            Placement::BeforeEnvironment => start,
            Placement::AfterEnvironment => start + self.paragraph_len(location.paragraph),
        }
    }

    /// The unit occupying index `index` (`None` at `len()`).
    pub fn unit_at(&self, index: usize) -> Option<Unit> {
        let mut env = self.root();
        let mut local = index;
        loop {
            let list = self.environment(env)?.paragraphs();
            let (slot, offset) = list.find(local)?;
            let para = list.get(slot)?;
            match self.paragraph(para)?.content() {
                ParagraphContent::Text(sections) => {
                    let (i, o) = sections.find(offset)?;
                    let section = sections.get(i)?;
                    return match self.section(section)?.section() {
                        Section::Text(_) => Some(Unit::Char { section, offset: o }),
                        Section::Image(_) => Some(Unit::Image(section)),
                    };
                }
                ParagraphContent::Environment(child) => {
                    let len = list.child_len(slot);
                    if offset == 0 {
                        return Some(Unit::Enter(*child));
                    }
                    if offset == len - 1 {
                        return Some(Unit::Leave(*child));
                    }
                    env = *child;
                    local = offset - 1;
                }
            }
        }
    }

    /// Attributes of the character at `index`, if that unit is a character.
    pub fn attributes_at(&self, index: usize) -> Option<Arc<TextAttributes>> {
        match self.unit_at(index)? {
            Unit::Char { section, .. } => self.section(section)?.section().attributes().cloned(),
            _ => None,
        }
    }

    /// Attributes newly typed text at caret `pos` should get: the character before the caret in
    /// the same paragraph, else the character after it.
    pub fn typing_attributes(&self, pos: usize) -> Option<Arc<TextAttributes>> {
        let location = self.resolve(pos).ok()?;
        let Placement::Text { offset, .. } = location.placement else {
            return None;
        };
        if offset > 0
            && let Some(attrs) = self.attributes_at(pos - 1)
        {
            return Some(attrs);
        }
        if pos < self.len() && !self.is_paragraph_end(&location, offset) {
            return self.attributes_at(pos);
        }
        None
    }

    fn is_paragraph_end(&self, location: &Location, offset: usize) -> bool {
        offset >= self.paragraph_len(location.paragraph)
    }

    /// Attributes shared by every character in `[start, end)`.
    pub fn common_attributes(&self, start: usize, end: usize) -> Result<TextAttributes> {
        self.check_range(start, end)?;
        let mut common: Option<TextAttributes> = None;
        self.visit_sections(self.root(), 0, start, end, &mut |section| {
            if let Section::Text(text) = section {
                common = Some(match common.take() {
                    None => (*text.attributes).clone(),
                    Some(acc) => acc.intersection(&text.attributes),
                });
            }
        });
        Ok(common.unwrap_or_default())
    }

    /// Plain text of `[start, end)`: images as U+FFFC, markers as `'\n'`.
    pub fn text(&self, start: usize, end: usize) -> Result<String> {
        self.check_range(start, end)?;
        let mut out = String::with_capacity(end - start);
        self.write_text(self.root(), 0, start, end, &mut out);
        Ok(out)
    }

    /// Plain text of the whole document.
    pub fn plain_text(&self) -> String {
        let mut out = String::with_capacity(self.len());
        self.write_text(self.root(), 0, 0, self.len(), &mut out);
        out
    }

    /// Owned copy of `[start, end)`. Environments cut by the range keep both markers.
    pub fn fragment(&self, start: usize, end: usize) -> Result<Fragment> {
        self.check_range(start, end)?;
        let window = self.edit_window(start, end);
        let data = self.window_data(&window);
        Ok(data.slice(start - window.base, end - window.base))
    }

    /// Innermost environment at `pos` (the root for top-level slots).
    pub fn environment_at(&self, pos: usize) -> Result<EnvId> {
        Ok(self.resolve(pos)?.environment)
    }

    /// Alignment in effect for the paragraph at `pos`, resolving `Undefined` through the
    /// enclosing environment paragraphs (left at the root).
    pub fn effective_alignment(&self, para: ParaId) -> Alignment {
        let mut current = Some(para);
        while let Some(id) = current {
            let Some(paragraph) = self.paragraph(id) else { break };
            let alignment = paragraph.props().alignment;
            if alignment != Alignment::Undefined {
                return alignment;
            }
            current = self
                .environment(paragraph.environment())
                .and_then(|e| e.parent());
        }
        Alignment::Left
    }

    /// Innermost environment whose content strictly holds both `s` and `e`, with the global
    /// index of its content start.
    pub(crate) fn innermost(&self, s: usize, e: usize) -> (EnvId, usize) {
        let mut env = self.root();
        let mut base = 0;
        loop {
            let Some(list) = self.environment(env).map(|e| e.paragraphs()) else {
                break;
            };
            let Some((slot, offset)) = list.find(s - base) else {
                break;
            };
            let Some(para) = list.get(slot) else { break };
            let Some(ParagraphContent::Environment(child)) =
                self.paragraph(para).map(|p| p.content())
            else {
                break;
            };
            if offset == 0 || e - base + 1 > list.end_of(slot) {
                break;
            }
            base += list.start_of(slot) + 1;
            env = *child;
        }
        (env, base)
    }

    /// Paragraph run of the innermost environment that the closed range `[s, e]` touches.
    pub(crate) fn edit_window(&self, s: usize, e: usize) -> EditWindow {
        let (environment, content_base) = self.innermost(s, e);
        let list = match self.environment(environment) {
            Some(env) => env.paragraphs(),
            None => {
                return EditWindow {
                    environment,
                    first: 0,
                    count: 0,
                    base: content_base,
                    bounds: Bounds::DETACHED,
                };
            }
        };
        let range = list.touching(s - content_base, e - content_base);
        let base = if range.start < list.len() {
            content_base + list.start_of(range.start)
        } else {
            content_base + list.total()
        };
        EditWindow {
            environment,
            first: range.start,
            count: range.len(),
            base,
            bounds: Bounds {
                at_start: range.start == 0,
                at_end: range.end == list.len(),
            },
        }
    }

    pub(crate) fn window_data(&self, window: &EditWindow) -> Window {
        Window {
            paragraphs: self
                .paragraphs_data(window.environment, window.first..window.first + window.count),
            bounds: window.bounds,
            env_type: self
                .environment(window.environment)
                .map(|e| e.env_type())
                .unwrap_or(crate::tree::EnvironmentType::Root),
        }
    }

    fn write_text(&self, env: EnvId, base: usize, s: usize, e: usize, out: &mut String) {
        if s >= e {
            return;
        }
        let Some(list) = self.environment(env).map(|e| e.paragraphs()) else {
            return;
        };
        for slot in list.touching(s - base, e - base) {
            let Some(para) = list.get(slot) else { continue };
            let span = list.span(slot);
            let (ps, pe) = (base + span.start, base + span.end);
            let (a, b) = (s.max(ps), e.min(pe));
            if a >= b {
                continue;
            }
            match self.paragraph(para).map(|p| p.content()) {
                Some(ParagraphContent::Text(sections)) => {
                    for i in sections.touching(a - ps, b - ps) {
                        let Some(id) = sections.get(i) else { continue };
                        let Some(node) = self.section(id) else { continue };
                        let sec_start = ps + sections.start_of(i);
                        let lo = a.max(sec_start) - sec_start;
                        let hi = b.min(sec_start + sections.child_len(i)) - sec_start;
                        if lo >= hi {
                            continue;
                        }
                        match node.section() {
                            Section::Text(text) => out.extend(text.text.slice(lo..hi).chars()),
                            Section::Image(_) => out.push(OBJECT_REPLACEMENT),
                        }
                    }
                }
                Some(ParagraphContent::Environment(child)) => {
                    if a == ps {
                        out.push(MARKER_CHAR);
                    }
                    let inner = ps + 1..pe - 1;
                    let (lo, hi) = (a.max(inner.start), b.min(inner.end));
                    if lo < hi {
                        self.write_text(*child, inner.start, lo, hi, out);
                    }
                    if b == pe {
                        out.push(MARKER_CHAR);
                    }
                }
                None => {}
            }
        }
    }

    fn visit_sections(
        &self,
        env: EnvId,
        base: usize,
        s: usize,
        e: usize,
        visit: &mut dyn FnMut(&Section),
    ) {
        if s >= e {
            return;
        }
        let Some(list) = self.environment(env).map(|e| e.paragraphs()) else {
            return;
        };
        for slot in list.touching(s - base, e - base) {
            let Some(para) = list.get(slot) else { continue };
            let span: Range<usize> = list.span(slot);
            let (ps, pe) = (base + span.start, base + span.end);
            let (a, b) = (s.max(ps), e.min(pe));
            if a >= b {
                continue;
            }
            match self.paragraph(para).map(|p| p.content()) {
                Some(ParagraphContent::Text(sections)) => {
                    for i in sections.touching(a - ps, b - ps) {
                        let sec_start = ps + sections.start_of(i);
                        let sec_end = sec_start + sections.child_len(i);
                        if a.max(sec_start) >= b.min(sec_end) {
                            continue;
                        }
                        if let Some(node) = sections.get(i).and_then(|id| self.section(id)) {
                            visit(node.section());
                        }
                    }
                }
                Some(ParagraphContent::Environment(child)) => {
                    let (lo, hi) = (a.max(ps + 1), b.min(pe - 1));
                    if lo < hi {
                        self.visit_sections(*child, ps + 1, lo, hi, visit);
                    }
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{EnvironmentData, ParagraphData};
    use crate::tree::EnvironmentKind;

    fn plain() -> Arc<TextAttributes> {
        Arc::new(TextAttributes::new())
    }

    /// `ab` + quote(`cd`) + `ef`
    fn sample() -> Document {
        let mut paragraphs = Fragment::from_text("ab", plain()).into_paragraphs();
        paragraphs.push(ParagraphData::environment(EnvironmentData::with_content(
            EnvironmentKind::quote(None),
            Fragment::from_text("cd", plain()),
        )));
        paragraphs.extend(Fragment::from_text("ef", plain()).into_paragraphs());
        Document::from_fragment(Fragment::new(paragraphs)).unwrap()
    }

    #[test]
    fn test_resolve_round_trip() {
        let doc = sample();
        assert_eq!(doc.len(), 8);
        for pos in 0..=doc.len() {
            let location = doc.resolve(pos).unwrap();
            assert_eq!(doc.position_of(&location), pos, "position {pos}");
        }
    }

    #[test]
    fn test_marker_slots() {
        let doc = sample();
        let quote = doc.environment_at(3).unwrap();
        assert_ne!(quote, doc.root());
        // Slot 2 is the end of "ab", which is text and therefore wins over "before quote".
        assert_eq!(doc.environment_at(2).unwrap(), doc.root());
        assert_eq!(doc.environment_at(5).unwrap(), quote);
        assert_eq!(doc.environment_at(6).unwrap(), doc.root());
        assert_eq!(doc.unit_at(2), Some(Unit::Enter(quote)));
        assert_eq!(doc.unit_at(5), Some(Unit::Leave(quote)));
    }

    #[test]
    fn test_text_renders_markers() {
        let doc = sample();
        assert_eq!(doc.plain_text(), "ab\ncd\nef");
        assert_eq!(doc.text(1, 4).unwrap(), "b\nc");
        assert_eq!(doc.text(3, 4).unwrap(), "c");
        assert!(doc.text(4, 3).is_err());
        assert!(doc.text(0, 9).is_err());
    }

    #[test]
    fn test_fragment_keeps_markers_of_cut_environment() {
        let doc = sample();
        let fragment = doc.fragment(1, 4).unwrap();
        assert_eq!(fragment.plain_text(), "b\nc\n");
    }
}
