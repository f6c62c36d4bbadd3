//! Pure transforms over a window of owned paragraphs.
//!
//! Every edit works the same way: the edit engine copies the paragraphs touched by the edit
//! range out of the arena, runs one of the transforms below on the copy, and splices the result
//! back. Positions passed here are local to the window start. A transform that returns an error
//! leaves the caller's window untouched.

use crate::attributes::TextAttributes;
use crate::error::{DocumentError, Result};
use crate::fragment::{
    EnvironmentData, Fragment, ParagraphBody, ParagraphData, Section, coalesce, cut_sections,
    split_sections,
};
use crate::tree::{Alignment, EnvironmentType, ParagraphProps};
use std::sync::Arc;

/// Whether a window reaches the start/end of its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub at_start: bool,
    pub at_end: bool,
}

impl Bounds {
    /// A window that is a whole environment (or a detached fragment).
    pub const DETACHED: Bounds = Bounds {
        at_start: true,
        at_end: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NormalizeOptions {
    /// Keep empty text paragraphs that follow an environment paragraph.
    pub keep_trailing: bool,
    /// Merge neighbouring runs with equal attributes.
    pub coalesce: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_trailing: false,
            coalesce: true,
        }
    }
}

/// How paragraphs created by an insertion get their properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropsRule {
    /// Keep the properties carried by the inserted paragraphs.
    AsGiven,
    /// Copy the properties of the paragraph the insertion splits.
    Inherit,
    /// Use these properties for every new paragraph.
    Explicit(ParagraphProps),
}

/// Owned copy of the paragraphs touched by an edit.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub paragraphs: Vec<ParagraphData>,
    pub bounds: Bounds,
    pub env_type: EnvironmentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Text { slot: usize, offset: usize },
    Slot(usize),
}

/// Where an insertion at `pos` lands: inside a text paragraph if any text paragraph's caret
/// range holds `pos`, otherwise between paragraphs (before an environment wins over after one).
fn find_anchor(paragraphs: &[ParagraphData], pos: usize) -> Option<Anchor> {
    let mut start = 0;
    let mut before = None;
    let mut after = None;
    for (slot, paragraph) in paragraphs.iter().enumerate() {
        let len = paragraph.len();
        if paragraph.is_text() {
            if start <= pos && pos <= start + paragraph.caret_end() {
                return Some(Anchor::Text {
                    slot,
                    offset: pos - start,
                });
            }
        } else {
            if start == pos && before.is_none() {
                before = Some(slot);
            }
            if start + len == pos {
                after = Some(slot + 1);
            }
        }
        start += len;
    }
    before.or(after).map(Anchor::Slot)
}

/// Inner range of an environment paragraph spanning local `[0, len)` that `[a, b)` covers,
/// expressed in the environment's content coordinates.
fn inner_range(a: usize, b: usize, len: usize) -> Option<(usize, usize)> {
    let lo = a.max(1) - 1;
    let hi = b.min(len - 1).saturating_sub(1);
    (lo < hi).then_some((lo, hi))
}

impl Window {
    /// Insert `fragment` at local `pos`. Returns the inserted length.
    pub fn insert(
        &mut self,
        pos: usize,
        fragment: Fragment,
        rule: PropsRule,
        plain: &Arc<TextAttributes>,
    ) -> Result<usize> {
        let mut fragment = fragment;
        fragment.validate_nesting(self.env_type)?;
        if !self.env_type.allows_attributes() {
            fragment.strip_attributes(plain);
        }
        let inserted = fragment.len();
        let incoming = fragment.into_paragraphs();
        if incoming.is_empty() {
            return Ok(0);
        }
        let anchor = find_anchor(&self.paragraphs, pos)
            .ok_or(DocumentError::IllegalState("position outside the edit window"))?;

        let paragraphs = std::mem::take(&mut self.paragraphs);
        let mut out = Vec::with_capacity(paragraphs.len() + incoming.len() + 1);
        let mut rest = paragraphs.into_iter();

        match anchor {
            Anchor::Slot(slot) => {
                out.extend(rest.by_ref().take(slot));
                out.extend(incoming);
            }
            Anchor::Text { slot, offset } => {
                out.extend(rest.by_ref().take(slot));
                let Some(target) = rest.next() else {
                    return Err(DocumentError::IllegalState("edit window lost its anchor"));
                };
                let props = target.props;
                let sections = match target.body {
                    ParagraphBody::Text(sections) => sections,
                    ParagraphBody::Environment(_) => Vec::new(),
                };
                let (head, tail) = split_sections(sections, offset);
                let count = incoming.len();
                let tail_props = match rule {
                    PropsRule::Explicit(explicit) if count > 1 => explicit,
                    _ => props,
                };

                for (i, mut paragraph) in incoming.into_iter().enumerate() {
                    if i > 0 {
                        match rule {
                            PropsRule::AsGiven => {}
                            PropsRule::Inherit => paragraph.props = props,
                            PropsRule::Explicit(explicit) => paragraph.props = explicit,
                        }
                    }
                    if i == 0 {
                        match paragraph.body {
                            ParagraphBody::Text(sections) => {
                                let mut merged = head.clone();
                                merged.extend(sections);
                                out.push(ParagraphData {
                                    props,
                                    body: ParagraphBody::Text(merged),
                                });
                            }
                            ParagraphBody::Environment(_) => {
                                out.push(ParagraphData {
                                    props,
                                    body: ParagraphBody::Text(head.clone()),
                                });
                                out.push(paragraph);
                            }
                        }
                    } else {
                        out.push(paragraph);
                    }
                }

                match out.last_mut().map(|p| &mut p.body) {
                    Some(ParagraphBody::Text(sections)) => sections.extend(tail),
                    _ => out.push(ParagraphData {
                        props: tail_props,
                        body: ParagraphBody::Text(tail),
                    }),
                }
            }
        }

        out.extend(rest);
        self.paragraphs = out;
        Ok(inserted)
    }

    /// Remove local `[s, e)`. Environments survive unless both markers are covered.
    pub fn remove(&mut self, s: usize, e: usize) {
        remove_range(&mut self.paragraphs, s, e);
    }

    /// Owned copy of local `[s, e)`.
    pub fn slice(&self, s: usize, e: usize) -> Fragment {
        Fragment::new(slice_range(&self.paragraphs, s, e))
    }

    /// Map the attributes of every text run in local `[s, e)`; code environments are skipped.
    pub fn map_attributes<F>(&mut self, s: usize, e: usize, map: &mut F)
    where
        F: FnMut(&Arc<TextAttributes>) -> Arc<TextAttributes>,
    {
        map_attributes_range(&mut self.paragraphs, self.env_type, s, e, map);
    }

    /// Set the alignment of every paragraph whose caret span meets the closed range `[s, e]`.
    pub fn set_alignment(&mut self, s: usize, e: usize, alignment: Alignment) {
        align_range(&mut self.paragraphs, s, e, alignment);
    }

    /// Restore the paragraph invariants after a transform.
    pub fn normalize(&mut self, options: NormalizeOptions) {
        normalize(&mut self.paragraphs, self.bounds, options);
    }
}

fn remove_range(paragraphs: &mut Vec<ParagraphData>, s: usize, e: usize) {
    let mut start = 0;
    let mut out = Vec::with_capacity(paragraphs.len());
    for mut paragraph in paragraphs.drain(..) {
        let len = paragraph.len();
        let end = start + len;
        let a = s.max(start);
        let b = e.min(end);
        if a >= b {
            out.push(paragraph);
            start = end;
            continue;
        }
        let (a, b) = (a - start, b - start);
        let keep = match &mut paragraph.body {
            ParagraphBody::Text(sections) => {
                let (kept, _) = cut_sections(std::mem::take(sections), a, b);
                *sections = kept;
                true
            }
            ParagraphBody::Environment(_) if a == 0 && b == len => false,
            ParagraphBody::Environment(env) => {
                if let Some((lo, hi)) = inner_range(a, b, len) {
                    remove_range(&mut env.paragraphs, lo, hi);
                    normalize(
                        &mut env.paragraphs,
                        Bounds::DETACHED,
                        NormalizeOptions::default(),
                    );
                }
                true
            }
        };
        if keep {
            out.push(paragraph);
        }
        start = end;
    }
    *paragraphs = out;
}

fn slice_range(paragraphs: &[ParagraphData], s: usize, e: usize) -> Vec<ParagraphData> {
    let mut start = 0;
    let mut out = Vec::new();
    for paragraph in paragraphs {
        let len = paragraph.len();
        let end = start + len;
        let a = s.max(start);
        let b = e.min(end);
        if a < b {
            let (a, b) = (a - start, b - start);
            match &paragraph.body {
                ParagraphBody::Text(sections) => {
                    let (_, middle) = cut_sections(sections.clone(), a, b);
                    out.push(ParagraphData {
                        props: paragraph.props,
                        body: ParagraphBody::Text(middle),
                    });
                }
                ParagraphBody::Environment(env) => {
                    if a == 0 && b == len {
                        out.push(paragraph.clone());
                    } else {
                        let inner = match inner_range(a, b, len) {
                            Some((lo, hi)) => slice_range(&env.paragraphs, lo, hi),
                            None => Vec::new(),
                        };
                        let data = EnvironmentData::with_content(env.kind.clone(), Fragment::new(inner));
                        out.push(ParagraphData {
                            props: paragraph.props,
                            body: ParagraphBody::Environment(data),
                        });
                    }
                }
            }
        }
        start = end;
    }
    out
}

fn map_attributes_range<F>(
    paragraphs: &mut [ParagraphData],
    env_type: EnvironmentType,
    s: usize,
    e: usize,
    map: &mut F,
) where
    F: FnMut(&Arc<TextAttributes>) -> Arc<TextAttributes>,
{
    let mut start = 0;
    for paragraph in paragraphs.iter_mut() {
        let len = paragraph.len();
        let end = start + len;
        let a = s.max(start);
        let b = e.min(end);
        if a < b {
            let (a, b) = (a - start, b - start);
            match &mut paragraph.body {
                ParagraphBody::Text(sections) if env_type.allows_attributes() => {
                    let (mut head, rest) = split_sections(std::mem::take(sections), a);
                    let (middle, tail) = split_sections(rest, b - a);
                    for mut section in middle {
                        if let Section::Text(text) = &mut section {
                            text.attributes = map(&text.attributes);
                        }
                        head.push(section);
                    }
                    head.extend(tail);
                    coalesce(&mut head);
                    *sections = head;
                }
                ParagraphBody::Text(_) => {}
                ParagraphBody::Environment(env) => {
                    if let Some((lo, hi)) = inner_range(a, b, len) {
                        let child = env.kind.env_type();
                        map_attributes_range(&mut env.paragraphs, child, lo, hi, map);
                    }
                }
            }
        }
        start = end;
    }
}

fn align_range(paragraphs: &mut [ParagraphData], s: usize, e: usize, alignment: Alignment) {
    let mut start = 0;
    for paragraph in paragraphs.iter_mut() {
        let len = paragraph.len();
        let end = start + len;
        let caret_end = paragraph.caret_end();
        match &mut paragraph.body {
            ParagraphBody::Text(_) => {
                if start <= e && start + caret_end >= s {
                    paragraph.props.alignment = alignment;
                }
            }
            ParagraphBody::Environment(env) => {
                if s <= start && end <= e {
                    paragraph.props.alignment = alignment;
                }
                let content_start = start + 1;
                let content_end = end - 1;
                if s <= content_end && e >= content_start {
                    let lo = s.max(content_start) - content_start;
                    let hi = e.min(content_end) - content_start;
                    align_range(&mut env.paragraphs, lo, hi, alignment);
                }
            }
        }
        start = end;
    }
}

/// Merge unterminated text paragraphs into their text successors, drop empty paragraphs that
/// only separate an environment from its surroundings, and tidy up section runs.
pub(crate) fn normalize(paragraphs: &mut Vec<ParagraphData>, bounds: Bounds, options: NormalizeOptions) {
    for paragraph in paragraphs.iter_mut() {
        if let ParagraphBody::Text(sections) = &mut paragraph.body {
            if options.coalesce {
                coalesce(sections);
            } else {
                sections.retain(|s| !s.is_empty());
            }
        }
    }

    let mut i = 0;
    while i + 1 < paragraphs.len() {
        let mergeable = paragraphs[i].is_text()
            && !paragraphs[i].is_terminated()
            && paragraphs[i + 1].is_text();
        if !mergeable {
            i += 1;
            continue;
        }
        let next = paragraphs.remove(i + 1);
        if let (ParagraphBody::Text(into), ParagraphBody::Text(from)) =
            (&mut paragraphs[i].body, next.body)
        {
            into.extend(from);
            if options.coalesce {
                coalesce(into);
            }
        }
    }

    let mut i = 0;
    while i < paragraphs.len() {
        let droppable = paragraphs.len() > 1
            && paragraphs[i].is_text()
            && paragraphs[i].is_empty()
            && if i == 0 {
                bounds.at_start
            } else {
                !paragraphs[i - 1].is_text() && !options.keep_trailing
            };
        if droppable {
            paragraphs.remove(i);
        } else {
            i += 1;
        }
    }
}
