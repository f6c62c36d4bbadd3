//! Document tree: environments, paragraphs and content sections stored in an arena.
//!
//! Ownership is strictly downward: an [`Environment`] lists its paragraphs, a text
//! [`Paragraph`] lists its sections, an environment paragraph names its nested environment.
//! Upward links (`section -> paragraph -> environment -> parent paragraph`) are plain arena ids.
//!
//! The arena is only mutated through [`Document::splice`], which replaces a run of paragraphs of
//! one environment with owned [`ParagraphData`] and propagates the length change to every
//! ancestor. Visual lines are not stored here; they are derived by [`crate::layout`].

use crate::child_list::ChildList;
use crate::error::{DocumentError, NestedContent, Result};
use crate::fragment::{
    EnvironmentData, Fragment, ParagraphBody, ParagraphData, Section, ends_with_newline,
};
use slotmap::{SlotMap, new_key_type};
use std::fmt;
use std::ops::Range;

new_key_type! {
    /// Arena id of an environment.
    pub struct EnvId;
    /// Arena id of a paragraph.
    pub struct ParaId;
    /// Arena id of a content section.
    pub struct SectionId;
}

/// Discriminant of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentType {
    /// The document root.
    Root,
    /// Quotation block.
    Quote,
    /// Code block: plain text only.
    Code,
    /// List block.
    List,
}

impl EnvironmentType {
    /// Whether images may appear directly inside this environment.
    pub fn allows_images(self) -> bool {
        self != EnvironmentType::Code
    }

    /// Whether text inside this environment may carry attributes.
    pub fn allows_attributes(self) -> bool {
        self != EnvironmentType::Code
    }

    /// Whether an environment of type `child` may be nested here.
    pub fn allows_environment(self, child: EnvironmentType) -> bool {
        self != EnvironmentType::Code && child != EnvironmentType::Root
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvironmentType::Root => "root",
            EnvironmentType::Quote => "quote",
            EnvironmentType::Code => "code",
            EnvironmentType::List => "list",
        };
        f.write_str(name)
    }
}

/// Numbering style of a list environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListStyle {
    /// Bullet points.
    #[default]
    Bullet,
    /// `1.`, `2.`, ...
    Decimal,
    /// `a.`, `b.`, ...
    LowerAlpha,
    /// `A.`, `B.`, ...
    UpperAlpha,
}

impl ListStyle {
    /// Marker text for the list point with the given zero-based ordinal.
    pub fn marker(self, ordinal: usize) -> String {
        match self {
            ListStyle::Bullet => "\u{2022}".to_string(),
            ListStyle::Decimal => format!("{}.", ordinal + 1),
            ListStyle::LowerAlpha => format!("{}.", alpha(ordinal, b'a')),
            ListStyle::UpperAlpha => format!("{}.", alpha(ordinal, b'A')),
        }
    }
}

fn alpha(mut ordinal: usize, base: u8) -> String {
    let mut out = Vec::new();
    loop {
        out.push(base + (ordinal % 26) as u8);
        if ordinal < 26 {
            break;
        }
        ordinal = ordinal / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Environment type together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvironmentKind {
    /// The document root.
    Root,
    /// Quotation, optionally attributed.
    Quote {
        /// Quoted author.
        author: Option<String>,
    },
    /// Code block, optionally tagged with a highlight syntax id.
    Code {
        /// Highlight syntax id.
        syntax: Option<String>,
    },
    /// List with a numbering style.
    List {
        /// Numbering style.
        style: ListStyle,
    },
}

impl EnvironmentKind {
    /// Quote environment.
    pub fn quote(author: Option<String>) -> Self {
        EnvironmentKind::Quote { author }
    }

    /// Code environment.
    pub fn code(syntax: Option<String>) -> Self {
        EnvironmentKind::Code { syntax }
    }

    /// List environment.
    pub fn list(style: ListStyle) -> Self {
        EnvironmentKind::List { style }
    }

    /// Discriminant.
    pub fn env_type(&self) -> EnvironmentType {
        match self {
            EnvironmentKind::Root => EnvironmentType::Root,
            EnvironmentKind::Quote { .. } => EnvironmentType::Quote,
            EnvironmentKind::Code { .. } => EnvironmentType::Code,
            EnvironmentKind::List { .. } => EnvironmentType::List,
        }
    }
}

/// Horizontal paragraph alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alignment {
    /// Inherit from the enclosing environment (left at the root).
    #[default]
    Undefined,
    /// Left aligned.
    Left,
    /// Centered.
    Center,
    /// Right aligned.
    Right,
}

impl Alignment {
    /// `self`, or `inherited` when undefined.
    pub fn or(self, inherited: Alignment) -> Alignment {
        if self == Alignment::Undefined {
            inherited
        } else {
            self
        }
    }
}

/// Per-paragraph properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParagraphProps {
    /// Horizontal alignment.
    pub alignment: Alignment,
    /// Whether the paragraph starts a list point.
    pub list_point: bool,
}

impl ParagraphProps {
    /// Properties with the given alignment.
    pub fn aligned(alignment: Alignment) -> Self {
        Self {
            alignment,
            list_point: false,
        }
    }
}

/// Environment node.
#[derive(Debug, Clone)]
pub struct Environment {
    kind: EnvironmentKind,
    parent: Option<ParaId>,
    paragraphs: ChildList<ParaId>,
}

impl Environment {
    /// Type and parameters.
    pub fn kind(&self) -> &EnvironmentKind {
        &self.kind
    }

    /// Discriminant.
    pub fn env_type(&self) -> EnvironmentType {
        self.kind.env_type()
    }

    /// The paragraph that contains this environment (`None` for the root).
    pub fn parent(&self) -> Option<ParaId> {
        self.parent
    }

    /// Paragraphs with their lengths.
    pub fn paragraphs(&self) -> &ChildList<ParaId> {
        &self.paragraphs
    }

    /// Length of the content between the markers.
    pub fn content_len(&self) -> usize {
        self.paragraphs.total()
    }
}

/// Content of a paragraph node.
#[derive(Debug, Clone)]
pub enum ParagraphContent {
    /// Sections with their lengths.
    Text(ChildList<SectionId>),
    /// Nested environment.
    Environment(EnvId),
}

/// Paragraph node.
#[derive(Debug, Clone)]
pub struct Paragraph {
    environment: EnvId,
    props: ParagraphProps,
    content: ParagraphContent,
}

impl Paragraph {
    /// Owning environment.
    pub fn environment(&self) -> EnvId {
        self.environment
    }

    /// Alignment and list flag.
    pub fn props(&self) -> ParagraphProps {
        self.props
    }

    /// Sections or nested environment.
    pub fn content(&self) -> &ParagraphContent {
        &self.content
    }

    /// Nested environment id, for environment paragraphs.
    pub fn nested(&self) -> Option<EnvId> {
        match self.content {
            ParagraphContent::Environment(env) => Some(env),
            ParagraphContent::Text(_) => None,
        }
    }

    /// Section list, for text paragraphs.
    pub fn sections(&self) -> Option<&ChildList<SectionId>> {
        match &self.content {
            ParagraphContent::Text(list) => Some(list),
            ParagraphContent::Environment(_) => None,
        }
    }
}

/// Section node.
#[derive(Debug, Clone)]
pub struct SectionNode {
    paragraph: ParaId,
    section: Section,
}

impl SectionNode {
    /// Owning paragraph.
    pub fn paragraph(&self) -> ParaId {
        self.paragraph
    }

    /// Content.
    pub fn section(&self) -> &Section {
        &self.section
    }
}

/// Path from the root to an environment: the paragraph slot taken at every level.
///
/// Paths survive splices that do not touch the path itself, so history records use them instead
/// of arena ids (which change whenever a paragraph is rebuilt).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EnvPath(pub Vec<usize>);

impl EnvPath {
    /// The root environment.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Nesting depth (0 for the root).
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// What a [`Document::splice`] changed.
#[derive(Debug, Clone, Default)]
pub struct SpliceReport {
    /// Environment whose paragraphs were replaced.
    pub environment: Option<EnvId>,
    /// Paragraph slot of the first replaced paragraph.
    pub index: usize,
    /// Number of direct child slots removed at `index`.
    pub removed_slots: usize,
    /// Direct children now occupying the slots from `index`.
    pub inserted_slots: Vec<ParaId>,
    /// Freed paragraphs (including those inside freed environments).
    pub removed_paragraphs: Vec<ParaId>,
    /// Freed environments.
    pub removed_environments: Vec<EnvId>,
    /// Freed sections.
    pub removed_sections: Vec<SectionId>,
    /// Newly built paragraphs, nested ones included.
    pub inserted_paragraphs: Vec<ParaId>,
    /// Newly built environments.
    pub inserted_environments: Vec<EnvId>,
    /// Net change of the document length.
    pub delta: isize,
}

/// The document: one root environment plus everything below it.
#[derive(Debug, Clone)]
pub struct Document {
    envs: SlotMap<EnvId, Environment>,
    paragraphs: SlotMap<ParaId, Paragraph>,
    sections: SlotMap<SectionId, SectionNode>,
    root: EnvId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document: a root environment holding one empty paragraph.
    pub fn new() -> Self {
        let mut doc = Self {
            envs: SlotMap::with_key(),
            paragraphs: SlotMap::with_key(),
            sections: SlotMap::with_key(),
            root: EnvId::default(),
        };
        let mut report = SpliceReport::default();
        doc.root = doc.build_environment(None, EnvironmentData::new(EnvironmentKind::Root), &mut report);
        doc
    }

    /// Document whose root content is `fragment`.
    ///
    /// Fails when the fragment nests an environment the root cannot hold.
    pub fn from_fragment(fragment: Fragment) -> Result<Self> {
        let mut doc = Self::new();
        if !fragment.is_empty() {
            let root = doc.root;
            doc.splice(root, 0, 1, fragment.into_paragraphs())?;
        }
        Ok(doc)
    }

    /// Total length: leaf units plus two markers per sub-environment.
    pub fn len(&self) -> usize {
        self.envs[self.root].paragraphs.total()
    }

    /// `true` when the document holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root environment id.
    pub fn root(&self) -> EnvId {
        self.root
    }

    /// Environment node.
    pub fn environment(&self, id: EnvId) -> Option<&Environment> {
        self.envs.get(id)
    }

    /// Paragraph node.
    pub fn paragraph(&self, id: ParaId) -> Option<&Paragraph> {
        self.paragraphs.get(id)
    }

    /// Section node.
    pub fn section(&self, id: SectionId) -> Option<&SectionNode> {
        self.sections.get(id)
    }

    /// Number of sub-environments (the root excluded).
    pub fn environment_count(&self) -> usize {
        self.envs.len() - 1
    }

    /// Number of paragraphs.
    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    /// Sum of all section lengths.
    pub fn leaf_len(&self) -> usize {
        self.sections.values().map(|s| s.section.len()).sum()
    }

    /// Length of a paragraph in index units.
    pub fn paragraph_len(&self, id: ParaId) -> usize {
        match &self.paragraphs[id].content {
            ParagraphContent::Text(list) => list.total(),
            ParagraphContent::Environment(env) => self.envs[*env].paragraphs.total() + 2,
        }
    }

    /// Whether a text paragraph carries its terminating `'\n'`.
    pub fn is_terminated(&self, id: ParaId) -> bool {
        let Some(ParagraphContent::Text(list)) = self.paragraphs.get(id).map(|p| &p.content)
        else {
            return false;
        };
        match list.last().map(|s| &self.sections[s].section) {
            Some(section) => ends_with_newline(std::slice::from_ref(section)),
            None => false,
        }
    }

    /// Nesting depth of an environment (0 for the root).
    pub fn depth(&self, env: EnvId) -> usize {
        let mut depth = 0;
        let mut current = env;
        while let Some(parent) = self.envs.get(current).and_then(|e| e.parent) {
            current = self.paragraphs[parent].environment;
            depth += 1;
        }
        depth
    }

    /// Path from the root to `env`.
    pub fn env_path(&self, env: EnvId) -> EnvPath {
        let mut slots = Vec::new();
        let mut current = env;
        while let Some(parent) = self.envs.get(current).and_then(|e| e.parent) {
            let outer = self.paragraphs[parent].environment;
            if let Some(slot) = self.envs[outer].paragraphs.index_of(parent) {
                slots.push(slot);
            }
            current = outer;
        }
        slots.reverse();
        EnvPath(slots)
    }

    /// Environment reached by following `path` from the root.
    pub fn resolve_path(&self, path: &EnvPath) -> Option<EnvId> {
        let mut env = self.root;
        for slot in &path.0 {
            let para = self.envs.get(env)?.paragraphs.get(*slot)?;
            env = self.paragraphs.get(para)?.nested()?;
        }
        Some(env)
    }

    /// Global index of the first content unit of `env`.
    pub fn content_start(&self, env: EnvId) -> usize {
        match self.envs[env].parent {
            None => 0,
            Some(parent) => self.paragraph_start(parent) + 1,
        }
    }

    /// Global index of the first unit of `para`.
    pub fn paragraph_start(&self, para: ParaId) -> usize {
        let env = self.paragraphs[para].environment;
        let slot = self.envs[env].paragraphs.index_of(para).unwrap_or(0);
        self.content_start(env) + self.envs[env].paragraphs.start_of(slot)
    }

    /// Global span of `para`.
    pub fn paragraph_range(&self, para: ParaId) -> Range<usize> {
        let start = self.paragraph_start(para);
        start..start + self.paragraph_len(para)
    }

    /// Global span of `env` including its markers (the whole document for the root).
    pub fn environment_range(&self, env: EnvId) -> Range<usize> {
        match self.envs[env].parent {
            None => 0..self.len(),
            Some(parent) => self.paragraph_range(parent),
        }
    }

    /// Global index of the first unit of `section`.
    pub fn section_start(&self, section: SectionId) -> usize {
        let para = self.sections[section].paragraph;
        let offset = match &self.paragraphs[para].content {
            ParagraphContent::Text(list) => list
                .index_of(section)
                .map(|slot| list.start_of(slot))
                .unwrap_or(0),
            ParagraphContent::Environment(_) => 0,
        };
        self.paragraph_start(para) + offset
    }

    /// Owned copy of a paragraph.
    pub fn paragraph_data(&self, para: ParaId) -> ParagraphData {
        let paragraph = &self.paragraphs[para];
        let body = match &paragraph.content {
            ParagraphContent::Text(list) => ParagraphBody::Text(
                list.keys()
                    .map(|s| self.sections[s].section.clone())
                    .collect(),
            ),
            ParagraphContent::Environment(env) => {
                ParagraphBody::Environment(self.environment_data(*env))
            }
        };
        ParagraphData {
            props: paragraph.props,
            body,
        }
    }

    /// Owned copy of an environment.
    pub fn environment_data(&self, env: EnvId) -> EnvironmentData {
        let environment = &self.envs[env];
        EnvironmentData {
            kind: environment.kind.clone(),
            paragraphs: self.paragraphs_data(env, 0..environment.paragraphs.len()),
        }
    }

    /// Owned copies of the paragraphs in `slots` of `env`.
    pub fn paragraphs_data(&self, env: EnvId, slots: Range<usize>) -> Vec<ParagraphData> {
        self.envs[env]
            .paragraphs
            .keys_in(slots)
            .map(|p| self.paragraph_data(p))
            .collect()
    }

    /// The whole root content as a fragment.
    pub fn to_fragment(&self) -> Fragment {
        Fragment::new(self.environment_data(self.root).paragraphs)
    }

    /// Replace `remove` paragraphs of `env` starting at slot `index` with `insert`.
    ///
    /// Freed ids are never reused by the returned report's inserted ids within the same call.
    /// The environment must keep at least one paragraph.
    pub fn splice(
        &mut self,
        env: EnvId,
        index: usize,
        remove: usize,
        insert: Vec<ParagraphData>,
    ) -> Result<SpliceReport> {
        let environment = self
            .envs
            .get(env)
            .ok_or(DocumentError::IllegalState("splice into unknown environment"))?;
        let count = environment.paragraphs.len();
        if index + remove > count {
            return Err(DocumentError::IllegalState("splice range out of bounds"));
        }
        if remove == count && insert.is_empty() {
            return Err(DocumentError::IllegalState("environment would become empty"));
        }
        let parent_type = environment.env_type();
        for paragraph in &insert {
            if let ParagraphBody::Environment(data) = &paragraph.body
                && !parent_type.allows_environment(data.kind.env_type())
            {
                return Err(DocumentError::IllegalNesting {
                    parent: parent_type,
                    child: NestedContent::Environment(data.kind.env_type()),
                });
            }
        }

        let old_total = environment.paragraphs.total();
        let doomed: Vec<ParaId> = environment.paragraphs.keys_in(index..index + remove).collect();

        let mut report = SpliceReport {
            environment: Some(env),
            index,
            removed_slots: remove,
            ..SpliceReport::default()
        };
        for para in doomed {
            self.free_paragraph(para, &mut report);
        }
        let built: Vec<(ParaId, usize)> = insert
            .into_iter()
            .map(|data| self.build_paragraph(env, data, &mut report))
            .collect();
        report.inserted_slots = built.iter().map(|(para, _)| *para).collect();

        let environment = &mut self.envs[env];
        environment.paragraphs.splice(index, remove, built);
        let new_total = environment.paragraphs.total();
        self.propagate_len(env);

        report.delta = new_total as isize - old_total as isize;
        tracing::debug!(
            index,
            remove,
            inserted = report.inserted_paragraphs.len(),
            delta = report.delta,
            "document splice"
        );
        Ok(report)
    }

    /// Change the kind of a sub-environment; returns the previous kind.
    pub fn set_environment_kind(&mut self, env: EnvId, kind: EnvironmentKind) -> Result<EnvironmentKind> {
        let environment = self
            .envs
            .get(env)
            .ok_or(DocumentError::IllegalState("unknown environment"))?;
        let Some(parent) = environment.parent else {
            return Err(DocumentError::IllegalState("the root environment cannot be retyped"));
        };
        let outer = self.envs[self.paragraphs[parent].environment].env_type();
        let new_type = kind.env_type();
        if !outer.allows_environment(new_type) {
            return Err(DocumentError::IllegalNesting {
                parent: outer,
                child: NestedContent::Environment(new_type),
            });
        }
        if new_type != environment.env_type() {
            let data = self.environment_data(env);
            Fragment::new(data.paragraphs).validate_nesting(new_type)?;
        }
        let environment = &mut self.envs[env];
        Ok(std::mem::replace(&mut environment.kind, kind))
    }

    /// Check every structural invariant; returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.validate_environment(self.root, None)?;
        let expected = self.leaf_len() + 2 * self.environment_count();
        if self.len() != expected {
            return Err(format!("length {} != leaves + markers {}", self.len(), expected));
        }
        Ok(())
    }

    fn validate_environment(&self, env: EnvId, parent: Option<ParaId>) -> std::result::Result<(), String> {
        let environment = self.envs.get(env).ok_or("dangling environment id")?;
        if environment.parent != parent {
            return Err("environment parent link mismatch".to_string());
        }
        if environment.paragraphs.is_empty() {
            return Err("environment without paragraphs".to_string());
        }
        let keys: Vec<ParaId> = environment.paragraphs.keys().collect();
        for (slot, para) in keys.iter().enumerate() {
            let paragraph = self.paragraphs.get(*para).ok_or("dangling paragraph id")?;
            if paragraph.environment != env {
                return Err("paragraph environment link mismatch".to_string());
            }
            if environment.paragraphs.child_len(slot) != self.paragraph_len(*para) {
                return Err(format!("stale paragraph length at slot {slot}"));
            }
            let next_is_text = keys
                .get(slot + 1)
                .is_some_and(|next| matches!(self.paragraphs[*next].content, ParagraphContent::Text(_)));
            match &paragraph.content {
                ParagraphContent::Text(list) => {
                    for (i, section) in list.keys().enumerate() {
                        let node = self.sections.get(section).ok_or("dangling section id")?;
                        if node.paragraph != *para {
                            return Err("section paragraph link mismatch".to_string());
                        }
                        if list.child_len(i) != node.section.len() {
                            return Err("stale section length".to_string());
                        }
                    }
                    if self.is_terminated(*para) != next_is_text {
                        return Err(format!("bad paragraph terminator at slot {slot}"));
                    }
                }
                ParagraphContent::Environment(child) => {
                    let child_type = self.envs.get(*child).ok_or("dangling environment id")?.env_type();
                    if !environment.env_type().allows_environment(child_type) {
                        return Err(format!("{child_type} nested in {}", environment.env_type()));
                    }
                    self.validate_environment(*child, Some(*para))?;
                }
            }
        }
        Ok(())
    }

    fn propagate_len(&mut self, mut env: EnvId) {
        while let Some(parent) = self.envs[env].parent {
            let len = self.envs[env].paragraphs.total() + 2;
            let outer = self.paragraphs[parent].environment;
            let list = &mut self.envs[outer].paragraphs;
            if let Some(slot) = list.index_of(parent) {
                list.set_len(slot, len);
            }
            env = outer;
        }
    }

    fn build_paragraph(
        &mut self,
        env: EnvId,
        data: ParagraphData,
        report: &mut SpliceReport,
    ) -> (ParaId, usize) {
        let para = self.paragraphs.insert(Paragraph {
            environment: env,
            props: data.props,
            content: ParagraphContent::Text(ChildList::new()),
        });
        report.inserted_paragraphs.push(para);
        let (content, len) = match data.body {
            ParagraphBody::Text(sections) => {
                let entries: Vec<(SectionId, usize)> = sections
                    .into_iter()
                    .map(|section| {
                        let len = section.len();
                        let id = self.sections.insert(SectionNode {
                            paragraph: para,
                            section,
                        });
                        (id, len)
                    })
                    .collect();
                let list = ChildList::from_entries(entries);
                let len = list.total();
                (ParagraphContent::Text(list), len)
            }
            ParagraphBody::Environment(data) => {
                let child = self.build_environment(Some(para), data, report);
                let len = self.envs[child].paragraphs.total() + 2;
                (ParagraphContent::Environment(child), len)
            }
        };
        self.paragraphs[para].content = content;
        (para, len)
    }

    fn build_environment(
        &mut self,
        parent: Option<ParaId>,
        data: EnvironmentData,
        report: &mut SpliceReport,
    ) -> EnvId {
        let env = self.envs.insert(Environment {
            kind: data.kind,
            parent,
            paragraphs: ChildList::new(),
        });
        report.inserted_environments.push(env);
        let mut paragraphs = data.paragraphs;
        if paragraphs.is_empty() {
            paragraphs.push(ParagraphData::empty());
        }
        let entries: Vec<(ParaId, usize)> = paragraphs
            .into_iter()
            .map(|p| self.build_paragraph(env, p, report))
            .collect();
        self.envs[env].paragraphs = ChildList::from_entries(entries);
        env
    }

    fn free_paragraph(&mut self, para: ParaId, report: &mut SpliceReport) {
        let Some(paragraph) = self.paragraphs.remove(para) else {
            return;
        };
        report.removed_paragraphs.push(para);
        match paragraph.content {
            ParagraphContent::Text(list) => {
                for section in list.keys() {
                    self.sections.remove(section);
                    report.removed_sections.push(section);
                }
            }
            ParagraphContent::Environment(env) => {
                if let Some(environment) = self.envs.remove(env) {
                    report.removed_environments.push(env);
                    for child in environment.paragraphs.keys() {
                        self.free_paragraph(child, report);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::TextAttributes;
    use std::sync::Arc;

    fn text(s: &str) -> ParagraphData {
        ParagraphData::text(vec![Section::text(s, Arc::new(TextAttributes::new()))])
    }

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert_eq!(doc.len(), 0);
        assert_eq!(doc.paragraph_count(), 1);
        assert_eq!(doc.environment_count(), 0);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_splice_propagates_lengths() {
        let mut doc = Document::new();
        let root = doc.root();
        let quote = EnvironmentData {
            kind: EnvironmentKind::quote(None),
            paragraphs: vec![text("abc")],
        };
        doc.splice(root, 0, 1, vec![text("x"), ParagraphData::environment(quote)])
            .unwrap();
        // "x" is followed by an environment, so it carries no terminator.
        assert_eq!(doc.len(), 1 + 3 + 2);
        assert!(doc.validate().is_ok());

        let quote_para = doc.environment(root).unwrap().paragraphs().get(1).unwrap();
        let quote_env = doc.paragraph(quote_para).unwrap().nested().unwrap();
        assert_eq!(doc.env_path(quote_env), EnvPath(vec![1]));
        assert_eq!(doc.resolve_path(&EnvPath(vec![1])), Some(quote_env));
        assert_eq!(doc.content_start(quote_env), 2);
        assert_eq!(doc.environment_range(quote_env), 1..6);

        doc.splice(quote_env, 0, 1, vec![text("abcdef")]).unwrap();
        assert_eq!(doc.len(), 1 + 6 + 2);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_splice_rejects_emptying_environment() {
        let mut doc = Document::new();
        let root = doc.root();
        assert_eq!(
            doc.splice(root, 0, 1, Vec::new()).unwrap_err(),
            DocumentError::IllegalState("environment would become empty")
        );
    }

    #[test]
    fn test_list_markers() {
        assert_eq!(ListStyle::Decimal.marker(0), "1.");
        assert_eq!(ListStyle::LowerAlpha.marker(27), "ab.");
        assert_eq!(ListStyle::UpperAlpha.marker(2), "C.");
    }
}
