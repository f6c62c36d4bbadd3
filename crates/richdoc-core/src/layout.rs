//! Layout pipeline.
//!
//! Derives visual lines, line heights and paragraph offsets from the document tree. Fonts come
//! from an injected [`FontMetrics`] provider and line breaks from an injected [`WrapStrategy`].
//!
//! The pipeline caches one [`ParagraphLayout`] per text paragraph and one [`EnvironmentLayout`]
//! per environment. Edits never recompute everything: they mark nodes in a dirty work queue
//! ([`DirtyFlags`] per node id) and [`LayoutPipeline::refresh`] only revisits those nodes, then
//! walks up the environment chain while heights keep changing. Paragraph offsets live in a
//! [`ChildList`] of slot heights, so one changed height costs O(log n) to propagate.

use crate::attributes::{AttributeId, AttributeTable, TextAttributes, TextPosition};
use crate::child_list::ChildList;
use crate::fragment::{OBJECT_REPLACEMENT, Section};
use crate::image::ImageCache;
use crate::position::Placement;
use crate::tree::{
    Alignment, Document, EnvId, EnvironmentKind, EnvironmentType, ListStyle, ParaId,
    ParagraphContent, SpliceReport,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::ops::Range;
use unicode_width::UnicodeWidthChar;

/// Default tab width (in space advances).
pub const DEFAULT_TAB_WIDTH: usize = 4;

/// Font size used when a run sets none.
pub const DEFAULT_FONT_SIZE: f32 = 12.0;

/// Scale applied to sub- and superscript text.
const SCRIPT_SCALE: f32 = 0.7;

/// Soft wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// No soft wrapping: every paragraph is a single line.
    None,
    /// Break before the first unit that overflows the available width.
    #[default]
    Pixel,
    /// Prefer breaking after whitespace, falling back to pixel wrapping.
    Word,
    /// Break after a fixed number of characters regardless of their width.
    Char,
}

/// Axis-aligned rectangle in layout units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl Rect {
    /// Create a rectangle.
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Whether the vertical extents of `self` and `[top, bottom)` overlap.
    pub fn overlaps_rows(&self, top: f32, bottom: f32) -> bool {
        top < self.bottom() && bottom > self.y
    }

    /// Whether the point lies inside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Font request derived from a run's attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FontDescriptor {
    /// Family name, `None` for the provider default.
    pub family: Option<String>,
    /// Size in layout units, sub/superscript scaling already applied.
    pub size: f32,
    /// Bold weight.
    pub bold: bool,
    /// Italic style.
    pub italic: bool,
    /// Vertical position.
    pub position: TextPosition,
}

impl FontDescriptor {
    /// Descriptor for `attrs`, using `default_size` when no size is set.
    pub fn from_attributes(attrs: &TextAttributes, default_size: f32) -> Self {
        let position = attrs.position().unwrap_or_default();
        let base = attrs.font_size().map(|s| s as f32).unwrap_or(default_size);
        let size = match position {
            TextPosition::Normal => base,
            TextPosition::Subscript | TextPosition::Superscript => base * SCRIPT_SCALE,
        };
        Self {
            family: attrs.font_family().map(str::to_string),
            size,
            bold: attrs.bold().unwrap_or(false),
            italic: attrs.italic().unwrap_or(false),
            position,
        }
    }
}

/// Vertical font metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalMetrics {
    /// Distance from baseline to the top of the line box.
    pub ascent: f32,
    /// Distance from baseline to the bottom of the glyphs.
    pub descent: f32,
    /// Extra spacing below the descent.
    pub leading: f32,
}

impl VerticalMetrics {
    /// Full line height.
    pub fn line_height(&self) -> f32 {
        self.ascent + self.descent + self.leading
    }
}

/// Glyph measurement capability. `None` means "cannot measure"; the pipeline then falls back to
/// [`MonospaceMetrics`] instead of failing.
pub trait FontMetrics {
    /// Vertical metrics of a font.
    fn vertical_metrics(&self, font: &FontDescriptor) -> Option<VerticalMetrics>;
    /// Horizontal advance of `ch`.
    fn advance(&self, ch: char, font: &FontDescriptor) -> Option<f32>;
}

/// Cell-grid metrics: every narrow character is `size * cell_ratio` wide, wide characters twice
/// that (UAX #11).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMetrics {
    /// Cell width as a fraction of the font size.
    pub cell_ratio: f32,
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self { cell_ratio: 0.6 }
    }
}

impl FontMetrics for MonospaceMetrics {
    fn vertical_metrics(&self, font: &FontDescriptor) -> Option<VerticalMetrics> {
        Some(VerticalMetrics {
            ascent: font.size * 0.8,
            descent: font.size * 0.2,
            leading: font.size * 0.2,
        })
    }

    fn advance(&self, ch: char, font: &FontDescriptor) -> Option<f32> {
        let cells = UnicodeWidthChar::width(ch).unwrap_or(0);
        Some(cells as f32 * font.size * self.cell_ratio)
    }
}

/// A font resolved for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFont {
    /// The request.
    pub descriptor: FontDescriptor,
    /// Vertical metrics.
    pub metrics: VerticalMetrics,
    /// Baseline offset (negative raises superscript).
    pub baseline_shift: f32,
}

/// Resolved fonts keyed by attribute identity.
///
/// Tied to one [`AttributeTable`] generation: when the table is cleared the cache drops its
/// entries on the next lookup.
#[derive(Debug, Clone, Default)]
pub struct FontCache {
    fonts: HashMap<AttributeId, ResolvedFont>,
    generation: u32,
}

impl FontCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached fonts.
    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    /// `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Drop every cached font.
    pub fn clear(&mut self) {
        self.fonts.clear();
    }

    /// Font for `attrs`.
    pub fn resolve(
        &mut self,
        attrs: &TextAttributes,
        table: &mut AttributeTable,
        metrics: &dyn FontMetrics,
        default_size: f32,
    ) -> ResolvedFont {
        if table.generation() != self.generation {
            self.fonts.clear();
            self.generation = table.generation();
        }
        let id = table.identify(attrs);
        if let Some(font) = self.fonts.get(&id) {
            return font.clone();
        }
        let descriptor = FontDescriptor::from_attributes(attrs, default_size);
        let vertical = metrics.vertical_metrics(&descriptor).unwrap_or_else(|| {
            tracing::warn!(size = descriptor.size, "font metrics unavailable, using monospace estimate");
            fallback_vertical(&descriptor)
        });
        let baseline_shift = match descriptor.position {
            TextPosition::Normal => 0.0,
            TextPosition::Subscript => vertical.ascent * 0.3,
            TextPosition::Superscript => -vertical.ascent * 0.6,
        };
        let font = ResolvedFont {
            descriptor,
            metrics: vertical,
            baseline_shift,
        };
        self.fonts.insert(id, font.clone());
        font
    }
}

fn fallback_vertical(font: &FontDescriptor) -> VerticalMetrics {
    MonospaceMetrics::default()
        .vertical_metrics(font)
        .unwrap_or(VerticalMetrics {
            ascent: font.size,
            descent: 0.0,
            leading: 0.0,
        })
}

/// Input of a wrap strategy: one paragraph's units and their advances.
#[derive(Debug, Clone, Copy)]
pub struct WrapInput<'a> {
    /// Units (images appear as U+FFFC, the terminator as `'\n'`).
    pub chars: &'a [char],
    /// Advance of every unit.
    pub advances: &'a [f32],
    /// Available width.
    pub width: f32,
}

/// Line breaking capability. Returns the unit indices where new lines start, ascending, never 0.
pub trait WrapStrategy {
    /// Break points for one paragraph.
    fn break_points(&self, input: &WrapInput<'_>) -> Vec<usize>;
}

/// Never wraps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWrap;

impl WrapStrategy for NoWrap {
    fn break_points(&self, _input: &WrapInput<'_>) -> Vec<usize> {
        Vec::new()
    }
}

/// Breaks before the first unit that does not fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelWrap;

impl WrapStrategy for PixelWrap {
    fn break_points(&self, input: &WrapInput<'_>) -> Vec<usize> {
        let mut breaks = Vec::new();
        let mut x = 0.0f32;
        for (i, (&ch, &advance)) in input.chars.iter().zip(input.advances).enumerate() {
            if ch == '\n' {
                continue;
            }
            // A unit wider than the whole line still gets a line of its own.
            if x + advance > input.width && x > 0.0 {
                breaks.push(i);
                x = 0.0;
            }
            x += advance;
        }
        breaks
    }
}

/// Breaks after whitespace when possible, otherwise like [`PixelWrap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WordWrap;

impl WrapStrategy for WordWrap {
    fn break_points(&self, input: &WrapInput<'_>) -> Vec<usize> {
        let mut breaks = Vec::new();
        let mut segment_start = 0usize;
        let mut segment_x = 0.0f32;
        // (unit index after the whitespace, x in line at that point)
        let mut last_break: Option<(usize, f32)> = None;
        let mut x = 0.0f32;

        for (i, (&ch, &advance)) in input.chars.iter().zip(input.advances).enumerate() {
            if ch == '\n' {
                continue;
            }
            loop {
                let x_in_segment = x - segment_x;
                if x_in_segment + advance <= input.width || x_in_segment == 0.0 {
                    break;
                }
                if let Some((at, at_x)) = last_break
                    && at > segment_start
                {
                    breaks.push(at);
                    segment_start = at;
                    segment_x = at_x;
                    last_break = None;
                    continue;
                }
                breaks.push(i);
                segment_start = i;
                segment_x = x;
                last_break = None;
                break;
            }
            x += advance;
            if ch.is_whitespace() {
                last_break = Some((i + 1, x));
            }
        }
        breaks
    }
}

/// Breaks after a fixed number of units.
#[derive(Debug, Clone, Copy)]
pub struct CharWrap {
    /// Units per line.
    pub columns: usize,
}

impl WrapStrategy for CharWrap {
    fn break_points(&self, input: &WrapInput<'_>) -> Vec<usize> {
        let columns = self.columns.max(1);
        let visible = input.chars.iter().filter(|&&c| c != '\n').count();
        (1..)
            .map(|k| k * columns)
            .take_while(|&at| at < visible)
            .collect()
    }
}

/// Strategy object for a [`WrapMode`].
pub fn wrap_strategy(mode: WrapMode, columns: usize) -> Box<dyn WrapStrategy> {
    match mode {
        WrapMode::None => Box::new(NoWrap),
        WrapMode::Pixel => Box::new(PixelWrap),
        WrapMode::Word => Box::new(WordWrap),
        WrapMode::Char => Box::new(CharWrap { columns }),
    }
}

bitflags! {
    /// Pending work for one node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u8 {
        /// Units changed: re-measure and re-wrap.
        const CONTENT = 1;
        /// Fonts changed: re-measure.
        const FONT = 1 << 1;
        /// Available width changed: re-wrap.
        const WIDTH = 1 << 2;
        /// Paragraph heights inside an environment changed: recompute offsets.
        const OFFSETS = 1 << 3;
    }
}

/// Geometry knobs of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    /// Width of the root content.
    pub viewport_width: f32,
    /// Tab advance in spaces.
    pub tab_width: usize,
    /// Horizontal inset of quote environments.
    pub quote_inset: f32,
    /// Horizontal inset of code environments.
    pub code_inset: f32,
    /// Horizontal inset of list environments (room for markers).
    pub list_inset: f32,
    /// Vertical padding above and below a sub-environment's content.
    pub environment_padding: f32,
    /// Vertical space between paragraphs.
    pub paragraph_spacing: f32,
    /// Font size of runs without an explicit size.
    pub default_font_size: f32,
    /// Size of images whose size is unknown.
    pub image_placeholder: (u32, u32),
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            viewport_width: 600.0,
            tab_width: DEFAULT_TAB_WIDTH,
            quote_inset: 16.0,
            code_inset: 12.0,
            list_inset: 24.0,
            environment_padding: 4.0,
            paragraph_spacing: 0.0,
            default_font_size: DEFAULT_FONT_SIZE,
            image_placeholder: (16, 16),
        }
    }
}

/// Space an environment reserves around its content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Insets {
    /// Left.
    pub left: f32,
    /// Right.
    pub right: f32,
    /// Top.
    pub top: f32,
    /// Bottom.
    pub bottom: f32,
}

impl LayoutConfig {
    /// Insets of an environment of `kind`.
    pub fn insets(&self, kind: &EnvironmentKind) -> Insets {
        let pad = self.environment_padding;
        match kind.env_type() {
            EnvironmentType::Root => Insets::default(),
            EnvironmentType::Quote => Insets {
                left: self.quote_inset,
                right: 0.0,
                top: pad,
                bottom: pad,
            },
            EnvironmentType::Code => Insets {
                left: self.code_inset,
                right: self.code_inset,
                top: pad,
                bottom: pad,
            },
            EnvironmentType::List => Insets {
                left: self.list_inset,
                right: 0.0,
                top: pad,
                bottom: pad,
            },
        }
    }
}

/// Capabilities and caches a refresh (or a paint) needs.
pub struct LayoutContext<'a> {
    /// Glyph measurement.
    pub metrics: &'a dyn FontMetrics,
    /// Line breaking.
    pub wrap: &'a dyn WrapStrategy,
    /// Attribute identities.
    pub attributes: &'a mut AttributeTable,
    /// Fonts by attribute identity.
    pub fonts: &'a mut FontCache,
    /// Loaded image sizes.
    pub images: &'a ImageCache,
}

/// One soft-wrapped line of a text paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct LineLayout {
    /// Unit range `[start, end)` within the paragraph.
    pub units: Range<usize>,
    /// Section slots intersecting the line.
    pub sections: Range<usize>,
    /// Top relative to the paragraph top.
    pub y: f32,
    /// Line height.
    pub height: f32,
    /// Baseline relative to the line top.
    pub baseline: f32,
    /// Horizontal alignment offset.
    pub x: f32,
    /// Width of the line's content.
    pub width: f32,
}

/// Cached layout of a text paragraph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParagraphLayout {
    /// Lines top to bottom; never empty after layout.
    pub lines: Vec<LineLayout>,
    /// `xs[i]` = x of unit `i` relative to its line's start; one extra entry for the end.
    pub xs: Vec<f32>,
    /// Total height.
    pub height: f32,
    /// Width available when the paragraph was wrapped.
    pub available_width: f32,
}

impl ParagraphLayout {
    /// Line holding unit offset `offset` (the last line for the paragraph end).
    pub fn line_index_at(&self, offset: usize) -> usize {
        let index = self.lines.partition_point(|l| l.units.end <= offset);
        index.min(self.lines.len().saturating_sub(1))
    }

    /// Caret x for `offset`, relative to the paragraph left edge.
    pub fn x_at(&self, offset: usize) -> f32 {
        let line = self.line_index_at(offset);
        let base = self.lines.get(line).map(|l| l.x).unwrap_or(0.0);
        base + self.xs.get(offset).copied().unwrap_or(0.0)
    }
}

/// Cached layout of an environment's content.
///
/// Positions are relative to the content top. Each paragraph slot measures its height plus
/// the paragraph spacing below it; the spacing after the last slot is not part of the content.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentLayout {
    /// Slot extents keyed by paragraph id.
    extents: ChildList<ParaId, f32>,
    /// 1 for list points, 0 otherwise; prefix sums number the markers.
    points: ChildList<ParaId, usize>,
    list_style: Option<ListStyle>,
    spacing: f32,
    /// Content width.
    pub content_width: f32,
    /// Insets around the content.
    pub insets: Insets,
    /// Total height including vertical insets.
    pub height: f32,
}

impl EnvironmentLayout {
    /// Number of paragraph slots.
    pub fn slot_count(&self) -> usize {
        self.extents.len()
    }

    /// Height of the content, without insets.
    pub fn content_height(&self) -> f32 {
        if self.extents.is_empty() {
            0.0
        } else {
            (self.extents.total() - self.spacing).max(0.0)
        }
    }

    /// Top of `slot`; the content bottom for `slot >= slot_count()`.
    pub fn top(&self, slot: usize) -> f32 {
        if slot < self.extents.len() {
            self.extents.start_of(slot)
        } else {
            self.content_height()
        }
    }

    /// Bottom of the paragraph in `slot`, spacing excluded.
    pub fn bottom(&self, slot: usize) -> f32 {
        self.extents.end_of(slot) - self.spacing
    }

    /// Paragraph slot covering content-relative `y` (clamped).
    pub fn slot_at(&self, y: f32) -> usize {
        let index = self.extents.first_end_where(|end| end > y);
        index.min(self.extents.len().saturating_sub(1))
    }

    /// Slots intersecting the content-relative band `[top, bottom)`.
    pub fn visible(&self, top: f32, bottom: f32) -> Range<usize> {
        let first = self.extents.first_end_where(|end| end > top);
        let last = self.extents.first_start_where(|start| start >= bottom);
        first..last.max(first)
    }

    /// List marker of `slot`, for list points of list environments.
    pub fn marker(&self, slot: usize) -> Option<String> {
        let style = self.list_style?;
        if slot >= self.points.len() || self.points.child_len(slot) == 0 {
            return None;
        }
        Some(style.marker(self.points.start_of(slot)))
    }

    fn refresh_height(&mut self) {
        self.height = self.content_height() + self.insets.top + self.insets.bottom;
    }
}

/// Counters of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshStats {
    /// Text paragraphs re-measured and re-wrapped.
    pub paragraphs: usize,
    /// Environments whose offsets were recomputed.
    pub environments: usize,
    /// Units measured with the fallback estimate.
    pub metric_fallbacks: usize,
}

impl RefreshStats {
    /// Whether the pass did nothing.
    pub fn is_empty(&self) -> bool {
        self.paragraphs == 0 && self.environments == 0
    }
}

/// Incremental layout of one document.
#[derive(Debug, Clone)]
pub struct LayoutPipeline {
    config: LayoutConfig,
    paragraphs: HashMap<ParaId, ParagraphLayout>,
    environments: HashMap<EnvId, EnvironmentLayout>,
    dirty_paragraphs: HashMap<ParaId, DirtyFlags>,
    dirty_environments: HashMap<EnvId, DirtyFlags>,
    /// Slots whose extent must be re-read on the next refresh, per environment.
    stale_slots: HashMap<EnvId, HashSet<ParaId>>,
    needs_full: bool,
}

impl LayoutPipeline {
    /// Create a pipeline; the first refresh lays out everything.
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            config,
            paragraphs: HashMap::new(),
            environments: HashMap::new(),
            dirty_paragraphs: HashMap::new(),
            dirty_environments: HashMap::new(),
            stale_slots: HashMap::new(),
            needs_full: true,
        }
    }

    /// Geometry settings.
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Change the root width; every paragraph is re-wrapped on the next refresh.
    pub fn set_viewport_width(&mut self, width: f32) {
        if (self.config.viewport_width - width).abs() > f32::EPSILON {
            self.config.viewport_width = width;
            self.needs_full = true;
        }
    }

    /// Replace the configuration and schedule a full relayout.
    pub fn set_config(&mut self, config: LayoutConfig) {
        self.config = config;
        self.needs_full = true;
    }

    /// Schedule a full relayout (after font provider or cache changes).
    pub fn invalidate_all(&mut self) {
        self.needs_full = true;
    }

    /// Whether a refresh has pending work.
    pub fn is_dirty(&self) -> bool {
        self.needs_full || !self.dirty_paragraphs.is_empty() || !self.dirty_environments.is_empty()
    }

    /// Number of paragraphs waiting for a refresh.
    pub fn dirty_paragraph_count(&self) -> usize {
        self.dirty_paragraphs.len()
    }

    /// Queue work for a paragraph.
    pub fn mark_paragraph(&mut self, para: ParaId, flags: DirtyFlags) {
        *self.dirty_paragraphs.entry(para).or_default() |= flags;
    }

    /// Queue work for an environment.
    pub fn mark_environment(&mut self, env: EnvId, flags: DirtyFlags) {
        *self.dirty_environments.entry(env).or_default() |= flags;
    }

    /// Forget freed nodes and queue the new ones after a document splice.
    ///
    /// The cached slot extents of the spliced environment are spliced the same way, so only the
    /// inserted slots are measured again.
    pub fn on_splice(&mut self, report: &SpliceReport) {
        for para in &report.removed_paragraphs {
            self.paragraphs.remove(para);
            self.dirty_paragraphs.remove(para);
        }
        for env in &report.removed_environments {
            self.environments.remove(env);
            self.dirty_environments.remove(env);
            self.stale_slots.remove(env);
        }
        for para in &report.inserted_paragraphs {
            self.mark_paragraph(*para, DirtyFlags::CONTENT);
        }
        for env in &report.inserted_environments {
            self.mark_environment(*env, DirtyFlags::OFFSETS);
        }
        let Some(env) = report.environment else {
            return;
        };
        self.mark_environment(env, DirtyFlags::OFFSETS);
        let Some(layout) = self.environments.get_mut(&env) else {
            return;
        };
        if report.index + report.removed_slots > layout.extents.len() {
            tracing::warn!(?env, "environment layout out of step with the document, rebuilding");
            self.environments.remove(&env);
            return;
        }
        let slots = &report.inserted_slots;
        layout
            .extents
            .splice(report.index, report.removed_slots, slots.iter().map(|p| (*p, 0.0)));
        layout
            .points
            .splice(report.index, report.removed_slots, slots.iter().map(|p| (*p, 0)));
        self.stale_slots
            .entry(env)
            .or_default()
            .extend(slots.iter().copied());
    }

    /// Queue an environment whose kind changed, together with everything inside it.
    pub fn on_environment_changed(&mut self, doc: &Document, env: EnvId) {
        let mut stack = vec![env];
        while let Some(current) = stack.pop() {
            let Some(environment) = doc.environment(current) else {
                continue;
            };
            self.environments.remove(&current);
            self.stale_slots.remove(&current);
            self.mark_environment(current, DirtyFlags::OFFSETS);
            for para in environment.paragraphs().keys() {
                match doc.paragraph(para).map(|p| p.content()) {
                    Some(ParagraphContent::Text(_)) => self.mark_paragraph(para, DirtyFlags::WIDTH),
                    Some(ParagraphContent::Environment(child)) => stack.push(*child),
                    None => {}
                }
            }
        }
    }

    /// Queue every paragraph showing `source` (after an image finished loading).
    pub fn on_image_loaded(&mut self, doc: &Document, source: &str) -> usize {
        let mut hits = 0;
        let mut stack = vec![doc.root()];
        while let Some(env) = stack.pop() {
            let Some(environment) = doc.environment(env) else {
                continue;
            };
            for para in environment.paragraphs().keys() {
                match doc.paragraph(para).map(|p| p.content()) {
                    Some(ParagraphContent::Text(sections)) => {
                        let shows = sections.keys().any(|s| {
                            matches!(
                                doc.section(s).map(|n| n.section()),
                                Some(Section::Image(img)) if img.image.source() == source
                            )
                        });
                        if shows {
                            self.mark_paragraph(para, DirtyFlags::CONTENT);
                            hits += 1;
                        }
                    }
                    Some(ParagraphContent::Environment(child)) => stack.push(*child),
                    None => {}
                }
            }
        }
        hits
    }

    /// Cached layout of a text paragraph.
    pub fn paragraph(&self, para: ParaId) -> Option<&ParagraphLayout> {
        self.paragraphs.get(&para)
    }

    /// Cached layout of an environment.
    pub fn environment(&self, env: EnvId) -> Option<&EnvironmentLayout> {
        self.environments.get(&env)
    }

    /// Height of the whole document.
    pub fn document_height(&self, doc: &Document) -> f32 {
        self.environments
            .get(&doc.root())
            .map(|l| l.height)
            .unwrap_or(0.0)
    }

    /// Recompute every queued node.
    pub fn refresh(&mut self, doc: &Document, ctx: &mut LayoutContext<'_>) -> RefreshStats {
        let mut stats = RefreshStats::default();
        if self.needs_full {
            self.needs_full = false;
            self.environments.clear();
            self.stale_slots.clear();
            self.queue_everything(doc);
        }

        let dirty: Vec<(ParaId, DirtyFlags)> = self.dirty_paragraphs.drain().collect();
        for (para, _flags) in dirty {
            let Some(paragraph) = doc.paragraph(para) else {
                continue;
            };
            let env = paragraph.environment();
            match paragraph.content() {
                ParagraphContent::Text(_) => {
                    let width = self.content_width(doc, env);
                    let layout = self.layout_paragraph(doc, para, width, ctx, &mut stats);
                    let height = layout.height;
                    let old = self.paragraphs.insert(para, layout);
                    if old.map(|o| o.height) != Some(height) {
                        self.stale_slots.entry(env).or_default().insert(para);
                        self.mark_environment(env, DirtyFlags::OFFSETS);
                    }
                    stats.paragraphs += 1;
                    tracing::trace!(?para, "paragraph rewrapped");
                }
                ParagraphContent::Environment(child) => {
                    self.mark_environment(*child, DirtyFlags::OFFSETS);
                }
            }
        }

        let mut heap: BinaryHeap<(usize, EnvId)> = self
            .dirty_environments
            .drain()
            .filter(|(env, _)| doc.environment(*env).is_some())
            .map(|(env, _)| (doc.depth(env), env))
            .collect();
        let mut done = HashSet::new();
        while let Some((depth, env)) = heap.pop() {
            if !done.insert(env) {
                continue;
            }
            let old_height = self.environments.get(&env).map(|l| l.height);
            let new_height = if old_height.is_some() {
                self.update_environment(doc, env, ctx, &mut stats)
            } else {
                let layout = self.layout_environment(doc, env, ctx, &mut stats);
                let height = layout.height;
                self.environments.insert(env, layout);
                self.stale_slots.remove(&env);
                height
            };
            stats.environments += 1;
            if old_height != Some(new_height)
                && let Some(parent) = doc.environment(env).and_then(|e| e.parent())
                && let Some(outer) = doc.paragraph(parent).map(|p| p.environment())
            {
                self.stale_slots.entry(outer).or_default().insert(parent);
                done.remove(&outer);
                heap.push((depth.saturating_sub(1), outer));
            }
        }

        if !stats.is_empty() {
            tracing::debug!(
                paragraphs = stats.paragraphs,
                environments = stats.environments,
                fallbacks = stats.metric_fallbacks,
                "layout refreshed"
            );
        }
        stats
    }

    /// Width available to the content of `env`.
    pub fn content_width(&self, doc: &Document, env: EnvId) -> f32 {
        let mut width = self.config.viewport_width;
        let mut current = Some(env);
        while let Some(id) = current {
            let Some(environment) = doc.environment(id) else { break };
            let insets = self.config.insets(environment.kind());
            width -= insets.left + insets.right;
            current = environment
                .parent()
                .and_then(|p| doc.paragraph(p))
                .map(|p| p.environment());
        }
        width.max(1.0)
    }

    /// Top-left corner of an environment's content in document coordinates.
    pub fn content_origin(&self, doc: &Document, env: EnvId) -> (f32, f32) {
        let Some(environment) = doc.environment(env) else {
            return (0.0, 0.0);
        };
        let Some(parent) = environment.parent() else {
            return (0.0, 0.0);
        };
        let (x, y) = self.paragraph_origin(doc, parent);
        let insets = self.config.insets(environment.kind());
        (x + insets.left, y + insets.top)
    }

    /// Top-left corner of a paragraph in document coordinates.
    pub fn paragraph_origin(&self, doc: &Document, para: ParaId) -> (f32, f32) {
        let Some(env) = doc.paragraph(para).map(|p| p.environment()) else {
            return (0.0, 0.0);
        };
        let (x, y) = self.content_origin(doc, env);
        let slot = doc
            .environment(env)
            .and_then(|e| e.paragraphs().index_of(para))
            .unwrap_or(0);
        let offset = self
            .environments
            .get(&env)
            .map(|l| l.top(slot))
            .unwrap_or(0.0);
        (x, y + offset)
    }

    /// Paragraph and line index showing caret `pos`.
    pub fn line_at(&self, doc: &Document, pos: usize) -> Option<(ParaId, usize)> {
        let location = doc.resolve(pos).ok()?;
        let Placement::Text { offset, .. } = location.placement else {
            return None;
        };
        let layout = self.paragraphs.get(&location.paragraph)?;
        Some((location.paragraph, layout.line_index_at(offset)))
    }

    /// Caret rectangle for `pos` in document coordinates.
    pub fn caret_rect(&self, doc: &Document, pos: usize) -> Option<Rect> {
        let location = doc.resolve(pos).ok()?;
        let (px, py) = self.paragraph_origin(doc, location.paragraph);
        match location.placement {
            Placement::Text { offset, .. } => {
                let layout = self.paragraphs.get(&location.paragraph)?;
                let line = layout.lines.get(layout.line_index_at(offset))?;
                Some(Rect::new(px + layout.x_at(offset), py + line.y, 1.0, line.height))
            }
            Placement::BeforeEnvironment => Some(Rect::new(px, py, 1.0, self.config.default_font_size)),
            Placement::AfterEnvironment => {
                let child = doc.paragraph(location.paragraph)?.nested()?;
                let height = self.environments.get(&child)?.height;
                Some(Rect::new(px, py + height, 1.0, self.config.default_font_size))
            }
        }
    }

    fn queue_everything(&mut self, doc: &Document) {
        let mut stack = vec![doc.root()];
        while let Some(env) = stack.pop() {
            let Some(environment) = doc.environment(env) else {
                continue;
            };
            self.mark_environment(env, DirtyFlags::OFFSETS);
            for para in environment.paragraphs().keys() {
                match doc.paragraph(para).map(|p| p.content()) {
                    Some(ParagraphContent::Text(_)) => {
                        self.mark_paragraph(para, DirtyFlags::CONTENT | DirtyFlags::WIDTH)
                    }
                    Some(ParagraphContent::Environment(child)) => stack.push(*child),
                    None => {}
                }
            }
        }
    }

    fn layout_paragraph(
        &self,
        doc: &Document,
        para: ParaId,
        width: f32,
        ctx: &mut LayoutContext<'_>,
        stats: &mut RefreshStats,
    ) -> ParagraphLayout {
        let default_size = self.config.default_font_size;
        let plain = TextAttributes::new();
        let base_font = ctx
            .fonts
            .resolve(&plain, ctx.attributes, ctx.metrics, default_size);

        let mut chars: Vec<char> = Vec::new();
        let mut advances: Vec<f32> = Vec::new();
        // Per unit: (ascent, descent + leading), and the section slot it came from.
        let mut extents: Vec<(f32, f32)> = Vec::new();
        let mut owners: Vec<usize> = Vec::new();

        let sections = doc.paragraph(para).and_then(|p| p.sections());
        if let Some(sections) = sections {
            for (slot, id) in sections.keys().enumerate() {
                let Some(node) = doc.section(id) else { continue };
                match node.section() {
                    Section::Text(text) => {
                        let font = ctx.fonts.resolve(
                            &text.attributes,
                            ctx.attributes,
                            ctx.metrics,
                            default_size,
                        );
                        let extent = (
                            font.metrics.ascent - font.baseline_shift.min(0.0),
                            font.metrics.descent + font.metrics.leading + font.baseline_shift.max(0.0),
                        );
                        for ch in text.text.chars() {
                            let advance = match ch {
                                '\n' => 0.0,
                                '\t' => {
                                    self.measure(' ', &font, ctx.metrics, stats)
                                        * self.config.tab_width as f32
                                }
                                _ => self.measure(ch, &font, ctx.metrics, stats),
                            };
                            chars.push(ch);
                            advances.push(advance);
                            extents.push(extent);
                            owners.push(slot);
                        }
                    }
                    Section::Image(image) => {
                        let (w, h) = ctx
                            .images
                            .layout_size(&image.image, self.config.image_placeholder);
                        chars.push(OBJECT_REPLACEMENT);
                        advances.push(w as f32);
                        extents.push((h as f32, 0.0));
                        owners.push(slot);
                    }
                }
            }
        }

        let breaks = ctx.wrap.break_points(&WrapInput {
            chars: &chars,
            advances: &advances,
            width,
        });

        let alignment = doc.effective_alignment(para);
        let n = chars.len();
        let mut starts = Vec::with_capacity(breaks.len() + 1);
        starts.push(0);
        starts.extend(breaks.into_iter().filter(|&b| b > 0 && b < n));

        let mut xs = Vec::with_capacity(n + 1);
        let mut lines = Vec::with_capacity(starts.len());
        let mut y = 0.0f32;
        for (k, &start) in starts.iter().enumerate() {
            let end = starts.get(k + 1).copied().unwrap_or(n);
            let mut x = 0.0f32;
            let mut ascent = 0.0f32;
            let mut below = 0.0f32;
            for i in start..end {
                xs.push(x);
                x += advances[i];
                ascent = ascent.max(extents[i].0);
                below = below.max(extents[i].1);
            }
            if start == end {
                ascent = base_font.metrics.ascent;
                below = base_font.metrics.descent + base_font.metrics.leading;
            }
            let sections_range = if start < end {
                owners[start]..owners[end - 1] + 1
            } else {
                0..0
            };
            let offset = match alignment {
                Alignment::Center => ((width - x) / 2.0).max(0.0),
                Alignment::Right => (width - x).max(0.0),
                Alignment::Left | Alignment::Undefined => 0.0,
            };
            let height = ascent + below;
            lines.push(LineLayout {
                units: start..end,
                sections: sections_range,
                y,
                height,
                baseline: ascent,
                x: offset,
                width: x,
            });
            y += height;
            if k + 1 == starts.len() {
                xs.push(x);
            }
        }

        ParagraphLayout {
            lines,
            xs,
            height: y,
            available_width: width,
        }
    }

    fn measure(
        &self,
        ch: char,
        font: &ResolvedFont,
        metrics: &dyn FontMetrics,
        stats: &mut RefreshStats,
    ) -> f32 {
        match metrics.advance(ch, &font.descriptor) {
            Some(advance) => advance,
            None => {
                stats.metric_fallbacks += 1;
                MonospaceMetrics::default()
                    .advance(ch, &font.descriptor)
                    .unwrap_or(font.descriptor.size * 0.5)
            }
        }
    }

    fn layout_environment(
        &mut self,
        doc: &Document,
        env: EnvId,
        ctx: &mut LayoutContext<'_>,
        stats: &mut RefreshStats,
    ) -> EnvironmentLayout {
        let Some(environment) = doc.environment(env) else {
            return EnvironmentLayout::default();
        };
        let insets = if environment.parent().is_some() {
            self.config.insets(environment.kind())
        } else {
            Insets::default()
        };
        let list_style = match environment.kind() {
            EnvironmentKind::List { style } => Some(*style),
            _ => None,
        };

        let spacing = self.config.paragraph_spacing;
        let keys: Vec<ParaId> = environment.paragraphs().keys().collect();
        let mut extents = Vec::with_capacity(keys.len());
        let mut points = Vec::with_capacity(keys.len());
        for para in keys {
            let height = self.slot_height(doc, env, para, ctx, stats);
            extents.push((para, height + spacing));
            points.push((para, usize::from(is_list_point(doc, para))));
        }

        let mut layout = EnvironmentLayout {
            extents: ChildList::from_entries(extents),
            points: ChildList::from_entries(points),
            list_style,
            spacing,
            content_width: self.content_width(doc, env),
            insets,
            height: 0.0,
        };
        layout.refresh_height();
        layout
    }

    /// Re-read the extents of the stale slots of a cached environment; returns its new height.
    fn update_environment(
        &mut self,
        doc: &Document,
        env: EnvId,
        ctx: &mut LayoutContext<'_>,
        stats: &mut RefreshStats,
    ) -> f32 {
        let spacing = self.config.paragraph_spacing;
        for para in self.stale_slots.remove(&env).unwrap_or_default() {
            if doc.paragraph(para).is_none_or(|p| p.environment() != env) {
                continue;
            }
            let height = self.slot_height(doc, env, para, ctx, stats);
            let Some(layout) = self.environments.get_mut(&env) else {
                break;
            };
            let Some(slot) = layout.extents.index_of(para) else {
                continue;
            };
            layout.extents.set_len(slot, height + spacing);
            layout.points.set_len(slot, usize::from(is_list_point(doc, para)));
        }
        match self.environments.get_mut(&env) {
            Some(layout) => {
                layout.refresh_height();
                layout.height
            }
            None => 0.0,
        }
    }

    /// Height of the paragraph in a slot of `env`, laying out whatever is still missing.
    fn slot_height(
        &mut self,
        doc: &Document,
        env: EnvId,
        para: ParaId,
        ctx: &mut LayoutContext<'_>,
        stats: &mut RefreshStats,
    ) -> f32 {
        match doc.paragraph(para).map(|p| p.content()) {
            Some(ParagraphContent::Text(_)) => {
                if !self.paragraphs.contains_key(&para) {
                    let width = self.content_width(doc, env);
                    let layout = self.layout_paragraph(doc, para, width, ctx, stats);
                    self.paragraphs.insert(para, layout);
                    stats.paragraphs += 1;
                }
                self.paragraphs.get(&para).map(|l| l.height).unwrap_or(0.0)
            }
            Some(ParagraphContent::Environment(child)) => {
                if !self.environments.contains_key(child) {
                    let layout = self.layout_environment(doc, *child, ctx, stats);
                    self.environments.insert(*child, layout);
                    self.stale_slots.remove(child);
                    stats.environments += 1;
                }
                self.environments.get(child).map(|l| l.height).unwrap_or(0.0)
            }
            None => 0.0,
        }
    }
}

fn is_list_point(doc: &Document, para: ParaId) -> bool {
    doc.paragraph(para).is_some_and(|p| p.props().list_point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(chars: &'a [char], advances: &'a [f32], width: f32) -> WrapInput<'a> {
        WrapInput {
            chars,
            advances,
            width,
        }
    }

    #[test]
    fn test_pixel_wrap_breaks_before_overflow() {
        let chars: Vec<char> = "abcdefgh".chars().collect();
        let advances = vec![10.0; chars.len()];
        assert_eq!(PixelWrap.break_points(&input(&chars, &advances, 30.0)), vec![3, 6]);
        assert!(NoWrap.break_points(&input(&chars, &advances, 30.0)).is_empty());
    }

    #[test]
    fn test_oversized_unit_gets_own_line() {
        let chars = vec!['a', OBJECT_REPLACEMENT, 'b'];
        let advances = vec![10.0, 100.0, 10.0];
        assert_eq!(PixelWrap.break_points(&input(&chars, &advances, 30.0)), vec![1, 2]);
    }

    #[test]
    fn test_word_wrap_prefers_whitespace() {
        let chars: Vec<char> = "hello world".chars().collect();
        let advances = vec![1.0; chars.len()];
        assert_eq!(WordWrap.break_points(&input(&chars, &advances, 8.0)), vec![6]);
    }

    #[test]
    fn test_word_wrap_falls_back_to_pixel() {
        let chars: Vec<char> = "abcdefghij".chars().collect();
        let advances = vec![1.0; chars.len()];
        assert_eq!(WordWrap.break_points(&input(&chars, &advances, 4.0)), vec![4, 8]);
    }

    #[test]
    fn test_char_wrap_counts_units() {
        let chars: Vec<char> = "abcdefg\n".chars().collect();
        let advances = vec![3.0; chars.len()];
        let wrap = CharWrap { columns: 3 };
        assert_eq!(wrap.break_points(&input(&chars, &advances, 1000.0)), vec![3, 6]);
    }

    #[test]
    fn test_monospace_metrics_follow_unicode_width() {
        let metrics = MonospaceMetrics::default();
        let font = FontDescriptor::from_attributes(&TextAttributes::new(), 10.0);
        assert_eq!(metrics.advance('a', &font), Some(6.0));
        assert_eq!(metrics.advance('你', &font), Some(12.0));
    }

    #[test]
    fn test_environment_layout_slots() {
        let mut ids = slotmap::SlotMap::<ParaId, ()>::with_key();
        let paras: Vec<ParaId> = (0..4).map(|_| ids.insert(())).collect();
        // Height 10 plus spacing 2 per slot.
        let mut layout = EnvironmentLayout {
            extents: ChildList::from_entries(paras.iter().map(|p| (*p, 12.0))),
            points: ChildList::from_entries(paras.iter().copied().zip([1, 0, 1, 1])),
            list_style: Some(ListStyle::Decimal),
            spacing: 2.0,
            content_width: 100.0,
            insets: Insets::default(),
            height: 0.0,
        };
        layout.refresh_height();
        assert_eq!(layout.height, 46.0);
        assert_eq!(layout.top(2), 24.0);
        assert_eq!(layout.bottom(2), 34.0);
        assert_eq!(layout.slot_at(11.0), 0);
        assert_eq!(layout.slot_at(12.5), 1);
        assert_eq!(layout.slot_at(500.0), 3);
        assert_eq!(layout.visible(13.0, 30.0), 1..3);
        assert_eq!(layout.marker(0).as_deref(), Some("1."));
        assert_eq!(layout.marker(1), None);
        assert_eq!(layout.marker(3).as_deref(), Some("3."));

        layout.points.set_len(1, 1);
        layout.extents.set_len(1, 32.0);
        layout.refresh_height();
        assert_eq!(layout.marker(3).as_deref(), Some("4."));
        assert_eq!(layout.top(2), 44.0);
        assert_eq!(layout.height, 66.0);
    }

    #[test]
    fn test_font_cache_follows_table_generation() {
        let mut table = AttributeTable::new();
        let mut cache = FontCache::new();
        let metrics = MonospaceMetrics::default();
        let bold = TextAttributes::new().with_bold(true);
        let a = cache.resolve(&bold, &mut table, &metrics, 12.0);
        let b = cache.resolve(&bold, &mut table, &metrics, 12.0);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        table.clear();
        cache.resolve(&TextAttributes::new(), &mut table, &metrics, 12.0);
        assert_eq!(cache.len(), 1);
    }

    struct Unmeasurable;

    impl FontMetrics for Unmeasurable {
        fn vertical_metrics(&self, _font: &FontDescriptor) -> Option<VerticalMetrics> {
            None
        }

        fn advance(&self, _ch: char, _font: &FontDescriptor) -> Option<f32> {
            None
        }
    }

    #[test]
    fn test_missing_metrics_fall_back_to_monospace() {
        let mut table = AttributeTable::new();
        let mut cache = FontCache::new();
        let font = cache.resolve(&TextAttributes::new(), &mut table, &Unmeasurable, 10.0);
        assert_eq!(font.metrics.ascent, 8.0);
        assert_eq!(font.metrics.descent, 2.0);
    }
}
