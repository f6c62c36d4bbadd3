//! Painting and hit testing.
//!
//! Both walk the cached layout top-down, computing absolute positions as they descend. Lines and
//! paragraphs outside the requested rectangle are skipped by binary search over the cached
//! offsets, so the cost of a repaint follows the visible area, not the document size.

use crate::attributes::{Rgb, TextAttributes};
use crate::fragment::Section;
use crate::image::SecImage;
use crate::layout::{LayoutContext, LayoutPipeline, ParagraphLayout, Rect, ResolvedFont};
use crate::tree::{Document, EnvId, EnvironmentKind, ParaId, ParagraphContent, SectionId};

/// Drawing capability supplied by the view layer.
pub trait PaintSurface {
    /// Fill a rectangle (backgrounds, highlights).
    fn fill_rect(&mut self, rect: Rect, color: Rgb);
    /// Draw a run of text; `baseline` is absolute.
    fn draw_text(&mut self, x: f32, baseline: f32, text: &str, attributes: &TextAttributes, font: &ResolvedFont);
    /// Draw an image into `rect`.
    fn draw_image(&mut self, rect: Rect, image: &SecImage);
    /// Draw the decoration of a sub-environment (quote bar, code box).
    fn draw_environment(&mut self, rect: Rect, kind: &EnvironmentKind);
    /// Draw a list marker ending at `x`.
    fn draw_list_marker(&mut self, x: f32, baseline: f32, marker: &str);
}

/// Counters of one paint pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaintStats {
    /// Text paragraphs with at least one painted line.
    pub paragraphs_painted: usize,
    /// Paragraphs skipped because they lie outside the clip.
    pub paragraphs_culled: usize,
    /// Lines painted.
    pub lines_painted: usize,
    /// Lines of painted paragraphs skipped by the clip.
    pub lines_culled: usize,
    /// Text and image runs handed to the surface.
    pub runs: usize,
}

/// What lies under a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitTestResult {
    /// Nearest caret slot.
    pub position: usize,
    /// Innermost environment under the point.
    pub environment: EnvId,
    /// Paragraph under the point.
    pub paragraph: ParaId,
    /// Section under the point, if the point is over content.
    pub section: Option<SectionId>,
}

/// Paint everything of `doc` that intersects `clip` (document coordinates).
pub fn paint(
    doc: &Document,
    layout: &LayoutPipeline,
    ctx: &mut LayoutContext<'_>,
    clip: Rect,
    surface: &mut dyn PaintSurface,
) -> PaintStats {
    let mut painter = Painter {
        doc,
        layout,
        clip,
        stats: PaintStats::default(),
    };
    painter.environment(doc.root(), 0.0, 0.0, ctx, surface);
    tracing::trace!(
        painted = painter.stats.paragraphs_painted,
        culled = painter.stats.paragraphs_culled,
        "paint pass"
    );
    painter.stats
}

struct Painter<'d> {
    doc: &'d Document,
    layout: &'d LayoutPipeline,
    clip: Rect,
    stats: PaintStats,
}

impl Painter<'_> {
    /// `(x, y)` is the content origin of `env`.
    fn environment(
        &mut self,
        env: EnvId,
        x: f32,
        y: f32,
        ctx: &mut LayoutContext<'_>,
        surface: &mut dyn PaintSurface,
    ) {
        let (Some(environment), Some(env_layout)) =
            (self.doc.environment(env), self.layout.environment(env))
        else {
            return;
        };
        let count = environment.paragraphs().len();
        if count == 0 || env_layout.slot_count() != count {
            return;
        }

        let visible = env_layout.visible(self.clip.y - y, self.clip.bottom() - y);
        self.stats.paragraphs_culled += count - visible.len();

        let paragraphs = environment.paragraphs().keys_in(visible.clone());
        for (slot, para) in visible.zip(paragraphs) {
            let top = y + env_layout.top(slot);
            match self.doc.paragraph(para).map(|p| p.content()) {
                Some(ParagraphContent::Text(_)) => {
                    if let Some(layout) = self.layout.paragraph(para) {
                        if let Some(marker) = env_layout.marker(slot) {
                            let baseline = top + layout.lines.first().map(|l| l.baseline).unwrap_or(0.0);
                            surface.draw_list_marker(x, baseline, &marker);
                        }
                        self.paragraph(para, layout, x, top, ctx, surface);
                    }
                }
                Some(ParagraphContent::Environment(child)) => {
                    let Some(child_layout) = self.layout.environment(*child) else {
                        continue;
                    };
                    let Some(child_env) = self.doc.environment(*child) else {
                        continue;
                    };
                    let insets = child_layout.insets;
                    let frame = Rect::new(
                        x,
                        top,
                        child_layout.content_width + insets.left + insets.right,
                        child_layout.height,
                    );
                    surface.draw_environment(frame, child_env.kind());
                    if let Some(marker) = env_layout.marker(slot) {
                        surface.draw_list_marker(x, top + insets.top, &marker);
                    }
                    self.environment(*child, x + insets.left, top + insets.top, ctx, surface);
                }
                None => {}
            }
        }
    }

    fn paragraph(
        &mut self,
        para: ParaId,
        layout: &ParagraphLayout,
        x: f32,
        y: f32,
        ctx: &mut LayoutContext<'_>,
        surface: &mut dyn PaintSurface,
    ) {
        let Some(sections) = self.doc.paragraph(para).and_then(|p| p.sections()) else {
            return;
        };
        let first = layout
            .lines
            .partition_point(|l| y + l.y + l.height <= self.clip.y);
        let last = layout.lines.partition_point(|l| y + l.y < self.clip.bottom());
        if first >= last {
            self.stats.paragraphs_culled += 1;
            return;
        }
        self.stats.paragraphs_painted += 1;
        self.stats.lines_culled += first + (layout.lines.len() - last);

        let default_size = self.layout.config().default_font_size;
        for line in &layout.lines[first..last] {
            self.stats.lines_painted += 1;
            let line_x = x + line.x;
            let baseline = y + line.y + line.baseline;
            for slot in line.sections.clone() {
                let Some(id) = sections.get(slot) else { continue };
                let Some(node) = self.doc.section(id) else { continue };
                let sec_start = sections.start_of(slot);
                let lo = line.units.start.max(sec_start);
                let hi = line.units.end.min(sec_start + sections.child_len(slot));
                if lo >= hi {
                    continue;
                }
                let run_x = line_x + layout.xs.get(lo).copied().unwrap_or(0.0);
                let run_end = if hi == line.units.end {
                    line_x + line.width
                } else {
                    line_x + layout.xs.get(hi).copied().unwrap_or(line.width)
                };
                match node.section() {
                    Section::Text(text) => {
                        let attrs = &text.attributes;
                        let run: String = text
                            .text
                            .slice(lo - sec_start..hi - sec_start)
                            .chars()
                            .filter(|&c| c != '\n')
                            .collect();
                        let background = attrs.highlight().or(attrs.background());
                        if let Some(color) = background {
                            surface.fill_rect(
                                Rect::new(run_x, y + line.y, run_end - run_x, line.height),
                                color,
                            );
                        }
                        if run.is_empty() {
                            continue;
                        }
                        let font = ctx
                            .fonts
                            .resolve(attrs, ctx.attributes, ctx.metrics, default_size);
                        surface.draw_text(run_x, baseline + font.baseline_shift, &run, attrs, &font);
                        self.stats.runs += 1;
                    }
                    Section::Image(image) => {
                        let (w, h) = ctx
                            .images
                            .layout_size(&image.image, self.layout.config().image_placeholder);
                        let rect = Rect::new(run_x, baseline - h as f32, w as f32, h as f32);
                        surface.draw_image(rect, &image.image);
                        self.stats.runs += 1;
                    }
                }
            }
        }
    }
}

/// Caret slot, paragraph and section under document point `(x, y)`.
///
/// Points above or below the content clamp to the first or last paragraph; points inside an
/// environment's insets resolve into its nearest content paragraph.
pub fn hit_test(doc: &Document, layout: &LayoutPipeline, x: f32, y: f32) -> Option<HitTestResult> {
    let mut env = doc.root();
    let (mut cx, mut cy) = (0.0f32, 0.0f32);
    loop {
        let environment = doc.environment(env)?;
        let env_layout = layout.environment(env)?;
        let slot = env_layout.slot_at(y - cy);
        let para = environment.paragraphs().get(slot)?;
        let top = cy + env_layout.top(slot);
        match doc.paragraph(para)?.content() {
            ParagraphContent::Environment(child) => {
                let insets = layout.environment(*child)?.insets;
                env = *child;
                cx += insets.left;
                cy = top + insets.top;
            }
            ParagraphContent::Text(sections) => {
                let para_layout = layout.paragraph(para)?;
                let local_y = y - top;
                let line_index = para_layout
                    .lines
                    .partition_point(|l| l.y + l.height <= local_y)
                    .min(para_layout.lines.len().saturating_sub(1));
                let line = para_layout.lines.get(line_index)?;
                let local_x = x - cx - line.x;
                let mut offset = line.units.start;
                for i in line.units.clone() {
                    let left = para_layout.xs.get(i).copied().unwrap_or(0.0);
                    let right = para_layout.xs.get(i + 1).copied().unwrap_or(left);
                    let right = if i + 1 == line.units.end { line.width } else { right };
                    if local_x < (left + right) / 2.0 {
                        break;
                    }
                    offset = i + 1;
                }
                let terminated = doc.is_terminated(para);
                let caret_end = sections.total() - usize::from(terminated);
                offset = offset.min(caret_end);
                // A caret after the last unit of a soft-wrapped line sits at the next line's start.
                if offset == line.units.end && line_index + 1 < para_layout.lines.len() && offset > line.units.start {
                    offset -= 1;
                }
                let section = sections
                    .find(offset)
                    .or_else(|| sections.total().checked_sub(1).and_then(|o| sections.find(o)))
                    .and_then(|(slot, _)| sections.get(slot));
                return Some(HitTestResult {
                    position: doc.paragraph_start(para) + offset,
                    environment: env,
                    paragraph: para,
                    section,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeTable;
    use crate::fragment::{EnvironmentData, Fragment, ParagraphData};
    use crate::image::ImageCache;
    use crate::layout::{FontCache, LayoutConfig, MonospaceMetrics, NoWrap};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        texts: Vec<(f32, f32, String)>,
        frames: usize,
    }

    impl PaintSurface for Recorder {
        fn fill_rect(&mut self, _rect: Rect, _color: Rgb) {}
        fn draw_text(&mut self, x: f32, baseline: f32, text: &str, _a: &TextAttributes, _f: &ResolvedFont) {
            self.texts.push((x, baseline, text.to_string()));
        }
        fn draw_image(&mut self, _rect: Rect, _image: &SecImage) {}
        fn draw_environment(&mut self, _rect: Rect, _kind: &EnvironmentKind) {
            self.frames += 1;
        }
        fn draw_list_marker(&mut self, _x: f32, _baseline: f32, _marker: &str) {}
    }

    fn sample() -> Document {
        let plain = Arc::new(TextAttributes::new());
        // "one\n" "two" [quote: "inner"]
        let mut paragraphs = Fragment::from_text("one\ntwo", plain.clone()).into_paragraphs();
        paragraphs.push(ParagraphData::environment(EnvironmentData::with_content(
            EnvironmentKind::quote(None),
            Fragment::from_text("inner", plain),
        )));
        Document::from_fragment(Fragment::new(paragraphs)).unwrap()
    }

    fn laid_out(doc: &Document) -> (LayoutPipeline, AttributeTable, FontCache, ImageCache) {
        let mut pipeline = LayoutPipeline::new(LayoutConfig::default());
        let mut table = AttributeTable::new();
        let mut fonts = FontCache::new();
        let images = ImageCache::new();
        let metrics = MonospaceMetrics::default();
        let mut ctx = LayoutContext {
            metrics: &metrics,
            wrap: &NoWrap,
            attributes: &mut table,
            fonts: &mut fonts,
            images: &images,
        };
        pipeline.refresh(doc, &mut ctx);
        (pipeline, table, fonts, images)
    }

    #[test]
    fn test_paint_culls_outside_clip() {
        let doc = sample();
        let (pipeline, mut table, mut fonts, images) = laid_out(&doc);
        let metrics = MonospaceMetrics::default();
        let mut ctx = LayoutContext {
            metrics: &metrics,
            wrap: &NoWrap,
            attributes: &mut table,
            fonts: &mut fonts,
            images: &images,
        };
        let mut all = Recorder::default();
        let height = pipeline.document_height(&doc);
        let stats = paint(&doc, &pipeline, &mut ctx, Rect::new(0.0, 0.0, 600.0, height), &mut all);
        assert_eq!(all.texts.len(), 3);
        assert_eq!(all.frames, 1);
        assert_eq!(stats.paragraphs_culled, 0);

        let mut top = Recorder::default();
        let stats = paint(&doc, &pipeline, &mut ctx, Rect::new(0.0, 0.0, 600.0, 1.0), &mut top);
        assert_eq!(top.texts.len(), 1);
        assert_eq!(top.texts[0].2, "one");
        assert!(stats.paragraphs_culled >= 2);
    }

    #[test]
    fn test_hit_test_finds_nested_text() {
        let doc = sample();
        let (pipeline, ..) = laid_out(&doc);
        let first = hit_test(&doc, &pipeline, 0.0, 1.0).unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(first.environment, doc.root());

        let inner_para = doc
            .environment(doc.root())
            .and_then(|e| e.paragraphs().get(2))
            .unwrap();
        let (_, y) = pipeline.paragraph_origin(&doc, inner_para);
        let child = doc.paragraph(inner_para).and_then(|p| p.nested()).unwrap();
        let insets = pipeline.environment(child).unwrap().insets;
        let hit = hit_test(&doc, &pipeline, 1000.0, y + insets.top + 1.0).unwrap();
        assert_eq!(hit.environment, child);
        // "one\ntwo" + enter marker + "inner"
        assert_eq!(hit.position, 7 + 1 + 5);
    }
}
