use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use richdoc_core::{
    Command, CommandExecutor, Document, EditCommand, EditorConfig, EnvironmentData,
    EnvironmentKind, Fragment, PaintSurface, ParagraphData, Rect, ResolvedFont, Rgb, SecImage,
    Section, TextAttributes,
};
use std::sync::Arc;

/// `paragraphs` lines, every tenth one wrapped in a quote.
fn large_document(paragraphs: usize) -> Document {
    let plain = Arc::new(TextAttributes::new());
    let mut out = Vec::with_capacity(paragraphs);
    for i in 0..paragraphs {
        let line = format!("{i:06} the quick brown fox jumps over the lazy dog (richdoc benchmark line)");
        if i % 10 == 9 {
            let quote = EnvironmentData::with_content(
                EnvironmentKind::quote(None),
                Fragment::from_text(&line, Arc::clone(&plain)),
            );
            out.push(ParagraphData::environment(quote));
        } else {
            let text = format!("{line}\n");
            out.push(ParagraphData::text(vec![Section::text(&text, Arc::clone(&plain))]));
        }
    }
    Document::from_fragment(Fragment::new(out)).unwrap()
}

struct NullSurface;

impl PaintSurface for NullSurface {
    fn fill_rect(&mut self, _rect: Rect, _color: Rgb) {}
    fn draw_text(&mut self, _x: f32, _b: f32, text: &str, _a: &TextAttributes, _f: &ResolvedFont) {
        black_box(text);
    }
    fn draw_image(&mut self, _rect: Rect, _image: &SecImage) {}
    fn draw_environment(&mut self, _rect: Rect, _kind: &EnvironmentKind) {}
    fn draw_list_marker(&mut self, _x: f32, _baseline: f32, _marker: &str) {}
}

fn bench_document_open(c: &mut Criterion) {
    c.bench_function("document_open/10k_paragraphs", |b| {
        b.iter(|| {
            let doc = large_document(black_box(10_000));
            black_box(doc.len());
        })
    });
}

fn bench_typing_in_middle(c: &mut Criterion) {
    let doc = large_document(10_000);
    c.bench_function("typing_middle/100_inserts", |b| {
        b.iter_batched(
            || CommandExecutor::with_document(doc.clone(), EditorConfig::default()),
            |mut executor| {
                let mut pos = executor.document().len() / 2;
                for _ in 0..100 {
                    executor
                        .execute(Command::Edit(EditCommand::InsertText {
                            pos,
                            text: "x".to_string(),
                            attributes: None,
                            parse_markup: false,
                        }))
                        .unwrap();
                    pos += 1;
                }
                black_box(executor.document().len());
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_incremental_refresh(c: &mut Criterion) {
    let doc = large_document(10_000);
    let mut executor = CommandExecutor::with_document(doc, EditorConfig::default());
    executor.refresh_layout();
    let pos = executor.document().len() / 2;

    c.bench_function("refresh/after_single_insert", |b| {
        b.iter(|| {
            executor.insert_text(pos, "x", None, false).unwrap();
            let stats = executor.refresh_layout();
            black_box(stats);
        })
    });
}

fn bench_viewport_paint(c: &mut Criterion) {
    let doc = large_document(10_000);
    let mut executor = CommandExecutor::with_document(doc, EditorConfig::default());
    let height = executor.editor_mut().document_height();
    let clip = Rect::new(0.0, height / 2.0, 600.0, 900.0);

    c.bench_function("paint/viewport_slice", |b| {
        b.iter(|| {
            let stats = executor.paint(black_box(clip), &mut NullSurface);
            black_box(stats);
        })
    });
}

criterion_group!(
    benches,
    bench_document_open,
    bench_typing_in_middle,
    bench_incremental_refresh,
    bench_viewport_paint
);
criterion_main!(benches);
