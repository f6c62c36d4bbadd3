use richdoc_core::{
    Command, CommandExecutor, CommandResult, DocumentError, EditorConfig, EnvironmentData,
    EnvironmentKind, Fragment, ImageLoader, ListStyle, PaintSurface, ParagraphData,
    ParagraphProps, Rect, ResolvedFont, Rgb, SecImage, Section, TextAttributes, ViewCommand,
    WrapMode,
};
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    texts: Vec<String>,
    images: usize,
    frames: usize,
    markers: Vec<String>,
}

impl PaintSurface for Recorder {
    fn fill_rect(&mut self, _rect: Rect, _color: Rgb) {}

    fn draw_text(&mut self, _x: f32, _baseline: f32, text: &str, _a: &TextAttributes, _f: &ResolvedFont) {
        self.texts.push(text.to_string());
    }

    fn draw_image(&mut self, _rect: Rect, _image: &SecImage) {
        self.images += 1;
    }

    fn draw_environment(&mut self, _rect: Rect, _kind: &EnvironmentKind) {
        self.frames += 1;
    }

    fn draw_list_marker(&mut self, _x: f32, _baseline: f32, marker: &str) {
        self.markers.push(marker.to_string());
    }
}

fn lines(count: usize) -> CommandExecutor {
    let text: Vec<String> = (0..count).map(|i| format!("p{}", i % 10)).collect();
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, &text.join("\n"), None, false).unwrap();
    executor
}

#[test]
fn test_second_refresh_is_empty() {
    let mut executor = lines(5);
    let first = executor.refresh_layout();
    assert_eq!(first.paragraphs, 5);
    assert!(first.environments >= 1);
    assert!(executor.refresh_layout().is_empty());
}

#[test]
fn test_edit_relayouts_only_touched_paragraphs() {
    let mut executor = lines(50);
    executor.refresh_layout();

    executor.insert_text(7, "x", None, false).unwrap();
    let stats = executor.refresh_layout();
    assert!(stats.paragraphs >= 1 && stats.paragraphs <= 2, "{stats:?}");
    assert!(executor.refresh_layout().is_empty());
}

#[test]
fn test_viewport_change_relayouts_everything() {
    let mut executor = lines(20);
    executor.refresh_layout();

    let result = executor
        .execute(Command::View(ViewCommand::SetViewportWidth { width: 300.0 }))
        .unwrap();
    assert_eq!(result, CommandResult::Success);
    let stats = executor.refresh_layout();
    assert_eq!(stats.paragraphs, 20);

    let err = executor
        .execute(Command::View(ViewCommand::SetViewportWidth { width: 0.0 }))
        .unwrap_err();
    assert!(matches!(err, DocumentError::IllegalState(_)));
}

#[test]
fn test_narrow_viewport_wraps_lines() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "aaaa bbbb cccc dddd", None, false).unwrap();
    let wide = executor.editor_mut().document_height();

    executor
        .execute(Command::View(ViewCommand::SetWrapMode {
            mode: WrapMode::Word,
            columns: 0,
        }))
        .unwrap();
    executor.editor_mut().set_viewport_width(80.0);
    let narrow = executor.editor_mut().document_height();
    assert!(narrow > wide, "{narrow} <= {wide}");

    let end = executor.editor_mut().caret_rect().unwrap();
    assert!(end.y > 0.0);
}

#[test]
fn test_caret_inside_quote_is_inset() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "ab", None, false).unwrap();
    executor
        .add_environment(EnvironmentKind::quote(None), 2, false, false)
        .unwrap();
    executor.insert_text(3, "cd", None, false).unwrap();
    executor.go_to_position(3).unwrap();

    let inset = executor.editor().layout().config().quote_inset;
    let rect = executor.editor_mut().caret_rect().unwrap();
    assert_eq!(rect.x, inset);
    assert!(rect.y > 0.0);

    executor.go_to_position(0).unwrap();
    let top = executor.editor_mut().caret_rect().unwrap();
    assert_eq!((top.x, top.y), (0.0, 0.0));
}

#[test]
fn test_paint_culls_to_clip() {
    let mut executor = lines(50);
    let mut all = Recorder::default();
    let height = executor.editor_mut().document_height();
    let stats = executor.paint(Rect::new(0.0, 0.0, 600.0, height), &mut all);
    assert_eq!(stats.paragraphs_painted, 50);
    assert_eq!(all.texts.len(), 50);

    let mut top = Recorder::default();
    let stats = executor.paint(Rect::new(0.0, 0.0, 600.0, 20.0), &mut top);
    assert!(stats.paragraphs_painted <= 2);
    assert!(stats.paragraphs_culled >= 48);
    assert_eq!(top.texts[0], "p0");
}

#[test]
fn test_edit_in_long_document_keeps_offsets() {
    let mut executor = lines(2000);
    executor.go_to_position(0).unwrap();
    let line_height = executor.editor_mut().caret_rect().unwrap().height;

    // Splits paragraph 1000 ("p0\n" at 3000) into "x\n" and "yp0\n".
    executor.insert_text(3000, "x\ny", None, false).unwrap();
    let stats = executor.refresh_layout();
    assert!(stats.paragraphs <= 3, "{stats:?}");
    let height = executor.editor_mut().document_height();
    assert!((height - 2001.0 * line_height).abs() < 0.5, "{height}");

    // Paragraph 1500 is the old paragraph 1499, shifted by the inserted units.
    let hit = executor.hit_test(0.0, 1500.5 * line_height).unwrap();
    assert_eq!(hit.position, 4500);
    let mut recorder = Recorder::default();
    let clip = Rect::new(0.0, 1500.0 * line_height + 1.0, 600.0, line_height / 2.0);
    executor.paint(clip, &mut recorder);
    assert_eq!(recorder.texts, vec!["p9".to_string()]);

    executor.undo().unwrap();
    let height = executor.editor_mut().document_height();
    assert!((height - 2000.0 * line_height).abs() < 0.5, "{height}");
    let hit = executor.hit_test(0.0, 1500.5 * line_height).unwrap();
    assert_eq!(hit.position, 4500);
}

#[test]
fn test_paint_draws_environment_decorations() {
    let mut executor = CommandExecutor::default();
    executor
        .add_environment(EnvironmentKind::quote(None), 0, false, false)
        .unwrap();
    executor.insert_text(1, "inner", None, false).unwrap();
    let mut recorder = Recorder::default();
    executor.paint(Rect::new(0.0, 0.0, 600.0, 1000.0), &mut recorder);
    assert_eq!(recorder.frames, 1);
    assert_eq!(recorder.texts, vec!["inner".to_string()]);
}

#[test]
fn test_paint_numbers_list_points() {
    let plain = Arc::new(TextAttributes::new());
    let point = ParagraphProps {
        list_point: true,
        ..ParagraphProps::default()
    };
    let items = vec![
        ParagraphData::text(vec![Section::text("one\n", plain.clone())]).with_props(point),
        ParagraphData::text(vec![Section::text("two", plain)]).with_props(point),
    ];
    let list = EnvironmentData::with_content(
        EnvironmentKind::list(ListStyle::Decimal),
        Fragment::new(items),
    );
    let mut executor = CommandExecutor::default();
    executor
        .paste(0, Fragment::environment(list, ParagraphProps::default()))
        .unwrap();

    let mut recorder = Recorder::default();
    executor.paint(Rect::new(0.0, 0.0, 600.0, 1000.0), &mut recorder);
    assert_eq!(recorder.markers, vec!["1.".to_string(), "2.".to_string()]);
    assert_eq!(recorder.texts, vec!["one".to_string(), "two".to_string()]);
}

#[test]
fn test_hit_test_maps_rows_to_paragraphs() {
    let mut executor = lines(5);
    executor.refresh_layout();
    let line_height = executor.editor_mut().caret_rect().unwrap().height;

    let hit = executor.hit_test(0.0, 2.0 * line_height + 1.0).unwrap();
    // Paragraphs are "pN\n": the third starts at 6.
    assert_eq!(hit.position, 6);
    assert_eq!(hit.environment, executor.document().root());

    let below = executor.hit_test(10_000.0, 10_000.0).unwrap();
    assert_eq!(below.position, executor.document().len());
}

struct FixedLoader;

impl ImageLoader for FixedLoader {
    fn load(&self, source: &str) -> Result<(u32, u32), String> {
        match source {
            "tall.png" => Ok((40, 80)),
            other => Err(format!("no such image: {other}")),
        }
    }
}

#[test]
fn test_loaded_image_grows_its_line() {
    let mut executor = CommandExecutor::default();
    executor.set_image_loader(Arc::new(FixedLoader));
    executor.insert_text(0, "ab", None, false).unwrap();
    executor.add_image(SecImage::new("tall.png", 0, 0), 1).unwrap();
    let before = executor.editor_mut().document_height();

    assert!(executor.wait_for_image_load());
    assert_eq!(executor.pending_image_loads(), 0);
    let stats = executor.refresh_layout();
    assert_eq!(stats.paragraphs, 1);
    let after = executor.editor_mut().document_height();
    assert!(after >= 80.0 && after > before);

    let mut recorder = Recorder::default();
    executor.paint(Rect::new(0.0, 0.0, 600.0, after), &mut recorder);
    assert_eq!(recorder.images, 1);
}

#[test]
fn test_failed_image_keeps_placeholder() {
    let mut executor = CommandExecutor::default();
    executor.set_image_loader(Arc::new(FixedLoader));
    executor.add_image(SecImage::new("missing.png", 0, 0), 0).unwrap();
    let before = executor.editor_mut().document_height();
    assert!(executor.wait_for_image_load());
    assert!(executor.editor().image_cache().is_failed("missing.png"));
    assert_eq!(executor.editor_mut().document_height(), before);
}

/// "cd" plain followed by "ef" bold, so the attribute table holds two entries.
fn two_styles() -> CommandExecutor {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "cd", None, false).unwrap();
    executor
        .insert_text(2, "ef", Some(TextAttributes::new().with_bold(true)), false)
        .unwrap();
    executor.refresh_layout();
    executor
}

#[test]
fn test_paste_between_documents_resolves_own_fonts() {
    let mut source = CommandExecutor::default();
    source.insert_text(0, "ab", None, false).unwrap();
    source
        .insert_text(2, "BIG", Some(TextAttributes::new().with_font_size(40)), false)
        .unwrap();
    source.refresh_layout();
    let fragment = source.copy(2, 5).unwrap();

    let mut target = two_styles();
    target.paste(0, fragment).unwrap();
    target.go_to_position(1).unwrap();
    let pasted = target.editor_mut().caret_rect().unwrap();

    let mut typed = two_styles();
    typed
        .insert_text(0, "BIG", Some(TextAttributes::new().with_font_size(40)), false)
        .unwrap();
    typed.go_to_position(1).unwrap();
    let expected = typed.editor_mut().caret_rect().unwrap();

    assert_eq!(pasted.height, expected.height);
    assert!(pasted.height > 40.0, "{}", pasted.height);
}

#[test]
fn test_unused_attribute_sets_are_released() {
    let mut executor = CommandExecutor::new(EditorConfig {
        history_capacity: 4,
        ..EditorConfig::default()
    });
    executor.insert_text(0, "abcd", None, false).unwrap();
    for size in 0..400 {
        executor
            .set_attributes(0, 2, TextAttributes::new().with_font_size(10 + size))
            .unwrap();
        executor.refresh_layout();
    }
    assert!(executor.editor().attribute_table().len() < 300);

    executor.editor_mut().compact_attributes();
    assert!(executor.editor().attribute_table().len() < 16);
    assert_eq!(executor.attributes_at(1).and_then(|a| a.font_size()), Some(409));

    let mut recorder = Recorder::default();
    let height = executor.editor_mut().document_height();
    executor.paint(Rect::new(0.0, 0.0, 600.0, height), &mut recorder);
    assert_eq!(recorder.texts.concat(), "abcd");
}
