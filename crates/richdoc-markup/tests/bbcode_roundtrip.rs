use pretty_assertions::assert_eq;
use richdoc_core::{
    Alignment, CommandExecutor, DocumentError, EnvironmentKind, EnvironmentType, MarkupErrorKind,
    MarkupExporter, MarkupParser, TextAttributes, TextSyntax,
};
use richdoc_markup::{BbcodeExporter, BbcodeParser, HtmlExporter};

fn executor() -> CommandExecutor {
    let mut executor = CommandExecutor::default();
    richdoc_markup::install(&mut executor).unwrap();
    executor
}

fn export(executor: &CommandExecutor, syntax: TextSyntax) -> String {
    let len = executor.document().len();
    executor.get_text(0, len, syntax).unwrap()
}

fn round_trip(source: &str) -> String {
    let mut executor = executor();
    executor.insert_text(0, source, None, true).unwrap();
    assert!(executor.document().validate().is_ok());
    export(&executor, TextSyntax::Bbcode)
}

#[test]
fn test_styles_round_trip() {
    for source in [
        "[b]bold[/b] text",
        "[u]u[/u][sup]2[/sup] and [sub]x[/sub]",
        "[b][i]both[/i][/b]",
        "[color=#ff0000]red[/color]",
        "[url=https://example.org]site[/url]",
        "[size=18]big[/size]",
    ] {
        assert_eq!(round_trip(source), source);
    }
}

#[test]
fn test_environments_round_trip() {
    for source in [
        "a\n[quote]\nq\n[/quote]\nb",
        "[quote=ann]\nline one\nline two\n[/quote]",
        "[list=1]\n[*]one\n[*]two\n[/list]",
        "[code=rust]\nfn main() {}\n[/code]",
        "[quote]\nouter\n[quote]\ninner\n[/quote]\n[/quote]",
    ] {
        assert_eq!(round_trip(source), source);
    }
}

#[test]
fn test_parsed_structure() {
    let mut executor = executor();
    executor
        .insert_text(0, "a\n[quote]\nq\n[/quote]\nb", None, true)
        .unwrap();
    // "a" [quote: "q"] "b"
    assert_eq!(executor.document().len(), 5);
    assert_eq!(executor.environment_type_at(2).unwrap(), EnvironmentType::Quote);
    assert_eq!(export(&executor, TextSyntax::Plain), "a\nq\nb");
}

#[test]
fn test_list_points_survive() {
    let mut executor = executor();
    executor
        .insert_text(0, "[list]\n[*]one\n[*]two\n[/list]", None, true)
        .unwrap();
    assert!(executor.is_list_point_at(1).unwrap());
    assert!(executor.is_list_point_at(5).unwrap());
    assert_eq!(
        export(&executor, TextSyntax::Html),
        "<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n"
    );
}

#[test]
fn test_parse_error_leaves_document_untouched() {
    let mut executor = executor();
    executor.insert_text(0, "keep", None, false).unwrap();

    let err = executor.insert_text(4, "[b]open", None, true).unwrap_err();
    match err {
        DocumentError::Markup(err) => {
            assert_eq!(err.kind, MarkupErrorKind::UnclosedTag);
            assert_eq!(err.position, 0);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(executor.document().plain_text(), "keep");
    assert_eq!(executor.undo_len(), 1);
}

#[test]
fn test_markup_into_code_is_checked() {
    let mut executor = executor();
    executor
        .add_environment(EnvironmentKind::code(None), 0, false, false)
        .unwrap();
    let err = executor
        .insert_text(1, "[quote]x[/quote]", None, true)
        .unwrap_err();
    assert!(matches!(err, DocumentError::IllegalNesting { .. }));

    executor.insert_text(1, "[b]x[/b]", None, true).unwrap();
    assert!(executor.attributes_at(1).unwrap().is_empty());
    assert_eq!(export(&executor, TextSyntax::Bbcode), "[code]\nx\n[/code]");
}

#[test]
fn test_base_attributes_apply_to_plain_runs() {
    let parser = BbcodeParser::new().unwrap();
    let base = TextAttributes::new().with_italic(true);
    let fragment = parser.parse("a[b]b[/b]", &base).unwrap();
    assert_eq!(BbcodeExporter.export(&fragment), "[i]a[/i][b][i]b[/i][/b]");
}

#[test]
fn test_alignment_tags() {
    let parser = BbcodeParser::new().unwrap();
    let fragment = parser
        .parse("top\n[center]mid[/center]", &TextAttributes::new())
        .unwrap();
    assert_eq!(fragment.paragraphs()[1].props.alignment, Alignment::Center);
    assert_eq!(
        BbcodeExporter.export(&fragment),
        "top\n[center]mid[/center]"
    );
    assert_eq!(
        HtmlExporter.export(&fragment),
        "<p>top</p>\n<p style=\"text-align:center\">mid</p>\n"
    );
}

#[test]
fn test_images() {
    let mut executor = executor();
    executor
        .insert_text(0, "see [img=4x3]a.png[/img]", None, true)
        .unwrap();
    assert_eq!(executor.document().len(), 5);
    assert_eq!(
        export(&executor, TextSyntax::Bbcode),
        "see [img=4x3]a.png[/img]"
    );
    assert_eq!(
        export(&executor, TextSyntax::Html),
        "<p>see <img src=\"a.png\" width=\"4\" height=\"3\"></p>\n"
    );
}

#[test]
fn test_partial_export() {
    let mut executor = executor();
    executor
        .insert_text(0, "[b]bold[/b] plain", None, true)
        .unwrap();
    assert_eq!(executor.get_text(2, 7, TextSyntax::Bbcode).unwrap(), "[b]ld[/b] p");
}
