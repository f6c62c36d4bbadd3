use richdoc_core::{
    CommandExecutor, Document, DocumentError, EnvironmentData, EnvironmentKind, EnvironmentType,
    Fragment, ParagraphData, Placement, TextAttributes, Unit,
};
use std::sync::Arc;

/// "ab" [quote: "cd" [quote: "ef"]]
fn nested() -> CommandExecutor {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "ab", None, false).unwrap();
    executor
        .add_environment(EnvironmentKind::quote(None), 2, false, false)
        .unwrap();
    executor.insert_text(3, "cd", None, false).unwrap();
    executor
        .add_environment(EnvironmentKind::quote(None), 5, false, false)
        .unwrap();
    executor.insert_text(6, "ef", None, false).unwrap();
    executor
}

#[test]
fn test_every_unit_counts_once() {
    let executor = nested();
    let doc = executor.document();
    // 2 chars + outer markers + 2 chars + inner markers + 2 chars
    assert_eq!(doc.len(), 10);
    assert_eq!(doc.plain_text().chars().count(), doc.len());
    assert_eq!(doc.plain_text(), "ab\ncd\nef\n\n");
    assert_eq!(doc.environment_count(), 2);
    assert!(doc.validate().is_ok());
}

#[test]
fn test_units_by_index() {
    let executor = nested();
    let doc = executor.document();
    let outer = executor.environment_at(3).unwrap();
    let inner = executor.environment_at(7).unwrap();
    assert_ne!(outer, inner);
    assert_eq!(doc.depth(inner), doc.depth(outer) + 1);

    assert!(matches!(doc.unit_at(0), Some(Unit::Char { offset: 0, .. })));
    assert_eq!(doc.unit_at(2), Some(Unit::Enter(outer)));
    assert_eq!(doc.unit_at(5), Some(Unit::Enter(inner)));
    assert_eq!(doc.unit_at(8), Some(Unit::Leave(inner)));
    assert_eq!(doc.unit_at(9), Some(Unit::Leave(outer)));
    assert_eq!(doc.unit_at(10), None);

    assert_eq!(doc.environment_range(outer), 2..10);
    assert_eq!(doc.environment_range(inner), 5..9);
    assert_eq!(doc.content_start(inner), 6);
}

#[test]
fn test_resolve_prefers_text_at_ties() {
    let executor = nested();
    let doc = executor.document();

    let end_of_ab = doc.resolve(2).unwrap();
    assert_eq!(end_of_ab.environment, doc.root());
    assert!(matches!(end_of_ab.placement, Placement::Text { offset: 2, .. }));

    let end_of_cd = doc.resolve(5).unwrap();
    assert_eq!(end_of_cd.environment, executor.environment_at(3).unwrap());
    assert!(matches!(end_of_cd.placement, Placement::Text { offset: 2, .. }));

    let after = doc.resolve(10).unwrap();
    assert_eq!(after.environment, doc.root());
    assert_eq!(after.placement, Placement::AfterEnvironment);
    assert_eq!(doc.position_of(&after), 10);
}

#[test]
fn test_resolve_round_trips() {
    let executor = nested();
    let doc = executor.document();
    for pos in 0..=doc.len() {
        let location = doc.resolve(pos).unwrap();
        assert_eq!(doc.position_of(&location), pos, "position {pos}");
    }
}

#[test]
fn test_out_of_range_positions_fail() {
    let executor = nested();
    let doc = executor.document();
    assert!(matches!(
        doc.resolve(11),
        Err(DocumentError::InvalidPosition { position: 11, len: 10 })
    ));
    assert!(matches!(
        doc.check_range(4, 2),
        Err(DocumentError::InvalidRange { start: 4, end: 2, .. })
    ));
    assert!(doc.text(0, 11).is_err());
}

#[test]
fn test_environment_types_by_position() {
    let executor = nested();
    assert_eq!(executor.environment_type_at(0).unwrap(), EnvironmentType::Root);
    assert_eq!(executor.environment_type_at(4).unwrap(), EnvironmentType::Quote);
    assert_eq!(executor.environment_type_at(7).unwrap(), EnvironmentType::Quote);
    assert_eq!(executor.environment_type_at(10).unwrap(), EnvironmentType::Root);
}

#[test]
fn test_fragment_keeps_markers_of_cut_environments() {
    let executor = nested();
    let fragment = executor.copy(1, 4).unwrap();
    // "b" plus the outer quote holding "c"
    assert_eq!(fragment.len(), 4);
    assert_eq!(fragment.plain_text(), "b\nc\n");
    assert!(fragment.paragraphs()[1].environment_data().is_some());
}

#[test]
fn test_document_from_fragment() {
    let plain = Arc::new(TextAttributes::new());
    let doc = Document::from_fragment(Fragment::from_text("one\ntwo", plain)).unwrap();
    assert_eq!(doc.len(), 7);
    assert_eq!(doc.paragraph_count(), 2);
    assert_eq!(doc.text(4, 7).unwrap(), "two");
    assert_eq!(doc.to_fragment().plain_text(), "one\ntwo");
}

#[test]
fn test_document_from_fragment_rejects_nested_root() {
    let plain = Arc::new(TextAttributes::new());
    let mut paragraphs = Fragment::from_text("x", plain.clone()).into_paragraphs();
    paragraphs.push(ParagraphData::environment(EnvironmentData::with_content(
        EnvironmentKind::Root,
        Fragment::from_text("y", plain),
    )));
    let err = Document::from_fragment(Fragment::new(paragraphs)).unwrap_err();
    assert!(matches!(
        err,
        DocumentError::IllegalNesting {
            parent: EnvironmentType::Root,
            ..
        }
    ));
}

#[test]
fn test_empty_document() {
    let doc = Document::new();
    assert!(doc.is_empty());
    assert_eq!(doc.plain_text(), "");
    let location = doc.resolve(0).unwrap();
    assert!(matches!(location.placement, Placement::Text { offset: 0, .. }));
}
