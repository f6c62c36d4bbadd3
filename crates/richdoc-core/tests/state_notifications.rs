use richdoc_core::{
    ActionKind, Command, CursorCommand, EditCommand, EditorStateManager, EnvironmentKind,
    EnvironmentType, StateChange, StateChangeType, TextAttributes, ViewCommand,
};
use std::sync::{Arc, Mutex};

fn recording() -> (EditorStateManager, Arc<Mutex<Vec<StateChange>>>) {
    let mut manager = EditorStateManager::default();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    manager.subscribe(move |change| sink.lock().unwrap().push(change.clone()));
    (manager, log)
}

fn kinds(log: &Arc<Mutex<Vec<StateChange>>>) -> Vec<StateChangeType> {
    log.lock().unwrap().iter().map(|c| c.change_type).collect()
}

fn insert(pos: usize, text: &str) -> Command {
    Command::Edit(EditCommand::InsertText {
        pos,
        text: text.to_string(),
        attributes: None,
        parse_markup: false,
    })
}

#[test]
fn test_edit_notifies_document_and_cursor() {
    let (mut manager, log) = recording();
    manager.execute(insert(0, "hello")).unwrap();
    assert_eq!(
        kinds(&log),
        vec![StateChangeType::DocumentModified, StateChangeType::CursorMoved]
    );
    assert_eq!(manager.version(), 2);

    let state = manager.get_document_state();
    assert_eq!(state.len, 5);
    assert!(state.is_modified);
    assert_eq!(state.version, 2);
}

#[test]
fn test_undo_reports_touched_region() {
    let (mut manager, log) = recording();
    manager.execute(insert(0, "hello")).unwrap();
    log.lock().unwrap().clear();

    manager.execute(Command::Edit(EditCommand::Undo)).unwrap();
    let changes = log.lock().unwrap().clone();
    assert_eq!(changes[0].change_type, StateChangeType::DocumentModified);
    assert_eq!(changes[0].affected_region, Some(0..5));
    assert!(!manager.get_document_state().is_modified);
}

#[test]
fn test_failed_command_notifies_nothing() {
    let (mut manager, log) = recording();
    assert!(manager.execute(insert(3, "x")).is_err());
    assert!(kinds(&log).is_empty());
    assert_eq!(manager.version(), 0);
    assert!(!manager.has_changed_since(0));
}

#[test]
fn test_selection_and_cursor_changes() {
    let (mut manager, log) = recording();
    manager.execute(insert(0, "hello")).unwrap();
    log.lock().unwrap().clear();

    manager
        .execute(Command::Cursor(CursorCommand::SetSelection { anchor: 1, head: 3 }))
        .unwrap();
    manager
        .execute(Command::Cursor(CursorCommand::ClearSelection))
        .unwrap();
    manager
        .execute(Command::Cursor(CursorCommand::GoTo { pos: 0 }))
        .unwrap();
    manager
        .execute(Command::Cursor(CursorCommand::GoTo { pos: 0 }))
        .unwrap();
    assert_eq!(
        kinds(&log),
        vec![
            StateChangeType::SelectionChanged,
            StateChangeType::SelectionChanged,
            StateChangeType::CursorMoved,
        ]
    );
}

#[test]
fn test_viewport_changes() {
    let (mut manager, log) = recording();
    manager
        .execute(Command::View(ViewCommand::SetViewportWidth { width: 320.0 }))
        .unwrap();
    let version = manager.version();
    manager.set_scroll_top(40.0);
    manager.set_scroll_top(40.0);
    assert_eq!(
        kinds(&log),
        vec![StateChangeType::ViewportChanged, StateChangeType::ViewportChanged]
    );
    assert_eq!(manager.version(), version);

    manager.set_viewport_height(200.0);
    let viewport = manager.get_viewport_state();
    assert_eq!(viewport.width, 320.0);
    assert_eq!(viewport.height, Some(200.0));
    assert_eq!(viewport.scroll_top, 40.0);
    assert_eq!(viewport.document_height, None);

    manager.execute(Command::View(ViewCommand::RefreshLayout)).unwrap();
    assert!(manager.get_viewport_state().document_height.is_some());
}

#[test]
fn test_cursor_state_reports_context() {
    let mut manager = EditorStateManager::default();
    manager.execute(insert(0, "ab")).unwrap();
    manager
        .execute(Command::Edit(EditCommand::SetAttributes {
            start: 0,
            end: 2,
            attributes: TextAttributes::new().with_italic(true),
        }))
        .unwrap();
    manager
        .execute(Command::Edit(EditCommand::AddEnvironment {
            pos: 2,
            kind: EnvironmentKind::quote(None),
            list_point: false,
            trailing_newline: false,
        }))
        .unwrap();

    let cursor = manager.get_cursor_state();
    assert_eq!(cursor.caret, 3);
    assert_eq!(cursor.environment_type, EnvironmentType::Quote);
    assert!(cursor.selection.is_none());

    manager
        .execute(Command::Cursor(CursorCommand::GoTo { pos: 2 }))
        .unwrap();
    let cursor = manager.get_cursor_state();
    assert_eq!(cursor.environment_type, EnvironmentType::Root);
    assert_eq!(
        cursor.typing_attributes.and_then(|a| a.italic()),
        Some(true)
    );
}

#[test]
fn test_undo_redo_state() {
    let mut manager = EditorStateManager::default();
    manager.execute(insert(0, "a")).unwrap();
    let history = manager.get_undo_redo_state();
    assert!(history.can_undo);
    assert!(!history.can_redo);
    assert_eq!(history.undo_depth, 1);
    assert_eq!(history.next_undo, Some(ActionKind::InsertText));

    manager.execute(Command::Edit(EditCommand::Undo)).unwrap();
    let history = manager.get_undo_redo_state();
    assert_eq!((history.undo_depth, history.redo_depth), (0, 1));
}

#[test]
fn test_mark_saved_clears_modified() {
    let mut manager = EditorStateManager::default();
    manager.execute(insert(0, "a")).unwrap();
    manager.mark_saved();
    assert!(!manager.get_document_state().is_modified);

    let version = manager.version();
    manager.mark_modified(StateChangeType::DocumentModified);
    assert!(manager.has_changed_since(version));
    let full = manager.get_full_state();
    assert_eq!(full.document.version, version + 1);
}
