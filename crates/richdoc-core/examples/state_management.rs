//! State management example
//!
//! Demonstrates how to use `EditorStateManager` to query state and follow changes.

use richdoc_core::{
    Command, CursorCommand, EditCommand, EditorStateManager, EnvironmentKind, ViewCommand,
};
use std::sync::{Arc, Mutex};

fn main() {
    println!("=== Document state management ===\n");

    let mut manager = EditorStateManager::default();

    // Change subscription
    let change_count = Arc::new(Mutex::new(0));
    let change_count_clone = Arc::clone(&change_count);
    manager.subscribe(move |change| {
        let mut count = change_count_clone.lock().unwrap();
        *count += 1;
        println!(
            "  change #{}: {:?} (version {} -> {}, region {:?})",
            count, change.change_type, change.old_version, change.new_version, change.affected_region
        );
    });

    println!("1. Editing:");
    manager
        .execute(Command::Edit(EditCommand::InsertText {
            pos: 0,
            text: "Quoted below:".to_string(),
            attributes: None,
            parse_markup: false,
        }))
        .unwrap();
    manager
        .execute(Command::Edit(EditCommand::AddEnvironment {
            pos: 13,
            kind: EnvironmentKind::quote(Some("ann".to_string())),
            list_point: false,
            trailing_newline: false,
        }))
        .unwrap();
    manager
        .execute(Command::Edit(EditCommand::InsertText {
            pos: 14,
            text: "a nested line".to_string(),
            attributes: None,
            parse_markup: false,
        }))
        .unwrap();

    println!("\n2. Document state:");
    print_document_state(&manager);

    println!("\n3. Cursor state:");
    print_cursor_state(&manager);

    println!("\n4. Moving the cursor:");
    manager
        .execute(Command::Cursor(CursorCommand::GoTo { pos: 0 }))
        .unwrap();
    manager
        .execute(Command::Cursor(CursorCommand::SelectAll))
        .unwrap();
    print_cursor_state(&manager);

    println!("\n5. Viewport:");
    manager.set_viewport_height(480.0);
    manager
        .execute(Command::View(ViewCommand::SetViewportWidth { width: 320.0 }))
        .unwrap();
    manager.set_scroll_top(12.0);
    manager
        .execute(Command::View(ViewCommand::RefreshLayout))
        .unwrap();
    let viewport = manager.get_viewport_state();
    println!("  width: {}", viewport.width);
    println!("  height: {:?}", viewport.height);
    println!("  scroll top: {}", viewport.scroll_top);
    println!("  document height: {:?}", viewport.document_height);

    println!("\n6. Undo/redo:");
    manager.execute(Command::Edit(EditCommand::Undo)).unwrap();
    let history = manager.get_undo_redo_state();
    println!("  can undo: {} ({} steps)", history.can_undo, history.undo_depth);
    println!("  can redo: {} ({} steps)", history.can_redo, history.redo_depth);
    println!("  next undo: {:?}", history.next_undo);

    println!("\n7. Version tracking:");
    let version = manager.version();
    println!("  current version: {version}");
    println!("  changed since 0: {}", manager.has_changed_since(0));
    println!("  changed since {version}: {}", manager.has_changed_since(version));

    println!("\n8. Saving:");
    println!("  modified before save: {}", manager.get_document_state().is_modified);
    manager.mark_saved();
    println!("  modified after save: {}", manager.get_document_state().is_modified);

    println!("\n9. Full snapshot:");
    let full = manager.get_full_state();
    println!("  length: {}", full.document.len);
    println!("  paragraphs: {}", full.document.paragraph_count);
    println!("  caret: {}", full.cursor.caret);
    println!("  viewport width: {}", full.viewport.width);
    println!("  total changes: {}", *change_count.lock().unwrap());

    println!("\n=== Done ===");
}

fn print_document_state(manager: &EditorStateManager) {
    let state = manager.get_document_state();
    println!("  length: {}", state.len);
    println!("  paragraphs: {}", state.paragraph_count);
    println!("  environments: {}", state.environment_count);
    println!("  modified: {}", state.is_modified);
    println!("  version: {}", state.version);
}

fn print_cursor_state(manager: &EditorStateManager) {
    let state = manager.get_cursor_state();
    println!("  caret: {}", state.caret);
    println!("  selection: {:?}", state.selection.map(|s| s.range()));
    println!("  environment: {:?}", state.environment_type);
    println!("  alignment: {:?}", state.alignment);
}
