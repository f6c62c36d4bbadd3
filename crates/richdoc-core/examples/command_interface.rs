//! Command interface example
//!
//! Demonstrates how to use `CommandExecutor` to drive the document kernel.

use richdoc_core::{
    Alignment, Command, CommandExecutor, CommandResult, CursorCommand, EditCommand,
    EnvironmentKind, ListStyle, TextAttributes, TextSyntax, ViewCommand,
};

fn main() {
    println!("=== Document command interface ===\n");

    let mut executor = CommandExecutor::default();

    // 1. Text editing
    println!("1. Text editing:");
    executor
        .execute(Command::Edit(EditCommand::InsertText {
            pos: 0,
            text: "Hello World".to_string(),
            attributes: None,
            parse_markup: false,
        }))
        .unwrap();
    println!("  inserted 'Hello World'");
    print_text(&executor);

    executor
        .execute(Command::Edit(EditCommand::SetAttributes {
            start: 6,
            end: 11,
            attributes: TextAttributes::new().with_bold(true),
        }))
        .unwrap();
    println!("  'World' is bold: {:?}", executor.attributes_at(6).and_then(|a| a.bold()));

    // 2. Environments
    println!("\n2. Environments:");
    let len = executor.document().len();
    executor
        .execute(Command::Edit(EditCommand::AddEnvironment {
            pos: len,
            kind: EnvironmentKind::list(ListStyle::Decimal),
            list_point: false,
            trailing_newline: true,
        }))
        .unwrap();
    let inside = executor.caret();
    executor.insert_text(inside, "first", None, false).unwrap();
    executor
        .add_new_line(inside + 5, None, Alignment::Undefined, true)
        .unwrap();
    executor.insert_text(inside + 6, "second", None, false).unwrap();
    println!(
        "  caret {} is inside a {:?} environment",
        inside,
        executor.environment_type_at(inside).unwrap()
    );
    print_text(&executor);

    // 3. Cursor and selection
    println!("\n3. Cursor and selection:");
    executor
        .execute(Command::Cursor(CursorCommand::GoTo { pos: 0 }))
        .unwrap();
    executor
        .execute(Command::Cursor(CursorCommand::ExtendSelection { to: 5 }))
        .unwrap();
    println!("  selection: {:?}", executor.selection().map(|s| s.range()));

    // 4. Clipboard
    println!("\n4. Clipboard:");
    if let CommandResult::Fragment(fragment) = executor
        .execute(Command::View(ViewCommand::Copy { start: 0, end: 5 }))
        .unwrap()
    {
        println!("  copied {:?}", fragment.plain_text());
        executor.paste(5, fragment).unwrap();
    }
    print_text(&executor);

    // 5. Undo and redo
    println!("\n5. Undo/redo:");
    println!("  undo steps: {}", executor.undo_len());
    executor.execute(Command::Edit(EditCommand::Undo)).unwrap();
    print_text(&executor);
    executor.execute(Command::Edit(EditCommand::Redo)).unwrap();
    print_text(&executor);

    // 6. Layout
    println!("\n6. Layout:");
    if let CommandResult::Refreshed(stats) = executor
        .execute(Command::View(ViewCommand::RefreshLayout))
        .unwrap()
    {
        println!(
            "  refreshed {} paragraphs and {} environments",
            stats.paragraphs, stats.environments
        );
    }
    println!("  document height: {}", executor.editor_mut().document_height());
    println!("  caret rectangle: {:?}", executor.editor_mut().caret_rect());

    // 7. Errors leave the document untouched
    println!("\n7. Errors:");
    let len = executor.document().len();
    let err = executor.insert_text(len + 1, "x", None, false).unwrap_err();
    println!("  {err}");
    println!("  document still validates: {}", executor.document().validate().is_ok());

    println!("\n=== Done ===");
}

fn print_text(executor: &CommandExecutor) {
    let len = executor.document().len();
    let text = executor.get_text(0, len, TextSyntax::Plain).unwrap();
    println!("  text: {text:?}");
}
