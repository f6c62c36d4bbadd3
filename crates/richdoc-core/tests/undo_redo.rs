use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use richdoc_core::{
    Alignment, Command, CommandExecutor, DocumentError, EditCommand, EditorConfig,
    EnvironmentKind, Fragment, ListStyle, TextAttributes,
};

fn executor_with_capacity(capacity: usize) -> CommandExecutor {
    CommandExecutor::new(EditorConfig {
        history_capacity: capacity,
        ..EditorConfig::default()
    })
}

#[test]
fn test_undo_redo_insert_text() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "a", None, false).unwrap();
    assert!(executor.can_undo());
    assert!(!executor.can_redo());

    executor.execute(Command::Edit(EditCommand::Undo)).unwrap();
    assert!(executor.document().is_empty());
    assert!(!executor.can_undo());
    assert!(executor.can_redo());

    executor.execute(Command::Edit(EditCommand::Redo)).unwrap();
    assert_eq!(executor.document().plain_text(), "a");
    assert!(executor.can_undo());
    assert!(!executor.can_redo());
}

#[test]
fn test_undo_restores_caret() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "abc", None, false).unwrap();
    executor.go_to_position(1).unwrap();
    executor.insert_text(1, "xyz", None, false).unwrap();
    assert_eq!(executor.caret(), 4);

    executor.undo().unwrap();
    assert_eq!(executor.caret(), 1);
    executor.redo().unwrap();
    assert_eq!(executor.caret(), 4);
}

#[test]
fn test_new_edit_clears_redo() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "a", None, false).unwrap();
    executor.insert_text(1, "b", None, false).unwrap();
    executor.undo().unwrap();
    assert_eq!(executor.redo_len(), 1);

    executor.insert_text(1, "c", None, false).unwrap();
    assert_eq!(executor.redo_len(), 0);
    assert_eq!(executor.document().plain_text(), "ac");
}

#[test]
fn test_empty_history_is_illegal_state() {
    let mut executor = CommandExecutor::default();
    assert!(matches!(executor.undo(), Err(DocumentError::IllegalState(_))));
    assert!(matches!(executor.redo(), Err(DocumentError::IllegalState(_))));
}

#[test]
fn test_history_is_bounded() {
    let mut executor = executor_with_capacity(3);
    for i in 0..5 {
        executor.insert_text(i, "x", None, false).unwrap();
    }
    assert_eq!(executor.undo_len(), 3);
    while executor.can_undo() {
        executor.undo().unwrap();
    }
    // The two oldest inserts fell off the stack.
    assert_eq!(executor.document().plain_text(), "xx");
}

#[test]
fn test_compound_group_undoes_as_one() {
    let mut executor = CommandExecutor::default();
    executor.begin_compound();
    executor.insert_text(0, "ab", None, false).unwrap();
    executor.begin_compound();
    executor
        .set_attributes(0, 1, TextAttributes::new().with_bold(true))
        .unwrap();
    executor.end_compound().unwrap();
    assert_eq!(executor.undo_len(), 0);
    assert!(matches!(executor.undo(), Err(DocumentError::IllegalState(_))));
    executor.end_compound().unwrap();

    assert_eq!(executor.undo_len(), 1);
    executor.undo().unwrap();
    assert!(executor.document().is_empty());
    executor.redo().unwrap();
    assert_eq!(executor.attributes_at(0).unwrap().bold(), Some(true));
}

#[test]
fn test_unbalanced_end_compound_fails() {
    let mut executor = CommandExecutor::default();
    assert!(matches!(
        executor.end_compound(),
        Err(DocumentError::IllegalState(_))
    ));
}

#[test]
fn test_clean_point_follows_history() {
    let mut executor = CommandExecutor::default();
    executor.insert_text(0, "a", None, false).unwrap();
    executor.mark_clean();
    assert!(executor.is_clean());

    executor.insert_text(1, "b", None, false).unwrap();
    assert!(!executor.is_clean());
    executor.undo().unwrap();
    assert!(executor.is_clean());
}

#[test]
fn test_environment_retype_round_trip() {
    let mut executor = CommandExecutor::default();
    executor
        .add_environment(EnvironmentKind::list(ListStyle::Bullet), 0, false, false)
        .unwrap();
    executor.insert_text(1, "item", None, false).unwrap();
    executor
        .set_environment_kind(2, EnvironmentKind::quote(Some("ann".to_string())))
        .unwrap();
    executor.undo().unwrap();
    assert_eq!(
        executor.environment_kind_at(2).unwrap(),
        EnvironmentKind::list(ListStyle::Bullet)
    );
    executor.redo().unwrap();
    assert_eq!(
        executor.environment_kind_at(2).unwrap(),
        EnvironmentKind::quote(Some("ann".to_string()))
    );
}

const WORDS: &[&str] = &["a", "bc", "def", " ", "x\ny", "\n", "é", "👍"];

fn random_edit(executor: &mut CommandExecutor, rng: &mut StdRng) -> Result<(), DocumentError> {
    let len = executor.document().len();
    let pos = rng.gen_range(0..=len);
    let end = rng.gen_range(pos..=len.min(pos + 6));
    match rng.gen_range(0..7) {
        0 | 1 => {
            let word = WORDS[rng.gen_range(0..WORDS.len())];
            executor.insert_text(pos, word, None, false).map(|_| ())
        }
        2 => executor.remove_text(pos, end, rng.gen_bool(0.5)),
        3 => executor.set_attributes(pos, end, TextAttributes::new().with_bold(true)),
        4 => {
            let kind = if rng.gen_bool(0.5) {
                EnvironmentKind::quote(None)
            } else {
                EnvironmentKind::list(ListStyle::Decimal)
            };
            executor.add_environment(kind, pos, rng.gen_bool(0.3), rng.gen_bool(0.5))
        }
        5 => executor.add_new_line(pos, None, Alignment::Right, rng.gen_bool(0.3)),
        _ => executor.set_line_alignment(pos, end, Alignment::Center),
    }
}

#[test]
fn test_random_edits_undo_and_redo_exactly() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut executor = executor_with_capacity(1000);
    let mut snapshots: Vec<Fragment> = Vec::new();

    for step in 0..200 {
        let before = executor.document().to_fragment();
        let depth = executor.undo_len();
        match random_edit(&mut executor, &mut rng) {
            Ok(()) => {
                if executor.undo_len() > depth {
                    snapshots.push(before);
                }
            }
            Err(err) => {
                assert_eq!(executor.document().to_fragment(), before, "step {step}: {err}");
            }
        }
        if let Err(problem) = executor.document().validate() {
            panic!("step {step}: {problem}");
        }
    }

    let last = executor.document().to_fragment();
    let mut undone = Vec::new();
    while let Some(expected) = snapshots.pop() {
        undone.push(executor.document().to_fragment());
        executor.undo().unwrap();
        assert_eq!(executor.document().to_fragment(), expected);
        assert!(executor.document().validate().is_ok());
    }
    assert!(!executor.can_undo());

    while let Some(expected) = undone.pop() {
        executor.redo().unwrap();
        assert_eq!(executor.document().to_fragment(), expected);
    }
    assert_eq!(executor.document().to_fragment(), last);
}
