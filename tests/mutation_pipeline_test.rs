//! Mutation pipeline scenarios: surgical edits stay syntactically valid,
//! the ledger records them, guards stop destructive edits, and undo
//! restores exact bytes.

use cerberus::config::Settings;
use cerberus::error::CerberusError;
use cerberus::indexing::IndexBuilder;
use cerberus::mutation::MutationEngine;
use cerberus::parsing::Language;
use cerberus::scanner::ScanOptions;
use cerberus::storage::IndexStore;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn setup(files: &[(&str, &str)]) -> (TempDir, TempDir, Arc<IndexStore>, MutationEngine) {
    let repo = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(repo.path().join(name), content).unwrap();
    }
    let index = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.runtime_dir = index.path().join("runtime");
    settings.mutation.formatters.clear();
    let settings = Arc::new(settings);
    let store = Arc::new(IndexStore::open(index.path(), 8).unwrap());
    IndexBuilder::new(settings.clone(), store.clone(), None)
        .build(repo.path(), ScanOptions::default())
        .unwrap();
    let engine = MutationEngine::new(settings, store.clone(), repo.path()).unwrap();
    (repo, index, store, engine)
}

const PACKAGE_A: &str = "class A:\n    def foo(self):\n        return 1\n";
const PACKAGE_B: &str = "from a import A\n\nclass B(A):\n    pass\n";

#[test]
fn editing_a_method_body_keeps_the_file_valid_and_logs_a_metric() {
    let (repo, _index, store, engine) = setup(&[("a.py", PACKAGE_A), ("b.py", PACKAGE_B)]);

    let result = engine
        .edit(
            "a.py",
            "foo",
            "def foo(self):\n    return self.compute() * 2\n",
            None,
            Some("A"),
            false,
            false,
        )
        .unwrap();
    assert!(result.success);
    assert!(result.validation_passed);
    assert!(result.lines_changed > 0);

    let content = fs::read_to_string(repo.path().join("a.py")).unwrap();
    assert!(content.contains("self.compute() * 2"));
    assert!(
        cerberus::mutation::validate_syntax(&content, Language::Python).is_empty(),
        "edited file must still parse"
    );

    let metrics = store.sqlite.query_diff_metrics(10).unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].operation, "edit");
    assert!(metrics[0].lines_changed > 0);
}

#[test]
fn deleting_a_referenced_class_is_blocked_and_disk_untouched() {
    let (repo, _index, _store, engine) = setup(&[("a.py", PACKAGE_A), ("b.py", PACKAGE_B)]);
    let original = fs::read_to_string(repo.path().join("a.py")).unwrap();

    let err = engine
        .delete("a.py", "A", None, None, false, false)
        .unwrap_err();
    match &err {
        CerberusError::Guard { referents, .. } => {
            assert!(referents.iter().any(|r| r.starts_with("b.py")));
        }
        other => panic!("expected guard block, got {other:?}"),
    }
    assert_eq!(err.exit_code().code(), 2);
    assert_eq!(
        fs::read_to_string(repo.path().join("a.py")).unwrap(),
        original
    );
}

#[test]
fn backup_contains_exact_pre_write_bytes() {
    let (repo, _index, _store, engine) = setup(&[("a.py", PACKAGE_A), ("b.py", PACKAGE_B)]);
    let original = fs::read_to_string(repo.path().join("a.py")).unwrap();

    let result = engine
        .edit(
            "a.py",
            "foo",
            "def foo(self):\n    return 7\n",
            None,
            Some("A"),
            false,
            false,
        )
        .unwrap();
    let backup_path = result.backup_path.expect("backup must exist");
    assert_eq!(fs::read_to_string(Path::new(&backup_path)).unwrap(), original);
}

#[test]
fn undo_round_trips_to_pre_transaction_bytes() {
    let (repo, _index, _store, engine) = setup(&[("a.py", PACKAGE_A), ("b.py", PACKAGE_B)]);
    let original = fs::read_to_string(repo.path().join("a.py")).unwrap();

    let result = engine
        .edit(
            "a.py",
            "foo",
            "def foo(self):\n    return 7\n",
            None,
            Some("A"),
            false,
            false,
        )
        .unwrap();
    assert_ne!(
        fs::read_to_string(repo.path().join("a.py")).unwrap(),
        original
    );

    engine.undo(&result.transaction_id.unwrap()).unwrap();
    assert_eq!(
        fs::read_to_string(repo.path().join("a.py")).unwrap(),
        original
    );
}

#[test]
fn syntactically_invalid_replacement_never_reaches_disk() {
    let (repo, _index, _store, engine) = setup(&[("a.py", PACKAGE_A), ("b.py", PACKAGE_B)]);
    let original = fs::read_to_string(repo.path().join("a.py")).unwrap();

    let err = engine
        .edit("a.py", "foo", "def foo(self:\n    broken", None, Some("A"), false, false)
        .unwrap_err();
    assert!(matches!(err, CerberusError::Validation { .. }));
    assert_eq!(err.exit_code().code(), 2);
    assert_eq!(
        fs::read_to_string(repo.path().join("a.py")).unwrap(),
        original
    );
}

#[test]
fn typescript_edit_pipeline_works_end_to_end() {
    let source = "export class Greeter {\n  greet(name: string): string {\n    return name;\n  }\n}\n";
    let (repo, _index, _store, engine) = setup(&[("greeter.ts", source)]);

    let result = engine
        .edit(
            "greeter.ts",
            "greet",
            "greet(name: string): string {\n  return `hello ${name}`;\n}\n",
            None,
            Some("Greeter"),
            false,
            false,
        )
        .unwrap();
    assert!(result.success);

    let content = fs::read_to_string(repo.path().join("greeter.ts")).unwrap();
    assert!(content.contains("hello ${name}"));
    assert!(cerberus::mutation::validate_syntax(&content, Language::TypeScript).is_empty());
}
