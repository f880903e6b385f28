//! Blueprint scenarios: tree structure, overlays, hydration, and cache
//! soundness under invalidation.

use cerberus::blueprint::{BlueprintEngine, BlueprintFlags};
use cerberus::config::Settings;
use cerberus::indexing::IndexBuilder;
use cerberus::scanner::ScanOptions;
use cerberus::storage::IndexStore;
use cerberus::types::SymbolKind;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn build(root: &Path) -> (TempDir, Arc<IndexStore>) {
    let index = TempDir::new().unwrap();
    let store = Arc::new(IndexStore::open(index.path(), 8).unwrap());
    IndexBuilder::new(Arc::new(Settings::default()), store.clone(), None)
        .build(root, ScanOptions::default())
        .unwrap();
    (index, store)
}

#[test]
fn blueprint_nests_methods_and_carries_dependencies() {
    let repo = TempDir::new().unwrap();
    fs::write(
        repo.path().join("a.py"),
        "class A:\n    def foo(self):\n        return 1\n",
    )
    .unwrap();
    fs::write(
        repo.path().join("b.py"),
        "from a import A\n\nclass B(A):\n    def bar(self):\n        return 2\n",
    )
    .unwrap();
    let (_index, store) = build(repo.path());

    let engine = BlueprintEngine::new(store, repo.path());
    let blueprint = engine
        .generate(
            "b.py",
            &BlueprintFlags {
                deps: true,
                ..Default::default()
            },
        )
        .unwrap();

    let class_b = blueprint.nodes.iter().find(|n| n.name == "B").unwrap();
    assert_eq!(class_b.kind, SymbolKind::Class);
    assert_eq!(class_b.children.len(), 1);
    assert_eq!(class_b.children[0].name, "bar");

    // The inherits edge to A shows up as a dependency.
    assert!(
        class_b
            .overlay
            .dependencies
            .iter()
            .any(|d| d.target_symbol == "A" && d.target_file.as_deref() == Some("a.py"))
    );
}

#[test]
fn hydration_includes_heavily_referenced_internal_file_within_budget() {
    let repo = TempDir::new().unwrap();
    fs::write(
        repo.path().join("b.py"),
        "class B:\n    def foo(self):\n        return 1\n    def bar(self):\n        return 2\n",
    )
    .unwrap();
    // Four separate uses of B from c.py clears the three-reference bar.
    fs::write(
        repo.path().join("c.py"),
        "from b import B\n\nx = B()\ny = B()\nz = B()\nx.foo()\ny.bar()\n",
    )
    .unwrap();
    let (_index, store) = build(repo.path());

    let engine = BlueprintEngine::new(store, repo.path());
    let blueprint = engine
        .generate(
            "c.py",
            &BlueprintFlags {
                deps: true,
                hydrate: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(blueprint.hydrated.len(), 1);
    let mini = &blueprint.hydrated[0];
    assert_eq!(mini.file_path, "b.py");
    assert!(mini.reference_count >= 3);
    assert!(mini.estimated_tokens <= 2000);
    assert!(mini.nodes.iter().any(|n| n.name == "B"));
}

#[test]
fn cache_hit_then_invalidate_then_miss_for_any_flags() {
    let repo = TempDir::new().unwrap();
    fs::write(repo.path().join("a.py"), "def f():\n    return 1\n").unwrap();
    let (_index, store) = build(repo.path());

    let engine = BlueprintEngine::new(store, repo.path());
    let plain = BlueprintFlags::default();
    let with_deps = BlueprintFlags {
        deps: true,
        ..Default::default()
    };

    // Generate under both flag sets, then read again: second reads hit.
    engine.generate("a.py", &plain).unwrap();
    engine.generate("a.py", &with_deps).unwrap();
    engine.generate("a.py", &plain).unwrap();
    assert!(engine.cache().stats().hits >= 1);

    // Invalidation wipes every flag variant.
    engine.cache().invalidate("a.py").unwrap();
    let misses_before = engine.cache().stats().misses;
    engine.generate("a.py", &plain).unwrap();
    engine.generate("a.py", &with_deps).unwrap();
    assert!(engine.cache().stats().misses >= misses_before + 2);
}

#[test]
fn stability_overlay_is_labeled_heuristic() {
    let repo = TempDir::new().unwrap();
    // Enough branching to register complexity.
    fs::write(
        repo.path().join("a.py"),
        "def gnarly(x):\n    if x and x > 1:\n        for i in range(x):\n            if i:\n                x += 1\n    return x\n",
    )
    .unwrap();
    let (_index, store) = build(repo.path());

    let engine = BlueprintEngine::new(store, repo.path());
    let blueprint = engine
        .generate(
            "a.py",
            &BlueprintFlags {
                complexity: true,
                churn: true,
                stability: true,
                ..Default::default()
            },
        )
        .unwrap();

    let node = &blueprint.nodes[0];
    assert!(node.overlay.complexity.is_some());
    if let Some(stability) = &node.overlay.stability {
        assert!(stability.heuristic);
        assert!((0.0..=1.0).contains(&stability.score));
    }
}

#[test]
fn aggregate_rolls_up_a_directory() {
    let repo = TempDir::new().unwrap();
    fs::create_dir(repo.path().join("pkg")).unwrap();
    fs::write(
        repo.path().join("pkg/a.py"),
        "class A:\n    def foo(self):\n        return 1\n",
    )
    .unwrap();
    fs::write(repo.path().join("pkg/b.py"), "def helper():\n    return 2\n").unwrap();
    fs::write(repo.path().join("outside.py"), "def other():\n    return 3\n").unwrap();
    let (_index, store) = build(repo.path());

    let engine = BlueprintEngine::new(store, repo.path());
    let aggregate = engine
        .aggregate("pkg", &BlueprintFlags::default())
        .unwrap();

    assert_eq!(aggregate.file_count, 2);
    assert_eq!(aggregate.symbol_count, 3);
    assert_eq!(aggregate.symbols_by_kind.get("class"), Some(&1));
    assert_eq!(aggregate.symbols_by_kind.get("method"), Some(&1));
    assert_eq!(aggregate.symbols_by_kind.get("function"), Some(&1));
}
