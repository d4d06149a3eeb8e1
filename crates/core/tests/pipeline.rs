//! End-to-end exercises of discovery → extraction → identity reuse →
//! persistence, without the encoder (which needs network access to fetch
//! model weights). These lock in order-stability and identity-reuse across
//! file additions, deletions, and ignore-rule changes.

use std::fs;

use owlspot_core::extractor::extract_file;
use owlspot_core::fingerprint::hash_file;
use owlspot_core::function_store::{FunctionRecord, FunctionStore};
use owlspot_core::ignore_filter::IgnoreFilter;
use owlspot_core::index_state::{FileEntry, IndexState, ModelConfig};

fn records_for(path: &std::path::Path) -> Vec<FunctionRecord> {
    extract_file(path, "py")
        .into_iter()
        .map(|raw| FunctionRecord {
            name: raw.name,
            code: raw.code,
            file: path.to_path_buf(),
            lineno: raw.lineno,
            end_lineno: raw.end_lineno,
            class_name: raw.class_name,
        })
        .collect()
}

#[test]
fn appending_a_function_preserves_prior_identities() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.py");
    let b_path = dir.path().join("b.py");
    fs::write(&a_path, "def foo():\n    return 1\n").unwrap();
    fs::write(&b_path, "def bar():\n    return 2\n").unwrap();

    let filter = IgnoreFilter::load(dir.path());
    let files = filter.collect_files("py");
    assert_eq!(files.len(), 2);

    let mut store = FunctionStore::new();
    for f in &files {
        for r in records_for(f) {
            store.push(r);
        }
    }
    assert_eq!(store.len(), 2);
    let foo_identity_before = store.iter().find(|r| r.name == "foo").unwrap().identity();

    // Append a third function to b.py.
    fs::write(&b_path, "def bar():\n    return 2\n\ndef baz():\n    return 3\n").unwrap();

    let mut store2 = FunctionStore::new();
    for f in &files {
        for r in records_for(f) {
            store2.push(r);
        }
    }
    assert_eq!(store2.len(), 3);
    let foo_identity_after = store2.iter().find(|r| r.name == "foo").unwrap().identity();
    assert_eq!(foo_identity_before, foo_identity_after, "unchanged function's identity must be stable");
}

#[test]
fn deleting_a_file_drops_only_its_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.py");
    let b_path = dir.path().join("b.py");
    fs::write(&a_path, "def foo():\n    return 1\n").unwrap();
    fs::write(&b_path, "def bar():\n    return 2\n").unwrap();

    let mut store = FunctionStore::new();
    for f in [&a_path, &b_path] {
        for r in records_for(f) {
            store.push(r);
        }
    }
    assert_eq!(store.len(), 2);

    fs::remove_file(&a_path).unwrap();
    let filter = IgnoreFilter::load(dir.path());
    let remaining = filter.collect_files("py");
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].ends_with("b.py"));

    let mut store2 = FunctionStore::new();
    for f in &remaining {
        for r in records_for(f) {
            store2.push(r);
        }
    }
    assert_eq!(store2.len(), 1);
    assert_eq!(store2.iter().next().unwrap().name, "bar");
}

#[test]
fn gitignored_build_dir_is_pruned_and_new_file_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
    fs::create_dir(dir.path().join("build")).unwrap();
    fs::write(dir.path().join("build").join("generated.py"), "def gen():\n    pass\n").unwrap();
    fs::create_dir(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src").join("a.py"), "def a():\n    pass\n").unwrap();

    let filter = IgnoreFilter::load(dir.path());
    let files = filter.collect_files("py");
    assert_eq!(files.len(), 1);

    fs::write(dir.path().join("src").join("new.py"), "def b():\n    pass\n").unwrap();
    let filter = IgnoreFilter::load(dir.path());
    let files = filter.collect_files("py");
    assert_eq!(files.len(), 2);
}

#[test]
fn corrupt_embeddings_artifact_is_cleared_independently_of_functions() {
    let dir = tempfile::tempdir().unwrap();
    let src_file = dir.path().join("a.py");
    fs::write(&src_file, "def foo():\n    return 1\n").unwrap();

    let mut state = IndexState::empty(dir.path().to_path_buf(), "py".into(), ModelConfig::new("m"), 2);
    for r in records_for(&src_file) {
        state.functions.push(r);
    }
    state.file_info.insert(src_file.to_string_lossy().to_string(), FileEntry { hash: hash_file(&src_file).unwrap() });

    let target_dir = dir.path().join("target");
    state.save(&target_dir).unwrap();

    // Corrupt the embeddings artifact only.
    fs::write(target_dir.join("embeddings.npy"), b"not a valid npy file").unwrap();

    let loaded = IndexState::load(&target_dir, dir.path(), "py").unwrap();
    assert_eq!(loaded.functions.len(), 1, "functions.json should still load");
    assert_eq!(loaded.embeddings.len(), 0, "corrupt embeddings.npy should be cleared, not panic");
}
