//! Heap configuration loaded from TOML files.

use std::fs;

use njord::{CollectorKind, GcError, Heap, HeapConfig};
use tempfile::TempDir;

#[test]
fn test_load_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("heap.toml");
    fs::write(
        &path,
        r#"
collector = "mark_compact"
initial_threshold = 4
max_threshold = 64
arena_bytes = 2048
"#,
    )
    .unwrap();

    let config = HeapConfig::load(&path).unwrap();
    assert_eq!(config.collector, CollectorKind::MarkCompact);
    assert_eq!(config.initial_threshold, 4);
    assert_eq!(config.max_threshold, 64);
    assert_eq!(config.stack_capacity, 1024);

    let heap = Heap::with_config(&config).unwrap();
    assert_eq!(heap.collector(), CollectorKind::MarkCompact);
    assert_eq!(heap.threshold(), 4);
}

#[test]
fn test_saved_config_reloads() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("heap.toml");
    let config = HeapConfig {
        stack_capacity: 16,
        ..HeapConfig::for_collector(CollectorKind::CheneyCopy)
    };
    fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    assert_eq!(HeapConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file() {
    let temp = TempDir::new().unwrap();
    let err = HeapConfig::load(&temp.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, GcError::Config(_)));
}

#[test]
fn test_invalid_config_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("heap.toml");
    fs::write(&path, "initial_threshold = 4096\nmax_threshold = 1024\n").unwrap();

    let err = HeapConfig::load(&path).unwrap_err();
    assert!(matches!(err, GcError::Config(_)));

    let config = HeapConfig {
        stack_capacity: 0,
        ..HeapConfig::default()
    };
    assert!(matches!(Heap::with_config(&config), Err(GcError::Config(_))));
}
