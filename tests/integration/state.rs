#[path = "common/mod.rs"]
mod common;

use common::HomeEnvGuard;
use hun::runtime;
use hun::state::{ProjectStatus, StateStore};
use std::sync::Arc;
use std::{fs, thread};
use tempfile::tempdir;

#[test]
fn concurrent_updates_never_corrupt_the_document() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let store = Arc::new(StateStore::open().unwrap());

    let mut handles = Vec::new();
    for worker in 0..4 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for round in 0..10 {
                let key = format!("project-{worker}-{round}");
                store
                    .update(|doc| {
                        doc.registry.insert(key.clone(), "/tmp/p".to_string());
                    })
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every write won; the on-disk document is valid JSON with all entries.
    let raw = fs::read_to_string(runtime::state_path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["schema_version"], 2);
    let doc = StateStore::open().unwrap().snapshot();
    assert_eq!(doc.registry.len(), 40);
}

#[test]
fn separate_store_instances_share_one_document() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    // The daemon holds a long-lived store; a CLI invocation opens its own.
    let daemon_store = StateStore::open().unwrap();
    daemon_store
        .update(|doc| {
            let record = doc.projects.entry("shop".to_string()).or_default();
            record.status = ProjectStatus::Running;
        })
        .unwrap();

    let cli_store = StateStore::open().unwrap();
    cli_store
        .update(|doc| {
            doc.registry
                .insert("blog".to_string(), "/tmp/blog".to_string());
        })
        .unwrap();

    // A later daemon write must not clobber the CLI's registry entry.
    daemon_store
        .update(|doc| {
            doc.active_project = "shop".to_string();
        })
        .unwrap();

    let doc = StateStore::open().unwrap().snapshot();
    assert_eq!(doc.registry["blog"], "/tmp/blog");
    assert_eq!(doc.projects["shop"].status, ProjectStatus::Running);
    assert_eq!(doc.active_project, "shop");
}

#[test]
fn no_partial_document_is_ever_visible() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let store = Arc::new(StateStore::open().unwrap());
    let writer_store = Arc::clone(&store);
    let writer = thread::spawn(move || {
        for round in 0..50 {
            writer_store
                .update(|doc| {
                    doc.active_project = format!("project-{round}");
                    doc.registry
                        .insert(format!("p{round}"), "/tmp/p".repeat(50));
                })
                .unwrap();
        }
    });

    // Reads racing the writer always observe a complete valid document.
    for _ in 0..50 {
        if runtime::state_path().exists() {
            let raw = fs::read_to_string(runtime::state_path()).unwrap();
            if !raw.is_empty() {
                let parsed: Result<serde_json::Value, _> = serde_json::from_str(&raw);
                assert!(parsed.is_ok(), "observed a torn state document");
            }
        }
    }
    writer.join().unwrap();
}
