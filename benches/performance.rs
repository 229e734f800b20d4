//! Performance benchmarks for the state store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use statekeeper::actions::creators;
use statekeeper::history::{HistoryConfig, HistoryEngine, HistoryMiddleware};
use statekeeper::persistence::{
    FileBackend, PersistenceBackend, SaveMetadata, SqliteBackend, SqliteBackendConfig,
};
use statekeeper::snapshots::{SnapshotConfig, SnapshotManager, SnapshotType};
use statekeeper::{default_reducer, State, Store, StoreConfig};
use std::sync::Arc;
use tempfile::TempDir;

fn populated_store(elements: usize) -> Store {
    let store = Store::new(default_reducer(), StoreConfig::default()).unwrap();
    for i in 0..elements {
        store
            .dispatch(creators::add_element(format!("e{}", i)))
            .unwrap();
    }
    store
}

fn large_state(slices: usize) -> State {
    (0..slices).fold(State::new(), |state, i| {
        state.with_slice(
            format!("slice{}", i),
            json!({"items": (0..50).map(|n| json!({"n": n, "label": format!("item {}", n)})).collect::<Vec<_>>()}),
        )
    })
}

/// Dispatch cost with and without history recording
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for elements in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("plain", elements),
            &elements,
            |b, &elements| {
                let store = populated_store(elements);
                let mut zoom = 1.0;
                b.iter(|| {
                    zoom = if zoom > 4.0 { 1.0 } else { zoom + 0.1 };
                    black_box(store.dispatch(creators::set_zoom(zoom)).unwrap());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("with_history", elements),
            &elements,
            |b, &elements| {
                let engine = Arc::new(HistoryEngine::new(HistoryConfig::default()));
                let store = Store::new(default_reducer(), StoreConfig::default()).unwrap();
                store
                    .add_middleware(Arc::new(HistoryMiddleware::new(Arc::clone(&engine))))
                    .unwrap();
                for i in 0..elements {
                    store
                        .dispatch(creators::add_element(format!("e{}", i)))
                        .unwrap();
                }
                let mut zoom = 1.0;
                b.iter(|| {
                    zoom = if zoom > 4.0 { 1.0 } else { zoom + 0.1 };
                    black_box(store.dispatch(creators::set_zoom(zoom)).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Snapshot creation and restore, full vs incremental
fn bench_snapshots(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshots");
    let base = large_state(20);
    let changed = base.with_slice("slice0", json!({"items": []}));

    group.bench_function("create_full", |b| {
        let manager = SnapshotManager::new(SnapshotConfig::default()).unwrap();
        b.iter(|| {
            black_box(
                manager
                    .create_snapshot(&base, None, None, Some(SnapshotType::Full))
                    .unwrap(),
            )
        });
    });

    group.bench_function("create_incremental", |b| {
        let manager = SnapshotManager::new(SnapshotConfig::default()).unwrap();
        let full = manager
            .create_snapshot(&base, None, None, Some(SnapshotType::Full))
            .unwrap();
        b.iter(|| black_box(manager.create_incremental(&full, &changed, None).unwrap()));
    });

    group.bench_function("restore_incremental_chain", |b| {
        let manager = SnapshotManager::new(SnapshotConfig::default()).unwrap();
        manager
            .create_snapshot(&base, None, None, Some(SnapshotType::Full))
            .unwrap();
        let mut last = String::new();
        for i in 0..10 {
            last = manager
                .create_snapshot(
                    &base.with_slice("counter", json!(i)),
                    None,
                    None,
                    Some(SnapshotType::Incremental),
                )
                .unwrap();
        }
        b.iter(|| black_box(manager.restore_snapshot(&last).unwrap()));
    });

    group.finish();
}

/// Backend save/load throughput
fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    let state = large_state(10);

    group.bench_function("file_save", |b| {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(
                backend
                    .save_state(&state, &format!("v{:012}", n), &SaveMetadata::default())
                    .unwrap(),
            )
        });
    });

    group.bench_function("sqlite_save", |b| {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(
                backend
                    .save_state(&state, &format!("v{:012}", n), &SaveMetadata::default())
                    .unwrap(),
            )
        });
    });

    group.bench_function("sqlite_load_latest", |b| {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        backend
            .save_state(&state, "v1", &SaveMetadata::default())
            .unwrap();
        b.iter(|| black_box(backend.load_state(None).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_snapshots, bench_persistence);
criterion_main!(benches);
