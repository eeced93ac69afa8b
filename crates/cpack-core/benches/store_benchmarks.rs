use cpack_core::{CpackConfig, Engine, PackOptions};
use cpack_runtime::{CheckoutState, EnvironmentHandle, InstalledPackage, MockBackend};
use cpack_schema::{InclusionPolicy, ModelInclusion, GRAPH_FILE};
use cpack_store::{hash_bytes, hash_file, ModelStore, PutMode};
use criterion::{criterion_group, criterion_main, Criterion};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const GRAPH: &str = r#"{"1":{"class_type":"CheckpointLoaderSimple","inputs":{"ckpt_name":"model_00.safetensors"}}}"#;

fn never() -> bool {
    false
}

fn create_workspace(root: &Path, models: usize, model_size: usize) {
    let env = EnvironmentHandle::for_workspace(root);
    MockBackend::seed_env(
        &env,
        "3.11",
        &[InstalledPackage {
            name: "numpy".to_owned(),
            version: "1.26.4".to_owned(),
            editable: false,
        }],
    )
    .unwrap();
    MockBackend::seed_checkout(
        &root.join("custom_nodes/alpha"),
        &CheckoutState {
            remote_url: Some("https://example/alpha".to_owned()),
            revision: Some("abcd123".to_owned()),
            dirty: false,
        },
    )
    .unwrap();
    let dir = root.join("models/checkpoints");
    fs::create_dir_all(&dir).unwrap();
    for i in 0..models {
        let mut bytes = vec![0u8; model_size];
        bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
        fs::write(dir.join(format!("model_{i:02}.safetensors")), bytes).unwrap();
    }
    fs::write(root.join(GRAPH_FILE), GRAPH).unwrap();
}

fn engine(home: &Path) -> Engine {
    Engine::new(
        ModelStore::open(home).unwrap(),
        Arc::new(MockBackend::new()),
        None,
        CpackConfig::default(),
    )
}

fn options(root: &Path, output: &Path, policy: InclusionPolicy) -> PackOptions {
    PackOptions {
        workspace: root.to_path_buf(),
        graph: root.join(GRAPH_FILE),
        output: output.to_path_buf(),
        policy,
        ..PackOptions::default()
    }
}

fn bench_hash_file(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob.bin");
    fs::write(&path, vec![7u8; 16 * 1024 * 1024]).unwrap();
    c.bench_function("hash_file_16mib", |b| {
        b.iter(|| hash_file(&path).unwrap());
    });
}

fn bench_store_put(c: &mut Criterion) {
    c.bench_function("store_put_copy_4mib", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let store = ModelStore::open(dir.path().join("home")).unwrap();
                let bytes = vec![3u8; 4 * 1024 * 1024];
                let src = dir.path().join("model.bin");
                fs::write(&src, &bytes).unwrap();
                (dir, store, src, hash_bytes(&bytes))
            },
            |(_dir, store, src, digest)| {
                store.put(&digest, &src, PutMode::Copy).unwrap();
            },
        );
    });
}

fn bench_pack(c: &mut Criterion) {
    c.bench_function("engine_pack_mock_8models", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let root = dir.path().join("ws");
                create_workspace(&root, 8, 256 * 1024);
                let engine = engine(&dir.path().join("home"));
                (dir, root, engine)
            },
            |(dir, root, engine)| {
                let out = dir.path().join("a.cpack");
                engine
                    .pack(&options(&root, &out, InclusionPolicy::default()))
                    .unwrap();
            },
        );
    });
}

fn bench_unpack_unchanged(c: &mut Criterion) {
    c.bench_function("engine_unpack_unchanged", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let root = dir.path().join("ws");
                create_workspace(&root, 8, 256 * 1024);
                let engine = engine(&dir.path().join("home"));
                let out = dir.path().join("a.cpack");
                let policy = InclusionPolicy::with_default(ModelInclusion::Store);
                engine.pack(&options(&root, &out, policy)).unwrap();
                let target = dir.path().join("target");
                engine.unpack(&out, &target, &never).unwrap();
                (dir, engine, out, target)
            },
            |(_dir, engine, out, target)| {
                engine.unpack(&out, &target, &never).unwrap();
            },
        );
    });
}

fn bench_verify_store(c: &mut Criterion) {
    c.bench_function("verify_store_100models", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let store = ModelStore::open(dir.path().join("home")).unwrap();
                for i in 0..100 {
                    let bytes = format!("model-{i}").into_bytes();
                    let src = dir.path().join("src.bin");
                    fs::write(&src, &bytes).unwrap();
                    store.put(&hash_bytes(&bytes), &src, PutMode::Move).unwrap();
                }
                (dir, store)
            },
            |(_dir, store)| {
                cpack_store::verify_store_integrity(store.layout()).unwrap();
            },
        );
    });
}

criterion_group!(
    benches,
    bench_hash_file,
    bench_store_put,
    bench_pack,
    bench_unpack_unchanged,
    bench_verify_store,
);
criterion_main!(benches);
