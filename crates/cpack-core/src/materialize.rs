//! Place one manifest model at its usage path in the target workspace.

use crate::CoreError;
use cpack_remote::Resolver;
use cpack_schema::ModelEntry;
use cpack_store::{LinkMode, LinkOutcome, ModelStore, PutMode, StoreError};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// How a model reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "link", rename_all = "snake_case")]
pub enum ModelAction {
    /// Served from the store.
    Linked(LinkOutcome),
    /// Found at the destination, moved into the store, then linked back.
    Adopted(LinkOutcome),
    /// Downloaded, committed to the store, then linked.
    Downloaded(LinkOutcome),
}

impl ModelAction {
    pub fn downloaded(self) -> bool {
        matches!(self, ModelAction::Downloaded(_))
    }
}

/// Shared, read-only inputs of every model task.
pub struct MaterializeContext<'a> {
    pub store: &'a ModelStore,
    /// `None` disables downloads.
    pub resolver: Option<&'a Resolver>,
    pub target: &'a Path,
    pub link_mode: LinkMode,
    pub should_stop: &'a (dyn Fn() -> bool + Sync),
}

/// Store hit → link; a matching file already at the destination → adopt it;
/// otherwise resolve and download.
pub fn materialize_model(
    entry: &ModelEntry,
    ctx: &MaterializeContext<'_>,
) -> Result<ModelAction, CoreError> {
    if (ctx.should_stop)() {
        return Err(CoreError::Cancelled);
    }
    let dest = ctx.target.join(&entry.filename);

    if ctx.store.has(&entry.digest) {
        let outcome = ctx.store.link(&entry.digest, &dest, ctx.link_mode)?;
        debug!("{}: {outcome} from store", entry.filename);
        return Ok(ModelAction::Linked(outcome));
    }

    if let Ok(meta) = fs::symlink_metadata(&dest) {
        if meta.is_file() {
            if meta.len() != entry.size_bytes {
                return Err(StoreError::DestinationOccupied { path: dest }.into());
            }
            info!("adopting existing {} into the store", entry.filename);
            ctx.store.put(&entry.digest, &dest, PutMode::Move)?;
            let outcome = ctx.store.link(&entry.digest, &dest, ctx.link_mode)?;
            return Ok(ModelAction::Adopted(outcome));
        }
    }

    let Some(resolver) = ctx.resolver else {
        return Err(cpack_remote::RemoteError::Unresolved {
            digest: entry.digest.to_string(),
            causes: vec!["downloads are disabled".to_owned()],
        }
        .into());
    };
    let should_stop: &dyn Fn() -> bool = ctx.should_stop;
    match resolver.fetch(entry, ctx.store, should_stop) {
        Ok(_) => {}
        Err(cpack_remote::RemoteError::Cancelled) => return Err(CoreError::Cancelled),
        Err(e) => return Err(e.into()),
    }
    let outcome = ctx.store.link(&entry.digest, &dest, ctx.link_mode)?;
    Ok(ModelAction::Downloaded(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpack_remote::memory::MemoryTransport;
    use cpack_remote::RegistryConfig;
    use cpack_schema::OriginHint;
    use cpack_store::hash_bytes;
    use std::sync::Arc;

    const URL: &str = "https://example.com/m.safetensors";

    fn entry(bytes: &[u8]) -> ModelEntry {
        ModelEntry {
            digest: hash_bytes(bytes),
            size_bytes: bytes.len() as u64,
            filename: "models/checkpoints/m.safetensors".to_owned(),
            included_inline: false,
            optional: false,
            referenced: true,
            origin: Some(OriginHint::Url { url: URL.to_owned() }),
        }
    }

    fn never() -> bool {
        false
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ModelStore,
        target: std::path::PathBuf,
        transport: Arc<MemoryTransport>,
        resolver: Resolver,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path().join("home")).unwrap();
        let target = dir.path().join("ws");
        let transport = Arc::new(MemoryTransport::new());
        let resolver = Resolver::new(RegistryConfig::default(), transport.clone()).unwrap();
        Fixture {
            _dir: dir,
            store,
            target,
            transport,
            resolver,
        }
    }

    fn ctx(f: &Fixture) -> MaterializeContext<'_> {
        MaterializeContext {
            store: &f.store,
            resolver: Some(&f.resolver),
            target: &f.target,
            link_mode: LinkMode::Symlink,
            should_stop: &never,
        }
    }

    #[test]
    fn store_hit_links_without_download() {
        let f = fixture();
        let e = entry(b"weights");
        let src = f.target.with_file_name("src.bin");
        fs::write(&src, b"weights").unwrap();
        f.store.put(&e.digest, &src, PutMode::Copy).unwrap();

        let action = materialize_model(&e, &ctx(&f)).unwrap();
        assert_eq!(action, ModelAction::Linked(LinkOutcome::Symlinked));
        assert_eq!(fs::read(f.target.join(&e.filename)).unwrap(), b"weights");
        assert_eq!(f.transport.request_count(), 0);
    }

    #[test]
    fn store_hit_does_not_accept_foreign_bytes_at_destination() {
        let f = fixture();
        let e = entry(b"AAAA");
        let src = f.target.with_file_name("src.bin");
        fs::write(&src, b"AAAA").unwrap();
        f.store.put(&e.digest, &src, PutMode::Copy).unwrap();
        let dest = f.target.join(&e.filename);
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"BBBB").unwrap();

        assert!(materialize_model(&e, &ctx(&f)).is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"BBBB");
    }

    #[test]
    fn miss_downloads_then_links() {
        let f = fixture();
        let e = entry(b"weights");
        f.transport.serve(URL, b"weights".to_vec());
        let action = materialize_model(&e, &ctx(&f)).unwrap();
        assert!(action.downloaded());
        assert!(f.store.has(&e.digest));
        assert_eq!(fs::read(f.target.join(&e.filename)).unwrap(), b"weights");
    }

    #[test]
    fn existing_destination_file_is_adopted() {
        let f = fixture();
        let e = entry(b"weights");
        let dest = f.target.join(&e.filename);
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"weights").unwrap();

        let action = materialize_model(&e, &ctx(&f)).unwrap();
        assert_eq!(action, ModelAction::Adopted(LinkOutcome::Symlinked));
        assert!(f.store.has(&e.digest));
        assert!(fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
        assert_eq!(f.transport.request_count(), 0);
    }

    #[test]
    fn wrong_file_at_destination_is_left_alone() {
        let f = fixture();
        let e = entry(b"weights");
        let dest = f.target.join(&e.filename);
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"WEIGHTS").unwrap();

        let err = materialize_model(&e, &ctx(&f)).unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Integrity { .. })));
        assert_eq!(fs::read(&dest).unwrap(), b"WEIGHTS");
        assert!(!f.store.has(&e.digest));
    }

    #[test]
    fn unresolvable_model_fails() {
        let f = fixture();
        let mut e = entry(b"weights");
        e.origin = None;
        let err = materialize_model(&e, &ctx(&f)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Remote(cpack_remote::RemoteError::Unresolved { .. })
        ));
    }

    #[test]
    fn downloads_can_be_disabled() {
        let f = fixture();
        f.transport.serve(URL, b"weights".to_vec());
        let mut c = ctx(&f);
        c.resolver = None;
        assert!(materialize_model(&entry(b"weights"), &c).is_err());
        assert_eq!(f.transport.request_count(), 0);
    }

    #[test]
    fn stop_request_short_circuits() {
        let f = fixture();
        let mut c = ctx(&f);
        let stop = || true;
        c.should_stop = &stop;
        assert!(matches!(
            materialize_model(&entry(b"weights"), &c),
            Err(CoreError::Cancelled)
        ));
    }
}
