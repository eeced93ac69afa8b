use crate::artifact::{read_artifact, write_artifact, Artifact, INPUT_DIR};
use crate::concurrency::WorkspaceLock;
use crate::config::CpackConfig;
use crate::lifecycle::{validate_transition, UnpackState};
use crate::materialize::{materialize_model, MaterializeContext, ModelAction};
use crate::pool::run_bounded;
use crate::scan::{collect_inputs, graph_string_inputs, scan_models};
use crate::{CoreError, ModelFailure, PartialUnpack};
use cpack_remote::http::HttpTransport;
use cpack_remote::Resolver;
use cpack_runtime::{
    select_backend, snapshot, BuildOptions, CheckoutAction, EnvironmentBuilder, EnvironmentHandle,
    PackagePhase, RuntimeBackend, RuntimeError, SnapshotOptions,
};
use cpack_schema::{
    build_manifest, compute_pack_id, GraphRef, InclusionPolicy, ModelEntry, OriginHint,
    EDITOR_GRAPH_FILE, GRAPH_FILE,
};
use cpack_store::{hash_bytes, HashCache, ModelStore, PutMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pack and unpack over an injected store, runtime backend and resolver.
pub struct Engine {
    store: ModelStore,
    backend: Arc<dyn RuntimeBackend>,
    /// `None` runs offline: models must already be in the store or the workspace.
    resolver: Option<Resolver>,
    config: CpackConfig,
}

#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Root of the live workspace (`custom_nodes/`, `models/`, `input/`).
    pub workspace: PathBuf,
    /// The graph document to pack.
    pub graph: PathBuf,
    /// Editor-form graph packed alongside `graph`, if any.
    pub editor_graph: Option<PathBuf>,
    /// Where the `*.cpack.zip` is written.
    pub output: PathBuf,
    /// Interpreter to inspect instead of `<workspace>/.venv`.
    pub python: Option<PathBuf>,
    pub policy: InclusionPolicy,
    /// Origin hints keyed by filename, trailing sub-path, or digest.
    pub origins: BTreeMap<String, OriginHint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub path: PathBuf,
    pub pack_id: String,
    pub short_id: String,
    pub python: Option<String>,
    pub packages: usize,
    pub extensions: usize,
    pub models: usize,
    pub referenced_models: usize,
    pub stored_inline: usize,
    pub assets: usize,
    pub editor_graph: bool,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub digest: String,
    pub filename: String,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ModelAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionReport {
    pub path: String,
    pub action: CheckoutAction,
}

/// Outcome of one unpack that reached the model phase.
#[derive(Debug, Clone, Serialize)]
pub struct UnpackReport {
    pub pack_id: String,
    pub target: PathBuf,
    pub state: UnpackState,
    pub core: Option<CheckoutAction>,
    pub packages: PackagePhase,
    pub extensions: Vec<ExtensionReport>,
    pub models: Vec<ModelReport>,
}

impl UnpackReport {
    /// Required models that failed, with their causes.
    pub fn failures(&self) -> Vec<ModelFailure> {
        self.models
            .iter()
            .filter(|m| !m.optional)
            .filter_map(|m| {
                m.error.as_ref().map(|cause| ModelFailure {
                    digest: m.digest.clone(),
                    filename: m.filename.clone(),
                    cause: cause.clone(),
                })
            })
            .collect()
    }

    pub fn downloads(&self) -> usize {
        self.models
            .iter()
            .filter(|m| m.action.is_some_and(ModelAction::downloaded))
            .count()
    }

    pub fn is_done(&self) -> bool {
        self.state == UnpackState::Done
    }

    /// `Ok` only when the unpack reached `Done`; otherwise a [`PartialUnpack`]
    /// naming every failed required model.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.is_done() {
            Ok(self)
        } else {
            Err(CoreError::PartialUnpack(PartialUnpack {
                failures: self.failures(),
            }))
        }
    }
}

/// Run one phase. Success moves `state` to `to`; failure moves it to `Failed`
/// and wraps the cause with the stage it was trying to reach.
fn advance<T>(
    state: &mut UnpackState,
    to: UnpackState,
    phase: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    match phase() {
        Ok(value) => {
            validate_transition(*state, to)?;
            debug!("unpack state {state} -> {to}");
            *state = to;
            Ok(value)
        }
        Err(e) => {
            validate_transition(*state, UnpackState::Failed)?;
            warn!("unpack failed while reaching {to}: {e}");
            *state = UnpackState::Failed;
            Err(CoreError::Stage {
                stage: to,
                source: Box::new(e),
            })
        }
    }
}

fn runtime(e: RuntimeError) -> CoreError {
    match e {
        RuntimeError::Cancelled => CoreError::Cancelled,
        other => CoreError::Runtime(other),
    }
}

/// Write `bytes` at `path` unless it already holds exactly them. Returns whether it wrote.
fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool, CoreError> {
    if fs::read(path).is_ok_and(|existing| existing == bytes) {
        return Ok(false);
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    Ok(true)
}

impl Engine {
    pub fn new(
        store: ModelStore,
        backend: Arc<dyn RuntimeBackend>,
        resolver: Option<Resolver>,
        config: CpackConfig,
    ) -> Self {
        Self {
            store,
            backend,
            resolver,
            config,
        }
    }

    /// Production wiring: the store under `home`, the named runtime backend
    /// (`uv` or `mock`), and HTTP downloads unless `offline`.
    pub fn open(
        home: &Path,
        config: CpackConfig,
        backend: &str,
        offline: bool,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let backend: Arc<dyn RuntimeBackend> = Arc::from(select_backend(backend)?);
        let store = ModelStore::open(home)?;
        let resolver = if offline {
            None
        } else {
            let transport = Arc::new(HttpTransport::new(&config.registry));
            Some(Resolver::new(config.registry.clone(), transport)?)
        };
        Ok(Self::new(store, backend, resolver, config))
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn config(&self) -> &CpackConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn RuntimeBackend {
        self.backend.as_ref()
    }

    /// Snapshot the workspace and write an artifact.
    pub fn pack(&self, options: &PackOptions) -> Result<PackReport, CoreError> {
        info!("packing {}", options.workspace.display());
        let graph = fs::read(&options.graph)?;
        let refs = graph_string_inputs(&graph)?;

        let mut env = EnvironmentHandle::for_workspace(&options.workspace);
        if let Some(python) = &options.python {
            env = env.with_python(python);
        }
        let snap = snapshot(
            self.backend.as_ref(),
            &env,
            &SnapshotOptions {
                exclude_packages: self.config.exclude_packages.clone(),
                index_url: self.config.index_url.clone(),
            },
        )?;

        let mut cache = HashCache::load(self.store.layout().hash_cache_path());
        let models = scan_models(&options.workspace, &mut cache, &refs, &options.origins)?;
        if let Err(e) = cache.save() {
            warn!("could not save hash cache: {e}");
        }

        let graph_ref = GraphRef {
            file: GRAPH_FILE.to_owned(),
            digest: hash_bytes(&graph),
        };
        let mut built = build_manifest(&snap, &models, graph_ref, &options.policy)?;

        let editor_graph = match &options.editor_graph {
            Some(path) => {
                let bytes = fs::read(path)?;
                built.manifest.editor_graph = Some(GraphRef {
                    file: EDITOR_GRAPH_FILE.to_owned(),
                    digest: hash_bytes(&bytes),
                });
                Some(bytes)
            }
            None => None,
        };

        for model in &built.store_inline {
            self.store.put(
                &model.digest,
                &options.workspace.join(&model.filename),
                PutMode::Copy,
            )?;
        }

        let assets = collect_inputs(&options.workspace, &refs)?;
        let artifact = Artifact {
            manifest: built.manifest,
            graph,
            editor_graph,
            assets,
        };
        write_artifact(&options.output, &artifact)?;
        let identity = compute_pack_id(&artifact.manifest)?;
        let manifest = &artifact.manifest;
        info!("packed {} as {}", options.output.display(), identity.short_id);

        Ok(PackReport {
            path: options.output.clone(),
            pack_id: identity.pack_id.into_inner(),
            short_id: identity.short_id.into_inner(),
            python: manifest.python.clone(),
            packages: manifest.packages.len(),
            extensions: manifest.extensions.len(),
            models: manifest.models.len(),
            referenced_models: manifest.models.values().filter(|m| m.referenced).count(),
            stored_inline: built.store_inline.len(),
            assets: artifact.assets.len(),
            editor_graph: artifact.editor_graph.is_some(),
            anomalies: built.anomalies,
        })
    }

    pub fn unpack(
        &self,
        archive: &Path,
        target: &Path,
        should_stop: &(dyn Fn() -> bool + Sync),
    ) -> Result<UnpackReport, CoreError> {
        let artifact = read_artifact(archive)?;
        self.unpack_artifact(&artifact, target, should_stop)
    }

    /// Drive the unpack state machine for an already decoded artifact.
    ///
    /// Environment and extension failures abort with [`CoreError::Stage`]. Model
    /// failures are collected into the report; see [`UnpackReport::into_result`].
    pub fn unpack_artifact(
        &self,
        artifact: &Artifact,
        target: &Path,
        should_stop: &(dyn Fn() -> bool + Sync),
    ) -> Result<UnpackReport, CoreError> {
        let manifest = &artifact.manifest;
        manifest.validate()?;
        fs::create_dir_all(target)?;
        let _lock = WorkspaceLock::for_target(target)?;
        let identity = compute_pack_id(manifest)?;
        info!("unpacking {} into {}", identity.short_id, target.display());

        let mut state = UnpackState::Init;
        let builder = EnvironmentBuilder::new(
            self.backend.as_ref(),
            target,
            BuildOptions {
                run_install_scripts: self.config.run_install_scripts,
                index_url: self.config.index_url.clone(),
            },
        );

        let (core, packages) = advance(&mut state, UnpackState::EnvironmentReady, || {
            let core = builder.prepare_core(manifest).map_err(runtime)?;
            if should_stop() {
                return Err(CoreError::Cancelled);
            }
            let packages = builder.install_packages(manifest).map_err(runtime)?;
            Ok((core, packages))
        })?;

        let extensions = advance(&mut state, UnpackState::ExtensionsReady, || {
            if should_stop() {
                return Err(CoreError::Cancelled);
            }
            let actions = builder
                .checkout_extensions(manifest, should_stop)
                .map_err(runtime)?;
            self.write_workspace_files(artifact, target)?;
            Ok(actions
                .into_iter()
                .map(|(path, action)| ExtensionReport { path, action })
                .collect::<Vec<_>>())
        })?;

        let models = advance(&mut state, UnpackState::ModelsReady, || {
            Ok(self.materialize_models(manifest, target, should_stop))
        })?;

        let mut report = UnpackReport {
            pack_id: identity.pack_id.into_inner(),
            target: target.to_path_buf(),
            state,
            core,
            packages,
            extensions,
            models,
        };
        if report.failures().is_empty() {
            validate_transition(report.state, UnpackState::Done)?;
            report.state = UnpackState::Done;
            info!("unpack of {} complete", identity.short_id);
        } else {
            warn!(
                "{} required model(s) could not be materialized",
                report.failures().len()
            );
        }
        Ok(report)
    }

    fn write_workspace_files(&self, artifact: &Artifact, target: &Path) -> Result<(), CoreError> {
        let graph_path = target.join(&artifact.manifest.graph.file);
        if write_if_changed(&graph_path, &artifact.graph)? {
            debug!("wrote {}", graph_path.display());
        }
        if let (Some(graph_ref), Some(bytes)) =
            (&artifact.manifest.editor_graph, &artifact.editor_graph)
        {
            let path = target.join(&graph_ref.file);
            if write_if_changed(&path, bytes)? {
                debug!("wrote {}", path.display());
            }
        }
        for (name, bytes) in &artifact.assets {
            let path = target.join(INPUT_DIR).join(name);
            if write_if_changed(&path, bytes)? {
                debug!("wrote {}", path.display());
            }
        }
        Ok(())
    }

    fn materialize_models(
        &self,
        manifest: &cpack_schema::Manifest,
        target: &Path,
        should_stop: &(dyn Fn() -> bool + Sync),
    ) -> Vec<ModelReport> {
        let ctx = MaterializeContext {
            store: &self.store,
            resolver: self.resolver.as_ref(),
            target,
            link_mode: self.config.link_mode,
            should_stop,
        };
        let entries: Vec<&ModelEntry> = manifest.models.values().collect();
        let results = run_bounded(&entries, self.config.concurrency, |entry| {
            materialize_model(entry, &ctx)
        });

        entries
            .into_iter()
            .zip(results)
            .map(|(entry, result)| {
                let (action, error) = match result {
                    Ok(action) => (Some(action), None),
                    Err(e) => {
                        if entry.optional {
                            warn!("optional model {} skipped: {e}", entry.filename);
                        } else {
                            warn!("model {} ({}) failed: {e}", entry.filename, entry.digest.short());
                        }
                        (None, Some(e.to_string()))
                    }
                };
                ModelReport {
                    digest: entry.digest.to_string(),
                    filename: entry.filename.clone(),
                    optional: entry.optional,
                    action,
                    error,
                }
            })
            .collect()
    }
}
