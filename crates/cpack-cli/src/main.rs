mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use cpack_core::config::CONFIG_FILE;
use cpack_core::{cpack_home, install_signal_handler, CpackConfig, Engine};
use cpack_schema::ModelInclusion;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cpack",
    version,
    about = "Pack a node-graph workflow environment into a reproducible artifact"
)]
struct Cli {
    /// cpack home holding the model store and config.json [default: $CPACK_HOME or ~/.cpack].
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Runtime backend used to inspect and build environments (uv or mock).
    #[arg(long, default_value = "uv", global = true)]
    backend: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Snapshot a workspace and its graph into a .cpack.zip artifact.
    Pack {
        /// Workspace root (editor checkout with custom_nodes/, models/, input/).
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Graph document [default: <workspace>/workflow_api.json].
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Editor-form graph to pack alongside [default: <workspace>/workflow.json if present].
        #[arg(long)]
        editor_graph: Option<PathBuf>,
        /// Artifact path [default: ./<workspace name>.cpack.zip].
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Interpreter to inspect instead of <workspace>/.venv.
        #[arg(long)]
        python: Option<PathBuf>,
        /// Default treatment of model files: exclude, optional, reference or store.
        #[arg(long, default_value = "reference")]
        include: ModelInclusion,
        /// Per-model override, by filename or digest (repeatable).
        #[arg(long = "model", value_name = "NAME=MODE")]
        models: Vec<String>,
        /// Where a model can be downloaded: hf:owner/repo/path[@rev], civitai:ID or a URL (repeatable).
        #[arg(long = "origin", value_name = "NAME=HINT")]
        origins: Vec<String>,
    },
    /// Rebuild a workspace from an artifact.
    Unpack {
        /// Artifact produced by `cpack pack`.
        archive: PathBuf,
        /// Directory to rebuild into.
        target: PathBuf,
        /// Never download; only the local store is used for models.
        #[arg(long, default_value_t = false)]
        offline: bool,
        /// Parallel model materializations (overrides config).
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Print an artifact's manifest and pack id.
    Inspect {
        /// Artifact to read.
        archive: PathBuf,
    },
    /// Print the content digest of a file.
    Hash {
        /// File to hash.
        file: PathBuf,
    },
    /// Rehash every model in the local store.
    VerifyStore,
    /// List models in the local store.
    StoreList,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CPACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    match dispatch(&cli, cli.json) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn dispatch(cli: &Cli, json: bool) -> Result<u8, String> {
    match &cli.command {
        Commands::Pack {
            workspace,
            graph,
            editor_graph,
            output,
            python,
            include,
            models,
            origins,
        } => {
            let engine = open_engine(cli, false, None)?;
            commands::pack::run(
                &engine,
                &commands::pack::PackArgs {
                    workspace,
                    graph: graph.as_deref(),
                    editor_graph: editor_graph.as_deref(),
                    output: output.as_deref(),
                    python: python.as_deref(),
                    include: *include,
                    models,
                    origins,
                },
                json,
            )
        }
        Commands::Unpack {
            archive,
            target,
            offline,
            jobs,
        } => {
            let engine = open_engine(cli, *offline, *jobs)?;
            commands::unpack::run(&engine, archive, target, json)
        }
        Commands::Inspect { archive } => commands::inspect::run(archive, json),
        Commands::Hash { file } => commands::hash::run(file, json),
        Commands::VerifyStore => {
            let engine = open_engine(cli, true, None)?;
            commands::verify_store::run(&engine, json)
        }
        Commands::StoreList => {
            let engine = open_engine(cli, true, None)?;
            commands::store_list::run(&engine, json)
        }
    }
}

fn open_engine(cli: &Cli, offline: bool, jobs: Option<usize>) -> Result<Engine, String> {
    let home = match &cli.home {
        Some(home) => home.clone(),
        None => cpack_home().map_err(|e| e.to_string())?,
    };
    tracing::debug!("cpack home: {}", home.display());
    let mut config = load_config(&home)?;
    if let Some(jobs) = jobs {
        config.concurrency = jobs;
    }
    Engine::open(&home, config, &cli.backend, offline).map_err(|e| e.to_string())
}

fn load_config(home: &Path) -> Result<CpackConfig, String> {
    CpackConfig::load(&home.join(CONFIG_FILE)).map_err(|e| e.to_string())
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") || msg.starts_with("artifact error:") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}
