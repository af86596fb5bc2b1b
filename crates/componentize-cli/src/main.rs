//! componentize: turn a core wasm module into a component.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use componentize::{Componentizer, DEFAULT_MODULE_FILE};
use thiserror::Error;

use config::{Config, ConfigError};
use logging::LoggingError;

/// CLI-specific errors.
#[derive(Error, Debug)]
enum AppError {
    /// Library error (wraps all componentize errors)
    #[error(transparent)]
    Library(#[from] componentize::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// Failed to write an output file
    #[error("Failed to write `{}`: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    fn exit_code(&self) -> u8 {
        let code = match self {
            Self::Library(e) => e.exit_code(),
            Self::Output { .. } => 5,
            Self::Config(_) | Self::Logging(_) => 1,
        };
        u8::try_from(code).unwrap_or(1)
    }

    fn hint(&self) -> &'static str {
        match self {
            Self::Library(e) if e.is_parse() => "fix the WIT syntax at the reported location",
            Self::Library(e) if e.is_resolution() => {
                "check that every used package, interface and type is defined; dependency packages go under `deps/`"
            }
            Self::Library(e) if e.is_link() => {
                "run `componentize abi` to see the core signatures the module must provide"
            }
            Self::Library(e) if e.is_io() => "check that the path exists and is accessible",
            Self::Library(_) => "rerun with RUST_LOG=componentize=debug for details",
            Self::Config(_) => "fix the configuration file or point --config at another one",
            Self::Logging(_) => "check the [logging] section of the configuration",
            Self::Output { .. } => "check that the output directory exists and is writable",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "componentize", version)]
#[command(about = "Link a core WebAssembly module against a WIT world into a component")]
struct Cli {
    /// WIT file or directory (repeatable; defaults to `wit`)
    #[arg(
        short = 'd',
        long = "wit-path",
        env = "COMPONENTIZE_WIT_PATH",
        value_delimiter = ','
    )]
    wit_paths: Vec<PathBuf>,

    /// World to target, plain or `ns:pkg/world`
    #[arg(short, long, env = "COMPONENTIZE_WORLD")]
    world: Option<String>,

    /// Enable `@unstable` features (comma or space separated, repeatable)
    #[arg(long, env = "COMPONENTIZE_FEATURES")]
    features: Vec<String>,

    /// Enable every `@unstable` feature
    #[arg(long, env = "COMPONENTIZE_ALL_FEATURES")]
    all_features: bool,

    /// Configuration file (defaults to `componentize.toml` if present)
    #[arg(short, long, env = "COMPONENTIZE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Link a core module into a component
    Link {
        /// Core module (`.wasm`, `.wat`, or a directory containing `main.wasm`)
        module: PathBuf,

        /// Output file (defaults to `<module-stem>.component.wasm`)
        #[arg(short, long, env = "COMPONENTIZE_OUTPUT")]
        output: Option<PathBuf>,

        /// Skip validating the component before writing it
        #[arg(long)]
        no_validate: bool,

        /// Implement the module's imports from NAME with the adapter at
        /// PATH, e.g. `wasi_snapshot_preview1=adapter.wasm` (repeatable)
        #[arg(long = "adapt", value_name = "NAME=PATH", value_parser = parse_adapter)]
        adapters: Vec<(String, PathBuf)>,
    },

    /// Attach the world as a `component-type` section without linking
    Embed {
        /// Core module (`.wasm`, `.wat`, or a directory containing `main.wasm`)
        module: PathBuf,

        /// Output file (defaults to `<module-stem>.embed.wasm`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the resolved world
    Wit,

    /// Print every function's flattened signatures and post-return behaviour
    Abi,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("  hint: {}", e.hint());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::discover(cli.config.as_deref())?;
    logging::init(&config.logging)?;
    tracing::debug!(?config, "loaded configuration");

    let wit_paths = if cli.wit_paths.is_empty() {
        config.wit.paths
    } else {
        cli.wit_paths
    };
    let mut builder = Componentizer::new()
        .features(config.wit.features)
        .features(cli.features)
        .all_features(cli.all_features || config.wit.all_features);
    for path in &wit_paths {
        builder = builder.wit_path(path);
    }
    if let Some(world) = cli.world.or(config.wit.world) {
        builder = builder.world(world);
    }

    match cli.command {
        Commands::Link {
            module,
            output,
            no_validate,
            adapters,
        } => {
            let output = output
                .or(config.output.path)
                .unwrap_or_else(|| default_output(&module, "component"));
            // Flags replace a configured adapter of the same name.
            let mut all = config.link.adapters;
            all.extend(adapters);
            for (name, path) in &all {
                builder = builder.adapter_path(name, path);
            }
            let component = builder
                .module_path(&module)
                .validate(config.output.validate && !no_validate)
                .componentize()?;
            component.write_to(&output)?;
            tracing::info!(output = %output.display(), bytes = component.len(), "wrote component");
        }
        Commands::Embed { module, output } => {
            let output = output.unwrap_or_else(|| default_output(&module, "embed"));
            let bytes = builder.module_path(&module).embed()?;
            std::fs::write(&output, bytes).map_err(|source| AppError::Output {
                path: output.clone(),
                source,
            })?;
            tracing::info!(output = %output.display(), "wrote module with embedded world");
        }
        Commands::Wit => print!("{}", builder.wit_dump()?),
        Commands::Abi => print!("{}", builder.abi_dump()?),
    }
    Ok(())
}

/// `name=path` as given to `--adapt`.
fn parse_adapter(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got `{arg}`")),
    }
}

/// `<stem>.<suffix>.wasm` beside the module file; a module directory
/// stands for its `main.wasm`.
fn default_output(module: &Path, suffix: &str) -> PathBuf {
    let file = if module.is_dir() {
        module.join(DEFAULT_MODULE_FILE)
    } else {
        module.to_path_buf()
    };
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    file.with_file_name(format!("{stem}.{suffix}.wasm"))
}
