//! `mvpe`: the build-tool binary wrapping [`mvpe_cli::generate`] in a
//! `clap` front-end, mirroring the tracing/argument setup of
//! `spec-subject`'s `main.rs`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mvpe_cli::{generate, GenerateArgs};
use mvpe_ids::Mode;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum ModeArg {
    Off,
    Check,
    Write,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Off => Mode::Off,
            ModeArg::Check => Mode::Check,
            ModeArg::Write => Mode::Write,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mvpe")]
#[command(about = "Validate a schema, assign stable ids, and generate Rust stubs")]
struct Args {
    /// Path to the service's YAML schema.
    #[arg(long)]
    schema: PathBuf,

    /// Directory generated Rust source is written into.
    #[arg(long)]
    output_dir: PathBuf,

    /// Base package/module name prefixed onto the generated file name.
    #[arg(long)]
    base_package: String,

    /// OFF: no lockfile. CHECK: fail on drift (CI). WRITE: allocate + persist (local dev).
    #[arg(long, value_enum, default_value_t = ModeArg::Check)]
    mode: ModeArg,

    /// Defaults to `<schema>/../.mvpe.ids.lock`.
    #[arg(long)]
    lockfile: Option<PathBuf>,
}

impl std::fmt::Display for ModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModeArg::Off => "off",
            ModeArg::Check => "check",
            ModeArg::Write => "write",
        };
        write!(f, "{s}")
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = Args::parse();

    let result = generate(GenerateArgs {
        schema_path: args.schema,
        output_dir: args.output_dir,
        base_package: args.base_package,
        mode: args.mode.into(),
        lockfile_path: args.lockfile,
    });

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            tracing::error!(error = %e, "generation failed");
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
