//! Build-tool surface (section 6.4): schema validation, deterministic id
//! assignment against a lockfile, and Rust stub generation, wired together
//! behind a single [`generate`] entry point.
//!
//! Exposed both as a library function (this module) and as the `mvpe`
//! binary (`src/main.rs`), mirroring how `spec-subject` wraps a library
//! session behind a thin `clap` front-end.

use std::fs;
use std::path::{Path, PathBuf};

use mvpe_ids::{IdAllocator, IdError, Mode};
use mvpe_schema::{Schema, SchemaError};

/// Arguments to [`generate`] (section 6.4's `generate(schemaPath, outputDir,
/// basePackage, mode, lockfilePath)`).
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub schema_path: PathBuf,
    pub output_dir: PathBuf,
    pub base_package: String,
    pub mode: Mode,
    /// Defaults to `<schemaPath>/../.mvpe.ids.lock` when `None`.
    pub lockfile_path: Option<PathBuf>,
}

impl GenerateArgs {
    fn resolved_lockfile_path(&self) -> PathBuf {
        self.lockfile_path.clone().unwrap_or_else(|| {
            self.schema_path
                .parent()
                .map(|dir| dir.join(".mvpe.ids.lock"))
                .unwrap_or_else(|| PathBuf::from(".mvpe.ids.lock"))
        })
    }
}

/// Errors surfaced by the build tool, each carrying the exit code from
/// section 6.4's table.
#[derive(Debug)]
pub enum CliError {
    /// Schema syntax/semantics rejected, or an explicit id was malformed in
    /// a way unrelated to lockfile state (exit code 1).
    Validation(String),
    /// Lockfile drift or a CHECK-mode symbol with no lockfile entry (exit
    /// code 2).
    Drift(String),
    /// Reading the schema, writing generated output, or touching the
    /// lockfile failed at the filesystem level (exit code 3).
    Io(String),
    /// The id allocator could not find a free slot after exhausting its
    /// probe budget (exit code 4).
    ProbeExhaustion(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Validation(msg) => write!(f, "validation error: {msg}"),
            CliError::Drift(msg) => write!(f, "lockfile drift: {msg}"),
            CliError::Io(msg) => write!(f, "I/O failure: {msg}"),
            CliError::ProbeExhaustion(msg) => write!(f, "id probing exhausted: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// The process exit code this error maps to (section 6.4).
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation(_) => 1,
            CliError::Drift(_) => 2,
            CliError::Io(_) => 3,
            CliError::ProbeExhaustion(_) => 4,
        }
    }
}

impl From<SchemaError> for CliError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::Id(msg) => classify_id_error_message(&msg),
            other => CliError::Validation(other.to_string()),
        }
    }
}

/// `IdError` only reaches us pre-stringified through [`SchemaError::Id`];
/// classify by the stable substrings each [`IdError`] variant's `Display`
/// impl produces, rather than re-deriving the distinction from scratch.
fn classify_id_error_message(msg: &str) -> CliError {
    if msg.contains("is locked to id") || msg.contains("has no lockfile entry") {
        CliError::Drift(msg.to_string())
    } else if msg.contains("exhausted probe attempts") {
        CliError::ProbeExhaustion(msg.to_string())
    } else {
        CliError::Validation(msg.to_string())
    }
}

impl From<IdError> for CliError {
    fn from(e: IdError) -> Self {
        match e {
            IdError::Io(msg) => CliError::Io(msg),
            IdError::LockDrift { .. } | IdError::MissingInLockCheckMode { .. } => {
                CliError::Drift(e.to_string())
            }
            IdError::ProbeExhausted { .. } => CliError::ProbeExhaustion(e.to_string()),
            other => CliError::Validation(other.to_string()),
        }
    }
}

/// Run the full build-tool pipeline: parse and validate the schema at
/// `args.schema_path`, assign ids against the lockfile per `args.mode`,
/// persist the lockfile if in WRITE mode, and write generated Rust source
/// to `args.output_dir`.
pub fn generate(args: GenerateArgs) -> Result<(), CliError> {
    let schema_text = fs::read_to_string(&args.schema_path)
        .map_err(|e| CliError::Io(format!("reading `{}`: {e}", args.schema_path.display())))?;

    let mut schema = Schema::from_yaml(&schema_text)?;
    tracing::info!(service = %schema.service, mode = ?args.mode, "parsed schema");

    let lockfile_path = args.resolved_lockfile_path();
    let mut allocator = match args.mode {
        Mode::Off => IdAllocator::in_memory(Mode::Off),
        _ => IdAllocator::load(args.mode, lockfile_path.clone())
            .map_err(|e| CliError::Io(format!("loading `{}`: {e}", lockfile_path.display())))?,
    };

    schema.assign_ids(&mut allocator)?;

    if allocator.is_dirty() {
        allocator.finalize()?;
        tracing::info!(path = %lockfile_path.display(), "persisted updated lockfile");
    }

    let generated = mvpe_codegen::generate_rust(&schema);

    fs::create_dir_all(&args.output_dir)
        .map_err(|e| CliError::Io(format!("creating `{}`: {e}", args.output_dir.display())))?;
    let out_file = output_file_path(&args.output_dir, &args.base_package, &schema.service);
    fs::write(&out_file, generated)
        .map_err(|e| CliError::Io(format!("writing `{}`: {e}", out_file.display())))?;

    tracing::info!(path = %out_file.display(), "wrote generated stubs");
    Ok(())
}

fn output_file_path(output_dir: &Path, base_package: &str, service: &str) -> PathBuf {
    let module = format!("{}_{}.rs", base_package.replace(['.', '/'], "_"), service);
    output_dir.join(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT_SCHEMA: &str = r#"
service: AccountService
methods:
  - name: GetBalance
    request: GetBalanceRequest
    response: GetBalanceResponse
messages:
  - name: GetBalanceRequest
    fields:
      - name: accountId
        type: string
  - name: GetBalanceResponse
    fields:
      - name: balance
        type: int64
"#;

    fn write_schema(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("account.yaml");
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn off_mode_generates_without_touching_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = write_schema(dir.path(), ACCOUNT_SCHEMA);
        let output_dir = dir.path().join("out");

        generate(GenerateArgs {
            schema_path,
            output_dir: output_dir.clone(),
            base_package: "demo".to_string(),
            mode: Mode::Off,
            lockfile_path: None,
        })
        .unwrap();

        assert!(!dir.path().join(".mvpe.ids.lock").exists());
        assert!(output_dir.join("demo_AccountService.rs").exists());
    }

    #[test]
    fn write_mode_persists_lockfile_then_check_mode_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = write_schema(dir.path(), ACCOUNT_SCHEMA);
        let lockfile_path = dir.path().join(".mvpe.ids.lock");
        let output_dir = dir.path().join("out");

        generate(GenerateArgs {
            schema_path: schema_path.clone(),
            output_dir: output_dir.clone(),
            base_package: "demo".to_string(),
            mode: Mode::Write,
            lockfile_path: Some(lockfile_path.clone()),
        })
        .unwrap();
        assert!(lockfile_path.exists());

        generate(GenerateArgs {
            schema_path,
            output_dir,
            base_package: "demo".to_string(),
            mode: Mode::Check,
            lockfile_path: Some(lockfile_path),
        })
        .unwrap();
    }

    #[test]
    fn check_mode_without_lockfile_entry_reports_drift_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = write_schema(dir.path(), ACCOUNT_SCHEMA);
        let lockfile_path = dir.path().join(".mvpe.ids.lock");
        fs::write(&lockfile_path, "version = 1\n").unwrap();

        let err = generate(GenerateArgs {
            schema_path,
            output_dir: dir.path().join("out"),
            base_package: "demo".to_string(),
            mode: Mode::Check,
            lockfile_path: Some(lockfile_path),
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn invalid_schema_reports_validation_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = write_schema(dir.path(), "service: \nmethods: []\nmessages: []\n");

        let err = generate(GenerateArgs {
            schema_path,
            output_dir: dir.path().join("out"),
            base_package: "demo".to_string(),
            mode: Mode::Off,
            lockfile_path: None,
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn missing_schema_file_reports_io_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate(GenerateArgs {
            schema_path: dir.path().join("does-not-exist.yaml"),
            output_dir: dir.path().join("out"),
            base_package: "demo".to_string(),
            mode: Mode::Off,
            lockfile_path: None,
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
