use std::{
    collections::{BTreeSet, HashMap},
    env,
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::SystemTime,
};

use sha2::{Digest, Sha256};
use tokio::{fs, process::Command};
use tracing::debug;

use crate::{audit, Cmd, WardenError};

const ARTIFACT_SUFFIX: &str = "bin";
const SOURCE_SUFFIX: &str = "rs";

/// Artifact file names are not valid crate names, so the toolchain gets a
/// fixed one.
const GUEST_CRATE_NAME: &str = "guest";

/// A compiler of potentially unsafe guest programs.
///
/// Guests may only import package roots that have been [`allow`](Self::allow)ed;
/// anything else is rejected before the toolchain ever runs. Audit verdicts
/// and produced executables are cached per source file and reused until the
/// file's modification time passes the cached record.
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), warden::WardenError> {
/// use warden::Compiler;
///
/// let compiler = Compiler::new();
/// compiler.allow("std");
/// let cmd = compiler.run_file("guest.rs").await?;
/// # Ok(()) }
/// ```
pub struct Compiler {
    toolchain: PathBuf,
    temp_dir: PathBuf,
    state: Mutex<CompilerState>,
}

#[derive(Default)]
struct CompilerState {
    allowed: BTreeSet<String>,
    checked: HashMap<PathBuf, SystemTime>,
    compiled: HashMap<PathBuf, SystemTime>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            toolchain: PathBuf::from("rustc"),
            temp_dir: env::temp_dir(),
            state: Mutex::new(CompilerState::default()),
        }
    }

    /// Overrides the build tool (default: `rustc` from `PATH`).
    pub fn with_toolchain(mut self, toolchain: impl Into<PathBuf>) -> Self {
        self.toolchain = toolchain.into();
        self
    }

    /// Overrides where transient sources and artifacts are placed.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Adds a package root to the set guests are permitted to import.
    pub fn allow(&self, package: impl Into<String>) {
        self.state().allowed.insert(package.into());
    }

    /// Verifies that `file` imports only allowed packages.
    ///
    /// A verdict recorded after the file's modification time is reused
    /// without re-parsing. Failure lists every offending import in source
    /// order.
    pub fn check(&self, file: impl AsRef<Path>) -> Result<(), WardenError> {
        let file = file.as_ref();
        let modified = modified_time(file)?;
        if let Some(checked) = self.state().checked.get(file) {
            if *checked > modified {
                return Ok(());
            }
        }

        let source = std::fs::read_to_string(file).map_err(|source| WardenError::ReadSource {
            path: file.to_path_buf(),
            source,
        })?;
        let disallowed = {
            let state = self.state();
            audit::disallowed_imports(file, &source, &state.allowed)?
        };
        if !disallowed.is_empty() {
            return Err(WardenError::DisallowedImports(disallowed.join(", ")));
        }

        self.state()
            .checked
            .insert(file.to_path_buf(), SystemTime::now());
        Ok(())
    }

    /// Compiles `file` to its deterministic artifact path and returns that
    /// path.
    pub async fn compile(&self, file: impl AsRef<Path>) -> Result<PathBuf, WardenError> {
        let file = file.as_ref();
        let artifact = self.scratch_path(&file.to_string_lossy(), ARTIFACT_SUFFIX);
        self.compile_to(file, &artifact).await?;
        Ok(artifact)
    }

    /// Compiles `file` to a caller-chosen `output` path.
    ///
    /// A compile recorded after the file's modification time short-circuits
    /// without re-auditing: an executable is trusted once produced.
    pub async fn compile_to(
        &self,
        file: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<(), WardenError> {
        let file = file.as_ref();
        let output = output.as_ref();
        let modified = modified_time(file)?;
        if let Some(compiled) = self.state().compiled.get(file) {
            if *compiled > modified {
                return Ok(());
            }
        }

        self.check(file)?;

        let result = Command::new(&self.toolchain)
            .arg("--edition=2021")
            .arg("--crate-name")
            .arg(GUEST_CRATE_NAME)
            .arg("-o")
            .arg(output)
            .arg(file)
            .output()
            .await
            .map_err(|source| WardenError::Toolchain {
                toolchain: self.toolchain.clone(),
                source,
            })?;

        // The toolchain is held to silence: diagnostics on either stream fail
        // the build even when the exit status claims success.
        if !result.stderr.is_empty() {
            let _ = fs::remove_file(output).await;
            return Err(WardenError::Build(
                String::from_utf8_lossy(&result.stderr).into_owned(),
            ));
        }
        if !result.stdout.is_empty() {
            let _ = fs::remove_file(output).await;
            return Err(WardenError::Build(
                String::from_utf8_lossy(&result.stdout).into_owned(),
            ));
        }
        if !result.status.success() {
            let _ = fs::remove_file(output).await;
            return Err(WardenError::ToolchainExit {
                status: result.status,
            });
        }

        debug!(source = %file.display(), artifact = %output.display(), "compiled guest program");
        self.state()
            .compiled
            .insert(file.to_path_buf(), SystemTime::now());
        Ok(())
    }

    /// Returns a [`Cmd`] over the compiled form of `file`, without starting
    /// it.
    pub async fn command_file(&self, file: impl AsRef<Path>) -> Result<Cmd, WardenError> {
        let binary = self.compile(file).await?;
        Ok(Cmd::new(binary))
    }

    /// Returns a [`Cmd`] over the compiled form of a literal source string.
    ///
    /// The source is materialized under the temp directory for the duration
    /// of the build and unlinked afterwards; the executable is retained.
    /// Identical submissions under an identical whitelist converge on the
    /// same paths.
    pub async fn command(&self, source: &str) -> Result<Cmd, WardenError> {
        let path = self.scratch_path(source, SOURCE_SUFFIX);
        fs::write(&path, source)
            .await
            .map_err(|err| WardenError::WriteSource {
                path: path.clone(),
                source: err,
            })?;
        let result = self.command_file(&path).await;
        let _ = fs::remove_file(&path).await;
        result
    }

    /// Compiles `file` and starts the resulting child process.
    pub async fn run_file(&self, file: impl AsRef<Path>) -> Result<Cmd, WardenError> {
        let cmd = self.command_file(file).await?;
        cmd.start().await?;
        Ok(cmd)
    }

    /// Compiles a literal source string and starts the resulting child
    /// process.
    pub async fn run(&self, source: &str) -> Result<Cmd, WardenError> {
        let cmd = self.command(source).await?;
        cmd.start().await?;
        Ok(cmd)
    }

    /// `<temp_dir>/<digest>.warden.<suffix>`, where the digest covers the
    /// whitelist and the source identifier. Repeated submissions of the same
    /// input under the same policy hit the same file.
    fn scratch_path(&self, identifier: &str, suffix: &str) -> PathBuf {
        let digest = {
            let state = self.state();
            let mut hasher = Sha256::new();
            for package in &state.allowed {
                hasher.update(package.as_bytes());
            }
            hasher.update(identifier.as_bytes());
            hasher.finalize()
        };
        let mut name = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        self.temp_dir.join(format!("{name}.warden.{suffix}"))
    }

    fn state(&self) -> MutexGuard<'_, CompilerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn modified_time(path: &Path) -> Result<SystemTime, WardenError> {
    let metadata = std::fs::metadata(path).map_err(|source| WardenError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    metadata.modified().map_err(|source| WardenError::Stat {
        path: path.to_path_buf(),
        source,
    })
}
