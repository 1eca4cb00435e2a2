//! # Seed Generator Service
//!
//! Runs the external seed generator as a child process per request:
//!
//! ```text
//! <executable> seed --verbose --tostdout --json
//! ```
//!
//! The JSON [`SeedGenConfig`] is written to the process's stdin, stdout is
//! parsed as [`SeedgenCliOutput`] and stderr is treated as diagnostics. A
//! bounded worker pool limits how many generators run at once; callers over
//! capacity wait for a free worker. A generation that outlives its timeout
//! is killed and reaped before the call fails.

use crate::config::{SeedGenSettings, ServerConfig};
use crate::error::ServerError;
use crate::model::{NewSeed, Seed};
use crate::storage::Storage;
use multiverse_event_system::PlayerId;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Generation request, passed to the generator as plain structured data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedGenConfig {
    pub flags: Vec<String>,
    pub presets: Vec<String>,
    pub difficulty: String,
    pub headers: Vec<String>,
    pub custom_headers: Vec<String>,
    pub goals: Vec<String>,
}

/// What the generator prints to stdout on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedgenCliOutput {
    /// One seed file per world
    pub seed_files: Vec<String>,
    #[serde(default)]
    pub spoiler: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedGenerationResult {
    /// Diagnostics the generator printed to stderr
    pub warnings: String,
    pub output: SeedgenCliOutput,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedGenError {
    #[error("I/O error talking to seedgen: {0}")]
    Io(#[from] io::Error),

    #[error("seedgen timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, pid: Option<u32> },

    #[error("seedgen failed (exit code {exit_code:?}): {diagnostics}")]
    Failed { exit_code: Option<i32>, diagnostics: String },

    #[error("seedgen produced unreadable output: {0}")]
    InvalidOutput(String),

    #[error("could not encode seedgen request: {0}")]
    Serialization(String),
}

/// Supervises seed generator processes.
pub struct SeedGeneratorService {
    executable: PathBuf,
    timeout: Duration,
    workers: Semaphore,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for SeedGeneratorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedGeneratorService")
            .field("executable", &self.executable)
            .field("timeout", &self.timeout)
            .field("idle_workers", &self.workers.available_permits())
            .finish()
    }
}

impl SeedGeneratorService {
    pub fn new(executable: impl Into<PathBuf>, settings: &SeedGenSettings, storage: Arc<dyn Storage>) -> Self {
        Self {
            executable: executable.into(),
            timeout: Duration::from_millis(settings.timeout_ms),
            workers: Semaphore::new(settings.worker_pool_size.max(1)),
            storage,
        }
    }

    /// Builds the service from configuration. Fails when no executable is configured.
    pub fn from_config(config: &ServerConfig, storage: Arc<dyn Storage>) -> Result<Self, ServerError> {
        let executable = config.seedgen_executable()?;
        Ok(Self::new(executable, &config.seedgen, storage))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Runs one generation on a pooled worker.
    pub async fn generate(&self, config: &SeedGenConfig) -> Result<SeedGenerationResult, SeedGenError> {
        let request = serde_json::to_vec(config).map_err(|e| SeedGenError::Serialization(e.to_string()))?;

        let _worker = self
            .workers
            .acquire()
            .await
            .map_err(|_| SeedGenError::Io(io::Error::other("seedgen worker pool closed")))?;

        let mut command = Command::new(&self.executable);
        command
            .args(["seed", "--verbose", "--tostdout", "--json"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = self.executable.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(directory);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!("🌱 Started seedgen (pid {:?})", pid);

        let finished = tokio::time::timeout(self.timeout, communicate(&mut child, &request)).await;
        let (status, stdout, stderr) = match finished {
            Ok(result) => result?,
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!("⚠️ Could not kill timed out seedgen (pid {:?}): {}", pid, e);
                }
                if let Err(e) = child.wait().await {
                    warn!("⚠️ Could not reap timed out seedgen (pid {:?}): {}", pid, e);
                }
                warn!("⏰ seedgen (pid {:?}) timed out after {:?}", pid, self.timeout);
                return Err(SeedGenError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                    pid,
                });
            }
        };

        let diagnostics = String::from_utf8_lossy(&stderr).into_owned();
        for line in diagnostics.lines() {
            info!("🌱 seedgen: {}", line);
        }

        if !status.success() {
            return Err(SeedGenError::Failed {
                exit_code: status.code(),
                diagnostics,
            });
        }

        let output =
            serde_json::from_slice::<SeedgenCliOutput>(&stdout).map_err(|e| SeedGenError::InvalidOutput(e.to_string()))?;

        Ok(SeedGenerationResult {
            warnings: diagnostics,
            output,
        })
    }

    /// Generates and stores a seed with one world seed per produced seed file.
    pub async fn generate_seed(&self, config: &SeedGenConfig, creator: Option<PlayerId>) -> Result<Seed, ServerError> {
        let result = self.generate(config).await?;
        let seed = self
            .storage
            .create_seed(NewSeed {
                config: serde_json::to_value(config)?,
                creator,
                spoiler: result.output.spoiler,
                seed_files: result.output.seed_files,
            })
            .await?;

        info!("🌱 Generated seed {} with {} world seed(s)", seed.id, seed.world_seeds.len());
        Ok(seed)
    }
}

/// Feeds the request, drains both output streams and waits for exit.
async fn communicate(child: &mut Child, request: &[u8]) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let write = async move {
        if let Some(mut stdin) = stdin {
            match stdin.write_all(request).await {
                // The generator may exit before reading its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e),
                Ok(()) => {}
            }
        }
        Ok(())
    };

    let (written, stdout, stderr) = tokio::join!(write, read_to_end(stdout), read_to_end(stderr));
    written?;
    let status = child.wait().await?;
    Ok((status, stdout?, stderr?))
}

async fn read_to_end<R: AsyncRead + Unpin>(stream: Option<R>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}
