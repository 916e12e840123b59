//! External retrieval fallback.
//!
//! When no open-access copy can be downloaded, an external command may be
//! asked to retrieve the paper. The command is resolved once per run, in
//! this order:
//!
//! 1. an explicit override (`--fallback-cmd` or `fallback.command`)
//! 2. `fallback.command_name` discovered on `PATH`
//! 3. `fallback.remote_command`, when its launcher is on `PATH`
//!
//! Each attempt runs the command in a fresh temporary directory. The
//! command succeeds when it exits with status 0 and either prints the path
//! of an existing file as its last stdout line or leaves a PDF in the
//! directory. The file must start with `%PDF`; it is then copied into the
//! output directory under the caller's file name.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::config::FallbackConfig;
use crate::utils::split_command_line;

/// Non-empty log lines kept in execution errors
const LOG_TAIL_LINES: usize = 6;

/// When the fallback is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Never run the fallback
    Off,
    /// Run the fallback after the open-access path fails
    #[default]
    Auto,
    /// Skip the open-access lookup and use only the fallback
    #[serde(alias = "on")]
    Force,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackMode::Off => "off",
            FallbackMode::Auto => "auto",
            FallbackMode::Force => "force",
        }
    }

    /// Whether a fallback command needs to be resolved
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FallbackMode::Off)
    }
}

impl std::fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallback errors
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    /// No usable command could be resolved
    #[error("fallback unavailable: {0}")]
    Unavailable(String),

    /// The command failed, timed out, or produced no usable PDF
    #[error("fallback failed: {0}")]
    Execution(String),

    #[error("fallback IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file retrieved by the fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSuccess {
    /// Final location in the output directory
    pub path: PathBuf,

    /// Source URL, when the command reported one
    pub resolved_url: Option<String>,
}

/// An external retrieval strategy
#[async_trait]
pub trait FallbackStrategy: Send + Sync + std::fmt::Debug {
    /// Human-readable command line, for reports
    fn describe(&self) -> String;

    /// Retrieve `identifier` into `outdir` as `file_name`
    async fn attempt(
        &self,
        identifier: &str,
        outdir: &Path,
        file_name: &str,
    ) -> Result<FallbackSuccess, FallbackError>;
}

/// Where a fallback command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    Override,
    PathDiscovered,
    RemoteInstallable,
}

/// Locates executables
pub trait PathProbe {
    fn find(&self, program: &str) -> Option<PathBuf>;
}

/// [`PathProbe`] over the process `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvPath;

impl PathProbe for EnvPath {
    fn find(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Resolve the fallback command: override, then `PATH`, then remote-installable
pub fn resolve_fallback(
    override_cmd: Option<&str>,
    probe: &dyn PathProbe,
    config: &FallbackConfig,
) -> Result<CommandFallback, FallbackError> {
    if let Some(line) = override_cmd.or(config.command.as_deref()) {
        let argv = split_command_line(line);
        let program = argv
            .first()
            .ok_or_else(|| FallbackError::Unavailable("empty fallback command".to_string()))?;
        if probe.find(program).is_none() {
            return Err(FallbackError::Unavailable(format!(
                "fallback command not found: {}",
                program
            )));
        }
        return CommandFallback::new(argv, CommandOrigin::Override, config);
    }

    if let Some(name) = config.command_name.as_deref().filter(|n| !n.is_empty()) {
        if probe.find(name).is_some() {
            return CommandFallback::new(vec![name.to_string()], CommandOrigin::PathDiscovered, config);
        }
        tracing::debug!("fallback command {} not on PATH", name);
    }

    if let Some(line) = config.remote_command.as_deref() {
        let argv = split_command_line(line);
        if let Some(launcher) = argv.first() {
            if probe.find(launcher).is_some() {
                return CommandFallback::new(argv, CommandOrigin::RemoteInstallable, config);
            }
            tracing::debug!("fallback launcher {} not on PATH", launcher);
        }
    }

    let detail = match (&config.command_name, &config.remote_command) {
        (None, None) => "no fallback command configured".to_string(),
        (Some(name), None) => format!("{} not found on PATH", name),
        (None, Some(remote)) => format!("launcher for '{}' not found on PATH", remote),
        (Some(name), Some(remote)) => format!(
            "{} not found on PATH and launcher for '{}' unavailable",
            name, remote
        ),
    };
    Err(FallbackError::Unavailable(detail))
}

/// Fallback that runs an external command
#[derive(Debug, Clone)]
pub struct CommandFallback {
    argv: Vec<String>,
    args: Vec<String>,
    origin: CommandOrigin,
    timeout: Duration,
    email: Option<String>,
}

impl CommandFallback {
    /// Build from a command line and the configured argument template
    pub fn new(
        argv: Vec<String>,
        origin: CommandOrigin,
        config: &FallbackConfig,
    ) -> Result<Self, FallbackError> {
        if argv.is_empty() {
            return Err(FallbackError::Unavailable("empty fallback command".to_string()));
        }
        Ok(Self {
            argv,
            args: config.args.clone(),
            origin,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            email: config.email.clone().filter(|e| !e.is_empty()),
        })
    }

    /// Override the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Email substituted for `{email}` when none is configured
    pub fn with_default_email(mut self, email: Option<String>) -> Self {
        if self.email.is_none() {
            self.email = email.filter(|e| !e.is_empty());
        }
        self
    }

    pub fn origin(&self) -> CommandOrigin {
        self.origin
    }

    fn render_args(&self, identifier: &str, workdir: &Path) -> Vec<String> {
        let outdir = workdir.to_string_lossy();
        let email = self.email.as_deref().unwrap_or("");
        self.args
            .iter()
            .filter(|arg| self.email.is_some() || !arg.contains("{email}"))
            .map(|arg| {
                arg.replace("{id}", identifier)
                    .replace("{outdir}", &outdir)
                    .replace("{email}", email)
            })
            .collect()
    }

    /// Run the command, returning stdout and the combined log
    async fn run(
        &self,
        identifier: &str,
        workdir: &Path,
    ) -> Result<(String, String), FallbackError> {
        let mut command = tokio::process::Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .args(self.render_args(identifier, workdir))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("running fallback for {}: {}", identifier, self.describe());

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(FallbackError::Execution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
            Ok(Err(e)) => {
                return Err(FallbackError::Execution(format!(
                    "failed to start {}: {}",
                    self.argv[0], e
                )))
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let logs = format!("{}\n{}", stdout, stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(FallbackError::Execution(format!(
                "exit {}: {}",
                code,
                non_empty_or(log_tail(&logs, LOG_TAIL_LINES), "no detail")
            )));
        }

        let logs = format!("{}\n{}", stdout, stderr);
        Ok((stdout, logs))
    }
}

#[async_trait]
impl FallbackStrategy for CommandFallback {
    fn describe(&self) -> String {
        self.argv.join(" ")
    }

    async fn attempt(
        &self,
        identifier: &str,
        outdir: &Path,
        file_name: &str,
    ) -> Result<FallbackSuccess, FallbackError> {
        let workdir = tempfile::Builder::new()
            .prefix("papergrab-fallback-")
            .tempdir()?;

        let (stdout, logs) = self.run(identifier, workdir.path()).await?;

        let produced = match reported_path(&stdout, workdir.path()) {
            Some(path) => path,
            None => largest_pdf(workdir.path())?.ok_or_else(|| {
                FallbackError::Execution(format!(
                    "no PDF produced: {}",
                    non_empty_or(log_tail(&logs, LOG_TAIL_LINES), "no detail")
                ))
            })?,
        };

        if !has_pdf_header(&produced).await {
            return Err(FallbackError::Execution(format!(
                "{} is not a PDF",
                produced.display()
            )));
        }

        tokio::fs::create_dir_all(outdir).await?;
        let target = outdir.join(file_name);
        if target.exists() {
            return Err(FallbackError::Execution(format!(
                "{} already exists",
                target.display()
            )));
        }

        install(&produced, &target).await?;

        tracing::info!("fallback retrieved {} -> {}", identifier, target.display());

        Ok(FallbackSuccess {
            path: target,
            resolved_url: reported_url(&logs),
        })
    }
}

/// Copy `produced` to `target` through a `.part` file
async fn install(produced: &Path, target: &Path) -> std::io::Result<()> {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    let partial = PathBuf::from(name);
    // leftover from an interrupted run
    let _ = tokio::fs::remove_file(&partial).await;

    let result = match tokio::fs::copy(produced, &partial).await {
        Ok(_) => tokio::fs::rename(&partial, target).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

/// Last stdout line that names an existing file
fn reported_path(stdout: &str, workdir: &Path) -> Option<PathBuf> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let path = PathBuf::from(line);
            if path.is_absolute() {
                path
            } else {
                workdir.join(path)
            }
        })
        .find(|path| path.is_file())
}

fn reported_url(logs: &str) -> Option<String> {
    static URL_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    URL_LINE
        .get_or_init(|| Regex::new(r"Download URL:\s*(\S+)").ok())
        .as_ref()?
        .captures(logs)
        .map(|caps| caps[1].to_string())
}

/// Largest `*.pdf` below `root`
fn largest_pdf(root: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
                && best.as_ref().map_or(true, |(size, _)| meta.len() > *size)
            {
                best = Some((meta.len(), path));
            }
        }
    }

    Ok(best.map(|(_, path)| path))
}

async fn has_pdf_header(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    match tokio::fs::File::open(path).await {
        Ok(mut file) => file.read_exact(&mut magic).await.is_ok() && &magic == b"%PDF",
        Err(_) => false,
    }
}

/// Last `max_lines` non-empty lines of `text`, joined by ` | `
pub fn log_tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].join(" | ")
}

fn non_empty_or(text: String, default: &str) -> String {
    if text.is_empty() {
        default.to_string()
    } else {
        text
    }
}
