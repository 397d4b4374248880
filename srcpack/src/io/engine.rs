//! Container engine adapter.
//!
//! [`ContainerEngine`] covers the four operations the build/extract protocol
//! needs. [`CliEngine`] drives a docker-compatible command line.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument};

use crate::core::session::CPU_PERIOD_MICROS;
use crate::io::process::{display_command, run_command_with_timeout, run_inherited};

const BOOKKEEPING_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Image build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild<'a> {
    /// `name:version`.
    pub tag: &'a str,
    pub recipe: &'a str,
    /// CPU-time quota per [`CPU_PERIOD_MICROS`].
    pub cpu_quota: Option<u64>,
}

/// Operations on an external container engine.
pub trait ContainerEngine {
    fn build_image(&self, request: &ImageBuild<'_>) -> Result<()>;
    /// Create (but do not start) a container named `name` from `image`.
    fn create_container(&self, image: &str, name: &str) -> Result<()>;
    fn copy_from_container(&self, name: &str, source: &Path, destination: &Path) -> Result<()>;
    fn remove_container(&self, name: &str) -> Result<()>;
}

/// Engine driven through its command line (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct CliEngine {
    program: String,
}

impl CliEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    fn run_captured(&self, cmd: Command) -> Result<String> {
        let shown = display_command(&cmd);
        let output = run_command_with_timeout(cmd, None, BOOKKEEPING_TIMEOUT, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run {shown}"))?;
        if output.timed_out {
            bail!("{shown} timed out after {BOOKKEEPING_TIMEOUT:?}");
        }
        if !output.status.success() {
            bail!(
                "{shown} failed with status {:?}: {}",
                output.status.code(),
                output.stderr_summary()
            );
        }
        Ok(output.stdout_lossy())
    }
}

/// `build -t <tag> [--cpu-period P --cpu-quota Q] -`
pub fn build_args(request: &ImageBuild<'_>) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-t".to_string(),
        request.tag.to_string(),
    ];
    if let Some(quota) = request.cpu_quota {
        args.push("--cpu-period".to_string());
        args.push(CPU_PERIOD_MICROS.to_string());
        args.push("--cpu-quota".to_string());
        args.push(quota.to_string());
    }
    args.push("-".to_string());
    args
}

impl ContainerEngine for CliEngine {
    #[instrument(skip_all, fields(engine = %self.program, tag = request.tag))]
    fn build_image(&self, request: &ImageBuild<'_>) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(build_args(request));
        info!("building container image");
        let status = run_inherited(cmd, Some(request.recipe.as_bytes()))
            .with_context(|| format!("run {} build", self.program))?;
        if !status.success() {
            return Err(anyhow!(
                "{} build -t {} failed with status {:?}",
                self.program,
                request.tag,
                status.code()
            ));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(engine = %self.program, image, name))]
    fn create_container(&self, image: &str, name: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["create", "--name", name, image]);
        let id = self.run_captured(cmd)?;
        debug!(id = id.trim(), "created container");
        Ok(())
    }

    #[instrument(skip_all, fields(engine = %self.program, name))]
    fn copy_from_container(&self, name: &str, source: &Path, destination: &Path) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("cp")
            .arg(format!("{name}:{}", source.display()))
            .arg(destination);
        self.run_captured(cmd)?;
        Ok(())
    }

    #[instrument(skip_all, fields(engine = %self.program, name))]
    fn remove_container(&self, name: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["rm", "--force", name]);
        self.run_captured(cmd)?;
        Ok(())
    }
}
