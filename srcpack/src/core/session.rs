//! Per-invocation build parameters.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::core::program::ProgramDescription;
use crate::core::version::{Release, Version};

/// CPU period handed to the container engine alongside a quota.
pub const CPU_PERIOD_MICROS: u64 = 100_000;

/// Upper bound on explicit parallelism.
pub const MAX_JOBS: usize = 4096;

/// Caller-selected build options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Explicit parallelism; `None` derives it from the CPU count.
    pub jobs: Option<usize>,
    pub base_image: String,
    pub install_prefix: PathBuf,
    pub package_name: Option<String>,
    pub package_version: Option<String>,
}

/// State for one build invocation.
///
/// The release is fixed at construction; the only mutable state is the
/// image-built flag used to memoize the container build.
#[derive(Debug, Clone)]
pub struct BuildSession {
    program: String,
    release: Release,
    jobs: usize,
    jobs_requested: bool,
    base_image: String,
    install_prefix: PathBuf,
    package_name: String,
    package_version: String,
    image_built: bool,
}

impl BuildSession {
    pub fn new(
        program: &ProgramDescription,
        release: Release,
        options: SessionOptions,
        available_cpus: usize,
    ) -> Result<Self> {
        match options.jobs {
            Some(0) => bail!("job count must be at least 1"),
            Some(jobs) if jobs > MAX_JOBS => {
                bail!("job count must be at most {MAX_JOBS}, got {jobs}")
            }
            _ => {}
        }
        if options.base_image.trim().is_empty() {
            bail!("base image must not be empty");
        }
        if !options.install_prefix.is_absolute() {
            bail!(
                "install prefix must be absolute, got {}",
                options.install_prefix.display()
            );
        }
        let package_name = non_empty(options.package_name).unwrap_or_else(|| program.name.clone());
        let package_version =
            non_empty(options.package_version).unwrap_or_else(|| release.version.to_string());

        Ok(Self {
            program: program.name.clone(),
            jobs: options.jobs.unwrap_or_else(|| default_jobs(available_cpus)),
            jobs_requested: options.jobs.is_some(),
            release,
            base_image: options.base_image.trim().to_string(),
            install_prefix: options.install_prefix,
            package_name,
            package_version,
            image_built: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn version(&self) -> &Version {
        &self.release.version
    }

    /// The upstream tag the version resolved to.
    pub fn tag(&self) -> &str {
        &self.release.tag
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// CPU-time quota for the container build, only when jobs were requested.
    pub fn cpu_quota(&self) -> Option<u64> {
        self.jobs_requested
            .then(|| (self.jobs as u64).saturating_mul(CPU_PERIOD_MICROS))
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn install_prefix(&self) -> &Path {
        &self.install_prefix
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn package_version(&self) -> &str {
        &self.package_version
    }

    /// Deterministic image reference, `name:version`.
    pub fn image_tag(&self) -> String {
        format!("{}:{}", self.program, self.release.version)
    }

    pub fn image_built(&self) -> bool {
        self.image_built
    }

    pub fn mark_image_built(&mut self) {
        self.image_built = true;
    }
}

/// Three quarters of the available CPUs, at least one.
pub fn default_jobs(available_cpus: usize) -> usize {
    (available_cpus * 3 / 4).max(1)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
