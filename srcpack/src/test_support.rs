//! Test doubles for the process, tag and container-engine seams.

use std::cell::RefCell;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::io::engine::{ContainerEngine, ImageBuild};
use crate::io::runner::{Invocation, ProcessRunner, SystemRunner};
use crate::io::tags::TagSource;

fn exit_status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// Records every invocation; succeeds unless told otherwise.
///
/// Programs registered with [`delegate`](Self::delegate) really run.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: RefCell<Vec<Invocation>>,
    failing: Vec<String>,
    delegated: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with status 1 whenever `program` is invoked.
    pub fn fail_on(mut self, program: &str) -> Self {
        self.failing.push(program.to_string());
        self
    }

    pub fn delegate(mut self, program: &str) -> Self {
        self.delegated.push(program.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Each invocation's argv joined with spaces.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|invocation| invocation.argv.join(" "))
            .collect()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<ExitStatus> {
        self.invocations.borrow_mut().push(invocation.clone());
        let program = invocation.program().unwrap_or_default();
        if self.delegated.iter().any(|name| name == program) {
            return SystemRunner.run(invocation);
        }
        if self.failing.iter().any(|name| name == program) {
            return Ok(exit_status(1));
        }
        Ok(exit_status(0))
    }
}

/// In-memory tag list.
#[derive(Debug, Clone, Default)]
pub struct StaticTags {
    tags: Vec<String>,
}

impl StaticTags {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
        }
    }
}

impl TagSource for StaticTags {
    fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
        Ok(self.tags.clone())
    }
}

/// One recorded container-engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Build {
        tag: String,
        recipe: String,
        cpu_quota: Option<u64>,
    },
    Create {
        image: String,
        name: String,
    },
    Copy {
        name: String,
        source: PathBuf,
        destination: PathBuf,
    },
    Remove {
        name: String,
    },
}

impl EngineCall {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCall::Build { .. } => "build",
            EngineCall::Create { .. } => "create",
            EngineCall::Copy { .. } => "copy",
            EngineCall::Remove { .. } => "remove",
        }
    }
}

/// Container engine that records calls and runs nothing.
#[derive(Debug, Default)]
pub struct FakeEngine {
    calls: RefCell<Vec<EngineCall>>,
    fail_copy: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.borrow().clone()
    }
}

impl ContainerEngine for FakeEngine {
    fn build_image(&self, request: &ImageBuild<'_>) -> Result<()> {
        self.calls.borrow_mut().push(EngineCall::Build {
            tag: request.tag.to_string(),
            recipe: request.recipe.to_string(),
            cpu_quota: request.cpu_quota,
        });
        Ok(())
    }

    fn create_container(&self, image: &str, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(EngineCall::Create {
            image: image.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn copy_from_container(&self, name: &str, source: &Path, destination: &Path) -> Result<()> {
        self.calls.borrow_mut().push(EngineCall::Copy {
            name: name.to_string(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        if self.fail_copy {
            bail!("no such file {} in container {name}", source.display());
        }
        Ok(())
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(EngineCall::Remove {
            name: name.to_string(),
        });
        Ok(())
    }
}

/// Scratch git repository with one commit per release tag.
///
/// Each tagged commit carries a `VERSION` file holding the tag name.
pub struct TagRepo {
    dir: TempDir,
}

impl TagRepo {
    pub fn new(tags: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir().context("create repo tempdir")?;
        git(dir.path(), &["init", "--quiet"])?;
        for tag in tags {
            fs::write(dir.path().join("VERSION"), format!("{tag}\n"))
                .context("write VERSION")?;
            git(dir.path(), &["add", "VERSION"])?;
            git(
                dir.path(),
                &[
                    "-c",
                    "user.name=srcpack",
                    "-c",
                    "user.email=srcpack@example.invalid",
                    "commit",
                    "--quiet",
                    "-m",
                    tag,
                ],
            )?;
            git(dir.path(), &["tag", tag])?;
        }
        Ok(Self { dir })
    }

    /// `file://` URL, so shallow clones behave like remote ones.
    pub fn url(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
