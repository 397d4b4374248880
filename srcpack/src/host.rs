//! Host mode: run the pipeline directly on this machine.

use std::path::{self, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::pipeline::{Pipeline, Target};
use crate::core::program::ProgramDescription;
use crate::core::session::BuildSession;
use crate::io::execute::ExecContext;

/// Run every build stage under `root`, optionally installing afterwards.
///
/// Returns the build directory.
#[instrument(skip_all, fields(program = %program.name, version = %session.version(), install))]
pub fn run_host_build(
    program: &ProgramDescription,
    session: &BuildSession,
    root: &Path,
    install: bool,
    ctx: &ExecContext<'_>,
) -> Result<PathBuf> {
    // Stages change directory, so every path they use must be absolute.
    let root = path::absolute(root).with_context(|| format!("resolve {}", root.display()))?;
    let pipeline = Pipeline::new(program, session, Target::Host { root });

    let mut stages = pipeline.stages();
    if install {
        stages.push(pipeline.install());
    }
    for stage in &stages {
        stage.execute(ctx)?;
    }
    info!(build_dir = %pipeline.build_dir().display(), "host build finished");
    Ok(pipeline.build_dir().to_path_buf())
}
