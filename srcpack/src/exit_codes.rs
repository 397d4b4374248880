//! Stable exit codes for srcpack commands.

use crate::error::{RegistryError, StepError};

/// Command succeeded.
pub const OK: i32 = 0;
/// Build, resolution or engine failure.
pub const FAILED: i32 = 1;
/// Invalid invocation: unknown program or container-only misuse.
///
/// clap reports malformed arguments, including `--version`, with the same code.
pub const USAGE: i32 = 2;

/// Map an error chain to its exit code.
pub fn for_error(err: &anyhow::Error) -> i32 {
    let usage = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RegistryError>(),
            Some(RegistryError::UnknownProgram { .. })
        ) || matches!(
            cause.downcast_ref::<StepError>(),
            Some(StepError::ContainerOnly { .. })
        )
    });
    if usage { USAGE } else { FAILED }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;
    use crate::core::version::{self, TagGrammar};

    #[test]
    fn unknown_program_is_a_usage_error() {
        let err = anyhow::Error::from(RegistryError::UnknownProgram {
            name: "gdb".to_string(),
            known: vec!["emacs".to_string()],
        });
        assert_eq!(for_error(&err), USAGE);
    }

    #[test]
    fn wrapped_step_failures_are_build_failures() {
        let err = Err::<(), _>(StepError::CommandFailed {
            command: "make -j4".to_string(),
            code: Some(2),
        })
        .context("compile foo")
        .expect_err("error");
        assert_eq!(for_error(&err), FAILED);
    }

    #[test]
    fn container_only_misuse_is_found_through_context() {
        let err = Err::<(), _>(StepError::ContainerOnly {
            directive: "FROM scratch".to_string(),
        })
        .context("execute stage")
        .expect_err("error");
        assert_eq!(for_error(&err), USAGE);
    }

    #[test]
    fn unparseable_remote_version_is_a_build_failure() {
        let grammar = TagGrammar::new(r"^v(?P<version>.+)$").expect("grammar");
        let err = version::releases(&grammar, &["v1.x".to_string()])
            .context("parse tags of foo")
            .expect_err("bad tag");
        assert_eq!(for_error(&err), FAILED);
    }
}
