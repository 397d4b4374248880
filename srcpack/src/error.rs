//! Typed failures that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! types exist so the CLI (and tests) can `downcast_ref` the cases that carry
//! a distinct meaning, such as usage mistakes versus build failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::version::Version;

/// Failures raised while executing or rendering a [`Step`](crate::core::step::Step).
#[derive(Debug, Error)]
pub enum StepError {
    /// A container-only directive was executed or rendered as a script line.
    #[error("container-only directive `{directive}` can only be rendered into a container recipe")]
    ContainerOnly { directive: String },

    /// An environment overlay key is not a valid shell identifier.
    #[error("invalid environment variable name {key:?}")]
    InvalidEnvKey { key: String },

    /// A step tried to run an empty argument vector.
    #[error("process step has an empty argument vector")]
    EmptyCommand,

    /// An external process exited unsuccessfully.
    #[error("`{command}` failed with exit code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    /// A wildcard move found nothing to move.
    #[error("no files match {pattern}")]
    NoMatches { pattern: String },
}

/// Failures raised while turning upstream tags into release versions.
#[derive(Debug, Error)]
pub enum VersionError {
    /// No tag in the remote repository corresponds to a release.
    #[error("no release tags found")]
    NoReleases,

    /// The requested version does not correspond to any tag.
    #[error("no tag found for version {requested} (known versions: {})", format_known(.known))]
    NotFound {
        requested: Version,
        known: Vec<Version>,
    },

    /// A string could not be parsed as a dotted numeric version.
    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },

    /// The tag grammar matched but produced neither `version` nor a full major/minor/patch triple.
    #[error("tag {tag:?} matched the tag pattern but yielded no version (needs `version` or `major`/`minor`/`patch` groups)")]
    IncompleteGrammar { tag: String },

    /// The tag grammar itself is unusable.
    #[error("invalid tag pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Failures raised by the program registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown program {name:?} (known programs: {})", .known.join(", "))]
    UnknownProgram { name: String, known: Vec<String> },

    #[error("failed to load program definitions:\n- {}", format_failures(.failures))]
    Load { failures: Vec<(PathBuf, String)> },

    #[error("duplicate program name {name:?} in {first} and {second}")]
    Duplicate {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

fn format_known(known: &[Version]) -> String {
    if known.is_empty() {
        return "none".to_string();
    }
    known
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_failures(failures: &[(PathBuf, String)]) -> String {
    failures
        .iter()
        .map(|(path, reason)| format!("{}: {reason}", path.display()))
        .collect::<Vec<_>>()
        .join("\n- ")
}
