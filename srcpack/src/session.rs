//! Session construction: list remote tags, fix the version, build the session.

use std::num::NonZeroUsize;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::program::ProgramDescription;
use crate::core::session::{BuildSession, SessionOptions};
use crate::core::version::{self, Release, Version};
use crate::io::tags::TagSource;

/// Resolve `requested` (or the newest release) and open a build session.
#[instrument(skip_all, fields(program = %program.name, requested = ?requested.map(ToString::to_string)))]
pub fn open_session(
    program: &ProgramDescription,
    tags: &dyn TagSource,
    requested: Option<&Version>,
    options: SessionOptions,
) -> Result<BuildSession> {
    let remote = tags.list_tags(&program.source_repository)?;
    let release = version::resolve(&program.grammar, &remote, requested)
        .with_context(|| format!("resolve version of {}", program.name))?;
    info!(version = %release.version, tag = %release.tag, "resolved version");
    BuildSession::new(program, release, options, available_cpus())
}

/// Every release of `program`, oldest first.
pub fn list_releases(program: &ProgramDescription, tags: &dyn TagSource) -> Result<Vec<Release>> {
    let remote = tags.list_tags(&program.source_repository)?;
    let mut releases = version::releases(&program.grammar, &remote)
        .with_context(|| format!("parse tags of {}", program.name))?;
    releases.sort_by(|left, right| left.version.cmp(&right.version));
    Ok(releases)
}

fn available_cpus() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::program::ProgramFile;
    use crate::error::VersionError;
    use crate::test_support::StaticTags;

    fn program() -> ProgramDescription {
        let file: ProgramFile = toml::from_str(
            r#"
            [program]
            name = "valgrind"
            build_system = "autoconf"
            source_repository = "https://sourceware.org/git/valgrind.git"
            tag_pattern = '^(svn/)?VALGRIND_(?P<major>\d+)_(?P<minor>\d+)_(?P<patch>\d+)$'
            "#,
        )
        .expect("parse");
        file.normalize().expect("normalize")
    }

    fn options() -> SessionOptions {
        SessionOptions {
            jobs: Some(2),
            base_image: "ubuntu:22.04".to_string(),
            install_prefix: PathBuf::from("/usr/local"),
            package_name: None,
            package_version: None,
        }
    }

    fn tags() -> StaticTags {
        StaticTags::new(&[
            "svn/VALGRIND_3_1_0",
            "VALGRIND_3_21_0",
            "VALGRIND_3_22_0",
            "VALGRIND_3_3_0",
            "valgrind-3.22.0-rc1",
        ])
    }

    #[test]
    fn unspecified_version_opens_latest_release() {
        let session = open_session(&program(), &tags(), None, options()).expect("session");
        assert_eq!(session.version().to_string(), "3.22.0");
        assert_eq!(session.tag(), "VALGRIND_3_22_0");
        assert_eq!(session.image_tag(), "valgrind:3.22.0");
    }

    #[test]
    fn requested_version_maps_to_its_tag() {
        let requested: Version = "3.1.0".parse().expect("version");
        let session =
            open_session(&program(), &tags(), Some(&requested), options()).expect("session");
        assert_eq!(session.tag(), "svn/VALGRIND_3_1_0");
    }

    #[test]
    fn unknown_version_is_typed() {
        let requested: Version = "9.9.9".parse().expect("version");
        let err = open_session(&program(), &tags(), Some(&requested), options())
            .expect_err("missing version");
        assert!(matches!(
            err.downcast_ref::<VersionError>(),
            Some(VersionError::NotFound { .. })
        ));
    }

    #[test]
    fn releases_are_listed_oldest_first() {
        let versions: Vec<String> = list_releases(&program(), &tags())
            .expect("releases")
            .into_iter()
            .map(|release| release.version.to_string())
            .collect();
        assert_eq!(versions, vec!["3.1.0", "3.3.0", "3.21.0", "3.22.0"]);
    }
}
