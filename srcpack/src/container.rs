//! Container mode: build the two-stage image and extract the package from it.
//!
//! The image is built at most once per session. Extraction always pairs a
//! container create with a remove, even when the copy in between fails.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument, warn};

use crate::core::pipeline::CONTAINER_ROOT;
use crate::core::program::ProgramDescription;
use crate::core::recipe::render_recipe;
use crate::core::session::BuildSession;
use crate::io::engine::{ContainerEngine, ImageBuild};

/// Container build settings shared by every call in one invocation.
pub struct ContainerBuild<'a> {
    engine: &'a dyn ContainerEngine,
    locale: &'a str,
}

impl<'a> ContainerBuild<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, locale: &'a str) -> Self {
        Self { engine, locale }
    }

    /// Build `name:version` unless this session already did.
    #[instrument(skip_all, fields(image = %session.image_tag()))]
    pub fn build_image(
        &self,
        program: &ProgramDescription,
        session: &mut BuildSession,
    ) -> Result<()> {
        if session.image_built() {
            debug!("image already built in this session");
            return Ok(());
        }
        let recipe = render_recipe(program, session, self.locale)?;
        let tag = session.image_tag();
        self.engine
            .build_image(&ImageBuild {
                tag: &tag,
                recipe: &recipe,
                cpu_quota: session.cpu_quota(),
            })
            .with_context(|| format!("build image {tag}"))?;
        session.mark_image_built();
        info!("image built");
        Ok(())
    }

    /// Copy the package out of the built image to `destination`.
    ///
    /// A directory destination receives the package under its own file name.
    #[instrument(skip_all, fields(image = %session.image_tag(), destination = %destination.display()))]
    pub fn extract_artifact(
        &self,
        program: &ProgramDescription,
        session: &mut BuildSession,
        destination: &Path,
    ) -> Result<PathBuf> {
        self.build_image(program, session)?;

        let source = program.artifact_path(Path::new(CONTAINER_ROOT), session.version());
        let target = match source.file_name() {
            Some(name) if destination.is_dir() => destination.join(name),
            _ => destination.to_path_buf(),
        };
        let name = container_name(session.program());

        self.engine
            .create_container(&session.image_tag(), &name)
            .with_context(|| format!("create container {name}"))?;
        let copied = self
            .engine
            .copy_from_container(&name, &source, &target)
            .with_context(|| format!("copy {} out of {name}", source.display()));
        let removed = self
            .engine
            .remove_container(&name)
            .with_context(|| format!("remove container {name}"));

        if copied.is_err()
            && let Err(err) = &removed
        {
            warn!(err = %format!("{err:#}"), "failed to remove container after failed copy");
        }
        copied?;
        removed?;
        info!(artifact = %target.display(), "artifact extracted");
        Ok(target)
    }
}

/// `srcpack-<program>-<6 random chars>`.
fn container_name(program: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("srcpack-{program}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::program::ProgramFile;
    use crate::core::session::SessionOptions;
    use crate::core::version::Release;
    use crate::test_support::{EngineCall, FakeEngine};

    fn fixture(jobs: Option<usize>) -> (ProgramDescription, BuildSession) {
        let file: ProgramFile = toml::from_str(
            r#"
            [program]
            name = "foo"
            build_system = "cmake"
            source_repository = "https://example.com/foo.git"
            tag_pattern = '^v(?P<version>[\d.]+)$'
            "#,
        )
        .expect("parse");
        let program = file.normalize().expect("normalize");
        let session = BuildSession::new(
            &program,
            Release {
                tag: "v1.2.3".to_string(),
                version: "1.2.3".parse().expect("version"),
            },
            SessionOptions {
                jobs,
                base_image: "ubuntu:22.04".to_string(),
                install_prefix: PathBuf::from("/usr/local"),
                package_name: Some("foo-custom".to_string()),
                package_version: None,
            },
            8,
        )
        .expect("session");
        (program, session)
    }

    #[test]
    fn image_is_built_once_per_session() {
        let (program, mut session) = fixture(Some(2));
        let engine = FakeEngine::new();
        let build = ContainerBuild::new(&engine, "en_US.UTF-8");
        build.build_image(&program, &mut session).expect("first");
        build.build_image(&program, &mut session).expect("second");

        let builds: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::Build { .. }))
            .collect();
        assert_eq!(builds.len(), 1);
        let EngineCall::Build {
            tag,
            cpu_quota,
            recipe,
        } = &builds[0]
        else {
            unreachable!();
        };
        assert_eq!(tag, "foo:1.2.3");
        assert_eq!(*cpu_quota, Some(200_000));
        assert!(recipe.contains("--pkgname=foo-custom"));
    }

    #[test]
    fn extraction_creates_copies_and_removes_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (program, mut session) = fixture(None);
        let engine = FakeEngine::new();
        let build = ContainerBuild::new(&engine, "en_US.UTF-8");

        let target = build
            .extract_artifact(&program, &mut session, temp.path())
            .expect("extract");
        assert_eq!(target, temp.path().join("foo_1.2.3.deb"));
        build
            .extract_artifact(&program, &mut session, &temp.path().join("renamed.deb"))
            .expect("extract again");

        let calls = engine.calls();
        let kinds: Vec<&str> = calls.iter().map(EngineCall::kind).collect();
        assert_eq!(
            kinds,
            vec!["build", "create", "copy", "remove", "create", "copy", "remove"]
        );
        let EngineCall::Build { cpu_quota, .. } = &calls[0] else {
            unreachable!();
        };
        assert_eq!(*cpu_quota, None);
        let EngineCall::Copy {
            name,
            source,
            destination,
        } = &calls[2]
        else {
            unreachable!();
        };
        assert!(name.starts_with("srcpack-foo-"), "{name}");
        assert_eq!(source, &PathBuf::from("/build/packages/foo_1.2.3.deb"));
        assert_eq!(destination, &temp.path().join("foo_1.2.3.deb"));
        let EngineCall::Remove { name: removed } = &calls[3] else {
            unreachable!();
        };
        assert_eq!(removed, name);
    }

    #[test]
    fn container_is_removed_when_copy_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (program, mut session) = fixture(None);
        let engine = FakeEngine::new().fail_copy();
        let build = ContainerBuild::new(&engine, "en_US.UTF-8");

        let err = build
            .extract_artifact(&program, &mut session, temp.path())
            .expect_err("copy fails");
        assert!(format!("{err:#}").contains("copy"), "{err:#}");

        let kinds: Vec<&str> = engine.calls().iter().map(EngineCall::kind).collect();
        assert_eq!(kinds, vec!["build", "create", "copy", "remove"]);
    }

    #[test]
    fn container_names_are_unique() {
        let first = container_name("foo");
        let second = container_name("foo");
        assert!(first.starts_with("srcpack-foo-"));
        assert_eq!(first.len(), "srcpack-foo-".len() + 6);
        assert_ne!(first, second);
    }
}
