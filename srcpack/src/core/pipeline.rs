//! Pipeline assembly: program description + session -> ordered stages.
//!
//! Every stage is a described [`Step::sequence`], so a `cd` inside one stage
//! never affects the next. Paths depend on the [`Target`]: host builds live
//! under a caller-chosen work root, container builds under [`CONTAINER_ROOT`].

use std::path::{Path, PathBuf};

use crate::core::program::{PACKAGE_EXTENSION, ProgramDescription};
use crate::core::session::BuildSession;
use crate::core::step::{RemoveFiles, RunProcess, Step};
use crate::core::variant::{StageInputs, VariantStrategy};

/// Work root inside the build container.
pub const CONTAINER_ROOT: &str = "/build";

/// Where the pipeline will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Host { root: PathBuf },
    Container,
}

impl Target {
    pub fn root(&self) -> &Path {
        match self {
            Target::Host { root } => root,
            Target::Container => Path::new(CONTAINER_ROOT),
        }
    }

    /// Container builds already run as root.
    fn elevate(&self) -> bool {
        matches!(self, Target::Host { .. })
    }
}

/// `apt-get update` followed by a non-interactive install of `packages`.
pub fn apt_install(packages: &[String], elevated: bool) -> Step {
    Step::sequence(apt_install_steps(packages, elevated))
}

pub fn apt_install_steps(packages: &[String], elevated: bool) -> Vec<Step> {
    let mut install = vec!["apt-get".to_string(), "install".to_string(), "-y".to_string()];
    install.extend(packages.iter().cloned());
    vec![
        RunProcess::new(["apt-get", "update"])
            .elevated(elevated)
            .into(),
        RunProcess::new(install)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .elevated(elevated)
            .into(),
    ]
}

/// Stage builder for one program build.
#[derive(Debug)]
pub struct Pipeline<'a> {
    program: &'a ProgramDescription,
    session: &'a BuildSession,
    target: Target,
    source_dir: PathBuf,
    build_dir: PathBuf,
    configure_flags: Vec<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(program: &'a ProgramDescription, session: &'a BuildSession, target: Target) -> Self {
        let root = target.root();
        let source_dir = program.source_dir(root, session.version());
        let build_dir = program.build_dir(root, session.version());
        let configure_flags =
            program.expanded_configure_flags(session.install_prefix(), session.jobs());
        Self {
            program,
            session,
            target,
            source_dir,
            build_dir,
            configure_flags,
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.program
            .artifact_path(self.target.root(), self.session.version())
    }

    fn strategy(&self) -> &'static VariantStrategy {
        self.program.build_system.strategy()
    }

    fn inputs(&self) -> StageInputs<'_> {
        StageInputs {
            source_dir: &self.source_dir,
            build_dir: &self.build_dir,
            prefix: self.session.install_prefix(),
            jobs: self.session.jobs(),
            configure_flags: &self.configure_flags,
            bootstrap_script: &self.program.bootstrap_script,
        }
    }

    fn label(&self) -> String {
        format!("{} {}", self.program.name, self.session.version())
    }

    /// Dependency installation, skipped when nothing is declared.
    pub fn dependencies(&self) -> Option<Step> {
        if self.program.build_dependencies.is_empty() {
            return None;
        }
        Some(
            apt_install(&self.program.build_dependencies, self.target.elevate())
                .describe(format!("Install build dependencies of {}", self.program.name)),
        )
    }

    /// Shallow clone of the resolved tag into a fresh source directory.
    pub fn source(&self) -> Step {
        let parent = self
            .source_dir
            .parent()
            .map_or_else(|| self.target.root().to_path_buf(), Path::to_path_buf);
        Step::sequence(vec![
            Step::make_dir(parent),
            RemoveFiles::new([self.source_dir.to_string_lossy()])
                .recursive(true)
                .into(),
            Step::run([
                "git".to_string(),
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                self.session.tag().to_string(),
                self.program.source_repository.clone(),
                self.source_dir.to_string_lossy().into_owned(),
            ]),
        ])
        .describe(format!("Fetch source of {}", self.label()))
    }

    pub fn submodules(&self) -> Step {
        Step::sequence(vec![
            Step::change_dir(&self.source_dir),
            Step::run(["git", "submodule", "update", "--init", "--recursive"]),
        ])
        .describe(format!("Initialise submodules of {}", self.label()))
    }

    pub fn configure(&self) -> Option<Step> {
        let steps = (self.strategy().configure)(&self.inputs());
        if steps.is_empty() {
            return None;
        }
        Some(Step::sequence(steps).describe(format!("Configure {}", self.label())))
    }

    pub fn compile(&self) -> Step {
        Step::sequence((self.strategy().compile)(&self.inputs()))
            .describe(format!("Compile {}", self.label()))
    }

    /// Host-only install into the prefix, elevated.
    pub fn install(&self) -> Step {
        Step::sequence(vec![
            Step::change_dir(&self.build_dir),
            RunProcess::new(self.strategy().install_argv())
                .elevated(self.target.elevate())
                .into(),
        ])
        .describe(format!("Install {}", self.label()))
    }

    /// Build stages in order: dependencies, source, submodules, configure, compile.
    pub fn stages(&self) -> Vec<Step> {
        let mut stages = Vec::with_capacity(5);
        stages.extend(self.dependencies());
        stages.push(self.source());
        stages.push(self.submodules());
        stages.extend(self.configure());
        stages.push(self.compile());
        stages
    }

    /// Wrap the install into a package and move it to the canonical artifact path.
    pub fn package(&self) -> Step {
        let root = self.target.root();
        let version = self.session.version();
        let staging = self.program.staging_dir(root, version);
        let artifact_dir = ProgramDescription::artifact_dir(root);

        let mut argv = vec![
            "checkinstall".to_string(),
            "-y".to_string(),
            "--type=debian".to_string(),
            format!("--pkgname={}", self.session.package_name()),
            format!("--pkgversion={}", self.session.package_version()),
            format!("--pakdir={}", staging.to_string_lossy()),
            format!("--pkgsource={}", self.program.source_repository),
        ];
        if !self.program.run_dependencies.is_empty() {
            argv.push(format!(
                "--requires={}",
                self.program.run_dependencies.join(",")
            ));
        }
        argv.extend(self.strategy().install_argv());

        Step::sequence(vec![
            RemoveFiles::new([staging.to_string_lossy()])
                .recursive(true)
                .into(),
            Step::make_dir(&staging),
            Step::make_dir(artifact_dir),
            Step::change_dir(&self.build_dir),
            Step::run(argv),
            Step::move_matching(
                format!("{}/*.{PACKAGE_EXTENSION}", staging.to_string_lossy()),
                self.artifact_path(),
            ),
        ])
        .describe(format!("Package {}", self.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::program::ProgramFile;
    use crate::core::session::SessionOptions;
    use crate::core::version::Release;

    fn program(build_system: &str, flags: &str, run_deps: &str) -> ProgramDescription {
        let text = format!(
            r#"
            [program]
            name = "foo"
            build_system = "{build_system}"
            source_repository = "https://example.com/foo.git"
            tag_pattern = '^v(?P<version>[\d.]+)$'
            configure_flags = {flags}

            [dependencies]
            build = ["git", "g++"]
            run = {run_deps}
            "#
        );
        let file: ProgramFile = toml::from_str(&text).expect("parse");
        file.normalize().expect("normalize")
    }

    fn session(program: &ProgramDescription, jobs: Option<usize>) -> BuildSession {
        BuildSession::new(
            program,
            Release {
                tag: "v1.2.3".to_string(),
                version: "1.2.3".parse().expect("version"),
            },
            SessionOptions {
                jobs,
                base_image: "ubuntu:22.04".to_string(),
                install_prefix: PathBuf::from("/usr/local"),
                package_name: None,
                package_version: None,
            },
            8,
        )
        .expect("session")
    }

    fn line(step: &Step) -> String {
        step.render_script_line().expect("render")
    }

    #[test]
    fn cmake_configure_carries_flags_verbatim_and_ninja() {
        let program = program("cmake", r#"["-DOFFLINE=TRUE", "-DCMAKE_BUILD_TYPE:STRING=Release"]"#, "[]");
        let session = session(&program, None);
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        let configure = pipeline.configure().expect("configure stage");
        let rendered = line(&configure);
        assert_eq!(
            rendered,
            "rm -rf /build/foo-1.2.3/build && mkdir -p /build/foo-1.2.3/build \
             && cd /build/foo-1.2.3/build && cmake -G Ninja -DCMAKE_INSTALL_PREFIX=/usr/local \
             -DOFFLINE=TRUE -DCMAKE_BUILD_TYPE:STRING=Release /build/foo-1.2.3/src"
        );
        assert_eq!(rendered.matches("-DOFFLINE=TRUE").count(), 1);
        assert_eq!(configure.description.as_deref(), Some("Configure foo 1.2.3"));
    }

    #[test]
    fn stages_follow_fixed_order() {
        let program = program("autoconf", "[]", "[]");
        let session = session(&program, Some(2));
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        let descriptions: Vec<_> = pipeline
            .stages()
            .into_iter()
            .map(|stage| stage.description.unwrap_or_default())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "Install build dependencies of foo",
                "Fetch source of foo 1.2.3",
                "Initialise submodules of foo 1.2.3",
                "Configure foo 1.2.3",
                "Compile foo 1.2.3",
            ]
        );
    }

    #[test]
    fn in_tree_without_flags_skips_configure() {
        let program = program("make", "[]", "[]");
        let session = session(&program, Some(2));
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        assert!(pipeline.configure().is_none());
        assert_eq!(pipeline.build_dir(), pipeline.source_dir());
        assert_eq!(
            line(&pipeline.compile()),
            "cd /build/foo-1.2.3/src && make -j2"
        );
    }

    #[test]
    fn placeholders_expand_with_prefix_and_jobs() {
        let program = program(
            "make",
            r#"["./bootstrap", "--prefix={prefix}", "--parallel={jobs}"]"#,
            "[]",
        );
        let session = session(&program, Some(5));
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        assert_eq!(
            line(&pipeline.configure().expect("configure")),
            "cd /build/foo-1.2.3/src && ./bootstrap --prefix=/usr/local --parallel=5"
        );
    }

    #[test]
    fn source_stage_clones_exact_tag_into_fresh_dir() {
        let program = program("cmake", "[]", "[]");
        let session = session(&program, None);
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        assert_eq!(
            line(&pipeline.source()),
            "mkdir -p /build/foo-1.2.3 && rm -rf /build/foo-1.2.3/src && git clone --depth 1 \
             --branch v1.2.3 https://example.com/foo.git /build/foo-1.2.3/src"
        );
    }

    #[test]
    fn host_dependencies_are_elevated() {
        let program = program("cmake", "[]", "[]");
        let session = session(&program, None);
        let host = Pipeline::new(
            &program,
            &session,
            Target::Host {
                root: PathBuf::from("/tmp/work"),
            },
        );
        assert_eq!(
            line(&host.dependencies().expect("deps")),
            "sudo apt-get update && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y git g++"
        );
        let container = Pipeline::new(&program, &session, Target::Container);
        assert_eq!(
            line(&container.dependencies().expect("deps")),
            "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y git g++"
        );
    }

    #[test]
    fn package_lists_run_dependencies_and_relocates_artifact() {
        let program = program("cmake", "[]", r#"["libzstd1", "zlib1g"]"#);
        let session = session(&program, None);
        let pipeline = Pipeline::new(&program, &session, Target::Container);
        assert_eq!(
            line(&pipeline.package()),
            "rm -rf /build/foo-1.2.3/staging && mkdir -p /build/foo-1.2.3/staging \
             && mkdir -p /build/packages && cd /build/foo-1.2.3/build && checkinstall -y \
             --type=debian --pkgname=foo --pkgversion=1.2.3 --pakdir=/build/foo-1.2.3/staging \
             --pkgsource=https://example.com/foo.git --requires=libzstd1,zlib1g ninja install \
             && mv /build/foo-1.2.3/staging/*.deb /build/packages/foo_1.2.3.deb"
        );
    }

    #[test]
    fn host_install_runs_elevated_from_build_dir() {
        let program = program("autoconf", "[]", "[]");
        let session = session(&program, None);
        let pipeline = Pipeline::new(
            &program,
            &session,
            Target::Host {
                root: PathBuf::from("/w"),
            },
        );
        assert_eq!(
            line(&pipeline.install()),
            "cd /w/foo-1.2.3/build && sudo make install"
        );
    }
}
