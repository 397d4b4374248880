//! Per-build-system command shapes.
//!
//! Each [`BuildSystem`](crate::core::program::BuildSystem) maps to exactly one
//! [`VariantStrategy`], selected once; pipeline assembly never branches on the
//! build system itself.

use std::path::Path;

use crate::core::step::{RemoveFiles, Step};

/// Inputs shared by every variant's step builders.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub source_dir: &'a Path,
    pub build_dir: &'a Path,
    pub prefix: &'a Path,
    pub jobs: usize,
    /// Already expanded (`{prefix}`/`{jobs}` substituted).
    pub configure_flags: &'a [String],
    pub bootstrap_script: &'a str,
}

/// Layout plus configure/compile/install builders for one build system.
#[derive(Debug)]
pub struct VariantStrategy {
    pub separate_build_dir: bool,
    /// Steps of the configure stage; empty means the stage is skipped.
    pub configure: fn(&StageInputs<'_>) -> Vec<Step>,
    pub compile: fn(&StageInputs<'_>) -> Vec<Step>,
    /// Run from the build directory.
    pub install_argv: &'static [&'static str],
}

pub static IN_TREE_MAKE: VariantStrategy = VariantStrategy {
    separate_build_dir: false,
    configure: in_tree_configure,
    compile: make_compile,
    install_argv: &["make", "install"],
};

pub static AUTOCONF: VariantStrategy = VariantStrategy {
    separate_build_dir: true,
    configure: autoconf_configure,
    compile: make_compile,
    install_argv: &["make", "install"],
};

pub static CMAKE_NINJA: VariantStrategy = VariantStrategy {
    separate_build_dir: true,
    configure: cmake_configure,
    compile: ninja_compile,
    install_argv: &["ninja", "install"],
};

impl VariantStrategy {
    pub fn install_argv(&self) -> Vec<String> {
        self.install_argv.iter().map(|arg| arg.to_string()).collect()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Fresh build directory so re-runs never see stale configure state.
fn recreate_build_dir(build_dir: &Path) -> [Step; 2] {
    [
        RemoveFiles::new([path_arg(build_dir)]).recursive(true).into(),
        Step::make_dir(build_dir),
    ]
}

/// In-tree trees configure only when flags are given; the flags are the full command.
fn in_tree_configure(inputs: &StageInputs<'_>) -> Vec<Step> {
    if inputs.configure_flags.is_empty() {
        return Vec::new();
    }
    vec![
        Step::change_dir(inputs.source_dir),
        Step::run(inputs.configure_flags.iter().cloned()),
    ]
}

fn autoconf_configure(inputs: &StageInputs<'_>) -> Vec<Step> {
    let mut steps = vec![
        Step::change_dir(inputs.source_dir),
        Step::run([inputs.bootstrap_script]),
    ];
    steps.extend(recreate_build_dir(inputs.build_dir));
    steps.push(Step::change_dir(inputs.build_dir));

    let mut argv = vec![
        path_arg(&inputs.source_dir.join("configure")),
        format!("--prefix={}", path_arg(inputs.prefix)),
    ];
    argv.extend(inputs.configure_flags.iter().cloned());
    steps.push(Step::run(argv));
    steps
}

fn cmake_configure(inputs: &StageInputs<'_>) -> Vec<Step> {
    let mut steps = Vec::from(recreate_build_dir(inputs.build_dir));
    steps.push(Step::change_dir(inputs.build_dir));

    let mut argv = vec![
        "cmake".to_string(),
        "-G".to_string(),
        "Ninja".to_string(),
        format!("-DCMAKE_INSTALL_PREFIX={}", path_arg(inputs.prefix)),
    ];
    argv.extend(inputs.configure_flags.iter().cloned());
    argv.push(path_arg(inputs.source_dir));
    steps.push(Step::run(argv));
    steps
}

fn make_compile(inputs: &StageInputs<'_>) -> Vec<Step> {
    vec![
        Step::change_dir(inputs.build_dir),
        Step::run(["make".to_string(), format!("-j{}", inputs.jobs)]),
    ]
}

fn ninja_compile(inputs: &StageInputs<'_>) -> Vec<Step> {
    vec![
        Step::change_dir(inputs.build_dir),
        Step::run([
            "ninja".to_string(),
            "-j".to_string(),
            inputs.jobs.to_string(),
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .map(|step| step.render_script_line().expect("render"))
            .collect()
    }

    fn inputs<'a>(flags: &'a [String]) -> StageInputs<'a> {
        StageInputs {
            source_dir: Path::new("/build/foo-1.0/src"),
            build_dir: Path::new("/build/foo-1.0/build"),
            prefix: Path::new("/usr/local"),
            jobs: 4,
            configure_flags: flags,
            bootstrap_script: "./autogen.sh",
        }
    }

    #[test]
    fn in_tree_without_flags_has_no_configure() {
        assert!((IN_TREE_MAKE.configure)(&inputs(&[])).is_empty());
    }

    #[test]
    fn in_tree_flags_run_as_the_command() {
        let flags = vec!["./bootstrap".to_string(), "--prefix=/usr/local".to_string()];
        assert_eq!(
            render(&(IN_TREE_MAKE.configure)(&inputs(&flags))),
            vec!["cd /build/foo-1.0/src", "./bootstrap --prefix=/usr/local"]
        );
    }

    #[test]
    fn autoconf_bootstraps_then_configures_out_of_tree() {
        let flags = vec!["--with-x-toolkit=lucid".to_string()];
        assert_eq!(
            render(&(AUTOCONF.configure)(&inputs(&flags))),
            vec![
                "cd /build/foo-1.0/src",
                "./autogen.sh",
                "rm -rf /build/foo-1.0/build",
                "mkdir -p /build/foo-1.0/build",
                "cd /build/foo-1.0/build",
                "/build/foo-1.0/src/configure --prefix=/usr/local --with-x-toolkit=lucid",
            ]
        );
    }

    #[test]
    fn compile_commands_carry_parallelism() {
        assert_eq!(
            render(&(AUTOCONF.compile)(&inputs(&[]))),
            vec!["cd /build/foo-1.0/build", "make -j4"]
        );
        assert_eq!(
            render(&(CMAKE_NINJA.compile)(&inputs(&[]))),
            vec!["cd /build/foo-1.0/build", "ninja -j 4"]
        );
    }

    #[test]
    fn install_commands_match_build_tool() {
        assert_eq!(IN_TREE_MAKE.install_argv(), vec!["make", "install"]);
        assert_eq!(CMAKE_NINJA.install_argv(), vec!["ninja", "install"]);
    }
}
