//! Program descriptions: the per-program build contract.
//!
//! Definition files are deserialized into [`ProgramFile`] and normalised once
//! by [`ProgramFile::normalize`] into an immutable [`ProgramDescription`].
//! Everything path-shaped is derived from the program name and the resolved
//! version, so the same inputs always land in the same places.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::variant::{self, VariantStrategy};
use crate::core::version::{TagGrammar, Version};

/// File extension of the packages produced by the packaging stage.
pub const PACKAGE_EXTENSION: &str = "deb";

const DEFAULT_BOOTSTRAP_SCRIPT: &str = "./autogen.sh";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder regex"));

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").expect("name regex"));

/// The build tooling family of a source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildSystem {
    InTreeMake,
    Autoconf,
    CmakeNinja,
}

impl BuildSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildSystem::InTreeMake => "in-tree-make",
            BuildSystem::Autoconf => "autoconf",
            BuildSystem::CmakeNinja => "cmake-ninja",
        }
    }

    /// The command shapes for this build system.
    pub fn strategy(self) -> &'static VariantStrategy {
        match self {
            BuildSystem::InTreeMake => &variant::IN_TREE_MAKE,
            BuildSystem::Autoconf => &variant::AUTOCONF,
            BuildSystem::CmakeNinja => &variant::CMAKE_NINJA,
        }
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildSystem {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "make" | "makefile" | "in-tree-make" => Ok(BuildSystem::InTreeMake),
            "autoconf" => Ok(BuildSystem::Autoconf),
            "cmake" | "cmake-ninja" => Ok(BuildSystem::CmakeNinja),
            other => Err(anyhow!(
                "unknown build_system {other:?} (expected make, autoconf or cmake)"
            )),
        }
    }
}

/// Raw definition file as written by humans.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramFile {
    pub program: ProgramSection,
    #[serde(default)]
    pub dependencies: DependencySection,
    #[serde(default)]
    pub layout: LayoutSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramSection {
    pub name: String,
    pub build_system: String,
    pub source_repository: String,
    pub tag_pattern: String,
    #[serde(default)]
    pub configure_flags: ConfigureFlags,
    #[serde(default)]
    pub bootstrap_script: Option<String>,
}

/// Either a whitespace-separated string or an explicit list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigureFlags {
    Line(String),
    List(Vec<String>),
}

impl Default for ConfigureFlags {
    fn default() -> Self {
        ConfigureFlags::List(Vec::new())
    }
}

impl ConfigureFlags {
    fn into_vec(self) -> Vec<String> {
        match self {
            ConfigureFlags::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            ConfigureFlags::List(list) => list
                .into_iter()
                .filter(|flag| !flag.trim().is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySection {
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub run: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutSection {
    pub source_dir: Option<String>,
    pub build_dir: Option<String>,
}

impl ProgramFile {
    /// Validate and type every field, producing the immutable description.
    pub fn normalize(self) -> Result<ProgramDescription> {
        let ProgramFile {
            program,
            dependencies,
            layout,
        } = self;

        let name = program.name.trim().to_string();
        if !NAME_RE.is_match(&name) {
            bail!("program name {name:?} must match [a-z0-9][a-z0-9._+-]*");
        }
        let build_system: BuildSystem = program.build_system.parse()?;
        let source_repository = program.source_repository.trim().to_string();
        if source_repository.is_empty() {
            bail!("source_repository must not be empty");
        }
        let grammar = TagGrammar::new(&program.tag_pattern)?;

        let configure_flags = program.configure_flags.into_vec();
        for flag in &configure_flags {
            check_placeholders(flag, &["prefix", "jobs"])
                .map_err(|err| anyhow!("configure flag {flag:?}: {err}"))?;
        }

        for template in [&layout.source_dir, &layout.build_dir].into_iter().flatten() {
            check_placeholders(template, &["root", "name", "version"])
                .map_err(|err| anyhow!("layout template {template:?}: {err}"))?;
        }
        if build_system == BuildSystem::InTreeMake && layout.build_dir.is_some() {
            bail!("layout.build_dir is not allowed for in-tree builds");
        }

        let bootstrap_script = program
            .bootstrap_script
            .map(|script| script.trim().to_string())
            .filter(|script| !script.is_empty())
            .unwrap_or_else(|| DEFAULT_BOOTSTRAP_SCRIPT.to_string());

        Ok(ProgramDescription {
            name,
            build_system,
            source_repository,
            grammar,
            build_dependencies: clean_list(dependencies.build),
            run_dependencies: clean_list(dependencies.run),
            configure_flags,
            bootstrap_script,
            source_dir_template: layout.source_dir,
            build_dir_template: layout.build_dir,
        })
    }
}

/// A fully-typed, read-only program build contract.
#[derive(Debug, Clone)]
pub struct ProgramDescription {
    pub name: String,
    pub build_system: BuildSystem,
    pub source_repository: String,
    pub grammar: TagGrammar,
    pub build_dependencies: Vec<String>,
    pub run_dependencies: Vec<String>,
    /// Extra configure arguments; may contain `{prefix}` and `{jobs}`.
    pub configure_flags: Vec<String>,
    /// Autoconf bootstrap script, run from the source directory.
    pub bootstrap_script: String,
    source_dir_template: Option<String>,
    build_dir_template: Option<String>,
}

impl ProgramDescription {
    fn work_dir(&self, root: &Path, version: &Version) -> PathBuf {
        root.join(format!("{}-{version}", self.name))
    }

    fn expand_layout(&self, template: &str, root: &Path, version: &Version) -> PathBuf {
        PathBuf::from(
            template
                .replace("{root}", &root.to_string_lossy())
                .replace("{name}", &self.name)
                .replace("{version}", &version.to_string()),
        )
    }

    pub fn source_dir(&self, root: &Path, version: &Version) -> PathBuf {
        match &self.source_dir_template {
            Some(template) => self.expand_layout(template, root, version),
            None => self.work_dir(root, version).join("src"),
        }
    }

    /// Equal to [`source_dir`](Self::source_dir) for in-tree builds.
    pub fn build_dir(&self, root: &Path, version: &Version) -> PathBuf {
        if !self.build_system.strategy().separate_build_dir {
            return self.source_dir(root, version);
        }
        match &self.build_dir_template {
            Some(template) => self.expand_layout(template, root, version),
            None => self.work_dir(root, version).join("build"),
        }
    }

    /// Where the package builder writes its output before relocation.
    pub fn staging_dir(&self, root: &Path, version: &Version) -> PathBuf {
        self.work_dir(root, version).join("staging")
    }

    pub fn artifact_dir(root: &Path) -> PathBuf {
        root.join("packages")
    }

    /// `<root>/packages/<name>_<version>.deb`, independent of package overrides.
    pub fn artifact_path(&self, root: &Path, version: &Version) -> PathBuf {
        Self::artifact_dir(root).join(format!(
            "{}_{version}.{PACKAGE_EXTENSION}",
            self.name
        ))
    }

    /// Configure flags with `{prefix}` and `{jobs}` substituted.
    pub fn expanded_configure_flags(&self, prefix: &Path, jobs: usize) -> Vec<String> {
        let prefix = prefix.to_string_lossy();
        let jobs = jobs.to_string();
        self.configure_flags
            .iter()
            .map(|flag| flag.replace("{prefix}", &prefix).replace("{jobs}", &jobs))
            .collect()
    }
}

fn check_placeholders(template: &str, allowed: &[&str]) -> Result<()> {
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let key = &caps[1];
        if !allowed.contains(&key) {
            bail!(
                "unknown placeholder {{{key}}} (allowed: {})",
                allowed
                    .iter()
                    .map(|name| format!("{{{name}}}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    Ok(())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
