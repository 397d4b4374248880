//! Program registry: definition files on disk -> name-indexed descriptions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::program::{ProgramDescription, ProgramFile};
use crate::error::RegistryError;

/// Every known program, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct ProgramRegistry {
    programs: BTreeMap<String, ProgramDescription>,
}

impl ProgramRegistry {
    /// Load and normalise every `*.toml` definition in `dir`.
    ///
    /// All per-file failures are collected and reported together.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("programs directory {} does not exist", dir.display());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read programs dir {}", dir.display()))? {
            let entry = entry.context("read program entry")?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut failures = Vec::new();
        let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut programs = BTreeMap::new();
        for path in paths {
            let program = match load_definition(&path) {
                Ok(program) => program,
                Err(err) => {
                    failures.push((path, format!("{err:#}")));
                    continue;
                }
            };
            if let Some(first) = sources.get(&program.name) {
                let duplicate = RegistryError::Duplicate {
                    name: program.name.clone(),
                    first: first.clone(),
                    second: path.clone(),
                };
                failures.push((path, duplicate.to_string()));
                continue;
            }
            debug!(name = %program.name, path = %path.display(), "registered program");
            sources.insert(program.name.clone(), path);
            programs.insert(program.name.clone(), program);
        }
        if !failures.is_empty() {
            return Err(RegistryError::Load { failures }.into());
        }
        info!(count = programs.len(), "loaded program definitions");
        Ok(Self { programs })
    }

    pub fn get(&self, name: &str) -> Result<&ProgramDescription, RegistryError> {
        self.programs
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProgram {
                name: name.to_string(),
                known: self.names().map(str::to_string).collect(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramDescription> {
        self.programs.values()
    }
}

fn load_definition(path: &Path) -> Result<ProgramDescription> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: ProgramFile = toml::from_str(&contents).context("parse definition")?;
    file.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> String {
        format!(
            r#"
[program]
name = "{name}"
build_system = "autoconf"
source_repository = "https://example.com/{name}.git"
tag_pattern = '^v(?P<version>[\d.]+)$'
"#
        )
    }

    #[test]
    fn indexes_programs_by_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("b.toml"), definition("bar")).expect("write");
        fs::write(temp.path().join("a.toml"), definition("foo")).expect("write");
        fs::write(temp.path().join("README.md"), "ignored").expect("write");

        let registry = ProgramRegistry::discover(temp.path()).expect("discover");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["bar", "foo"]);
        assert_eq!(registry.get("foo").expect("foo").name, "foo");
    }

    #[test]
    fn unknown_program_lists_known_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("foo.toml"), definition("foo")).expect("write");
        let registry = ProgramRegistry::discover(temp.path()).expect("discover");
        let err = registry.get("gdb").expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "unknown program \"gdb\" (known programs: foo)"
        );
    }

    #[test]
    fn reports_every_broken_definition() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("good.toml"), definition("foo")).expect("write");
        fs::write(temp.path().join("bad1.toml"), "[program]\nname = 3\n").expect("write");
        fs::write(
            temp.path().join("bad2.toml"),
            definition("bar").replace("autoconf", "scons"),
        )
        .expect("write");

        let err = ProgramRegistry::discover(temp.path()).expect_err("broken");
        let Some(RegistryError::Load { failures }) = err.downcast_ref::<RegistryError>() else {
            panic!("expected load error, got {err:#}");
        };
        let files: Vec<_> = failures
            .iter()
            .filter_map(|(path, _)| path.file_name())
            .collect();
        assert_eq!(files, vec!["bad1.toml", "bad2.toml"]);
        assert!(failures[1].1.contains("scons"));
    }

    #[test]
    fn duplicates_are_reported_with_other_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a_broken.toml"), "not toml").expect("write");
        fs::write(temp.path().join("one.toml"), definition("foo")).expect("write");
        fs::write(temp.path().join("two.toml"), definition("foo")).expect("write");

        let err = ProgramRegistry::discover(temp.path()).expect_err("duplicate");
        let Some(RegistryError::Load { failures }) = err.downcast_ref::<RegistryError>() else {
            panic!("expected load error, got {err:#}");
        };
        let files: Vec<_> = failures
            .iter()
            .filter_map(|(path, _)| path.file_name())
            .collect();
        assert_eq!(files, vec!["a_broken.toml", "two.toml"]);
        assert!(
            failures[1].1.starts_with("duplicate program name \"foo\""),
            "{}",
            failures[1].1
        );
        assert!(failures[1].1.contains("one.toml"));
    }

    #[test]
    fn shipped_definitions_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../programs");
        let registry = ProgramRegistry::discover(&dir).expect("discover");
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![
                "appimagekit",
                "ccache",
                "cmake",
                "emacs",
                "mold",
                "solvespace",
                "valgrind"
            ]
        );
        let mold = registry.get("mold").expect("mold");
        assert_eq!(mold.run_dependencies, vec!["zlib1g", "libssl3"]);
    }
}
