//! Release versions and the tag grammars that extract them from upstream tags.
//!
//! Resolution is pure: callers list the remote tags (see `io::tags`) and hand
//! them to [`resolve`], which picks the requested or newest release and maps it
//! back to the concrete tag to check out.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::VersionError;

/// A dotted numeric version (`29.1`, `3.22.1`), ordered component-wise.
///
/// Ordering follows tuple semantics, so `1.2 < 1.2.0 < 1.10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    parts: Vec<u64>,
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidVersion {
                input: input.to_string(),
                reason: "empty".to_string(),
            });
        }
        let parts = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|err| VersionError::InvalidVersion {
                        input: input.to_string(),
                        reason: format!("component {part:?}: {err}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { parts })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// Pattern deciding which upstream tags are releases.
///
/// The pattern must declare either a `version` capture group, used verbatim,
/// or all of `major`, `minor` and `patch`, composed as `major.minor.patch`.
#[derive(Debug, Clone)]
pub struct TagGrammar {
    pattern: Regex,
}

const TRIPLE_GROUPS: [&str; 3] = ["major", "minor", "patch"];

impl TagGrammar {
    pub fn new(pattern: &str) -> Result<Self, VersionError> {
        let compiled = Regex::new(pattern).map_err(|err| VersionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;
        let names: Vec<&str> = compiled.capture_names().flatten().collect();
        let has_version = names.contains(&"version");
        let has_triple = TRIPLE_GROUPS.iter().all(|group| names.contains(group));
        if !has_version && !has_triple {
            return Err(VersionError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "needs a `version` group or `major`, `minor` and `patch` groups"
                    .to_string(),
            });
        }
        Ok(Self { pattern: compiled })
    }

    /// Extract the release version from `tag`.
    ///
    /// Returns `Ok(None)` when the tag does not match the pattern (not a release).
    /// A match that yields no usable version is an error.
    pub fn extract(&self, tag: &str) -> Result<Option<Version>, VersionError> {
        let Some(caps) = self.pattern.captures(tag) else {
            return Ok(None);
        };
        if let Some(version) = caps.name("version") {
            return version.as_str().parse().map(Some);
        }
        let triple: Vec<&str> = TRIPLE_GROUPS
            .iter()
            .filter_map(|group| caps.name(group).map(|m| m.as_str()))
            .collect();
        if triple.len() == TRIPLE_GROUPS.len() {
            return triple.join(".").parse().map(Some);
        }
        Err(VersionError::IncompleteGrammar {
            tag: tag.to_string(),
        })
    }
}

/// An upstream tag paired with the version it represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub version: Version,
}

/// Parse every release tag, preserving the order of `tags`.
pub fn releases(grammar: &TagGrammar, tags: &[String]) -> Result<Vec<Release>, VersionError> {
    let mut found = Vec::new();
    for tag in tags {
        if let Some(version) = grammar.extract(tag)? {
            found.push(Release {
                tag: tag.clone(),
                version,
            });
        }
    }
    Ok(found)
}

/// The newest version among `releases`.
pub fn latest(releases: &[Release]) -> Result<&Version, VersionError> {
    releases
        .iter()
        .map(|release| &release.version)
        .max()
        .ok_or(VersionError::NoReleases)
}

/// The first tag whose version equals `target`.
pub fn tag_for<'a>(releases: &'a [Release], target: &Version) -> Result<&'a str, VersionError> {
    releases
        .iter()
        .find(|release| &release.version == target)
        .map(|release| release.tag.as_str())
        .ok_or_else(|| VersionError::NotFound {
            requested: target.clone(),
            known: known_versions(releases),
        })
}

/// Fix the version to build: `requested` if given, otherwise the newest release.
pub fn resolve(
    grammar: &TagGrammar,
    tags: &[String],
    requested: Option<&Version>,
) -> Result<Release, VersionError> {
    let found = releases(grammar, tags)?;
    let version = match requested {
        Some(version) => version,
        None => latest(&found)?,
    };
    let tag = tag_for(&found, version)?;
    Ok(Release {
        tag: tag.to_string(),
        version: version.clone(),
    })
}

/// Sorted, de-duplicated versions for diagnostics.
pub fn known_versions(releases: &[Release]) -> Vec<Version> {
    let mut known: Vec<Version> = releases.iter().map(|r| r.version.clone()).collect();
    known.sort();
    known.dedup();
    known
}
