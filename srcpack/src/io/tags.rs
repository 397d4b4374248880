//! Remote tag listing.
//!
//! Version resolution only needs the names of the tags in an upstream
//! repository, so we keep a small wrapper around `git ls-remote` behind the
//! [`TagSource`] trait.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

const OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Anything that can list the tags of a source repository.
pub trait TagSource {
    /// Tag names in the order the remote reports them.
    fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}

/// Lists tags with `git ls-remote`, without cloning.
#[derive(Debug, Clone)]
pub struct GitRemote {
    timeout: Duration,
}

impl GitRemote {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TagSource for GitRemote {
    #[instrument(skip_all, fields(repository))]
    fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut cmd = Command::new("git");
        cmd.args(["ls-remote", "--tags", "--refs", repository])
            // Never block on a credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");
        let output = run_command_with_timeout(cmd, None, self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("list tags of {repository}"))?;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "git ls-remote timed out");
            return Err(anyhow!(
                "git ls-remote {repository} timed out after {:?}",
                self.timeout
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git ls-remote {repository} failed with status {:?}: {}",
                output.status.code(),
                output.stderr_summary()
            ));
        }
        let tags = parse_ls_remote(&output.stdout_lossy())?;
        debug!(count = tags.len(), "listed remote tags");
        Ok(tags)
    }
}

/// Parse `<sha>\trefs/tags/<name>` lines into tag names.
///
/// Peeled entries (`<name>^{}`) are folded into their tag.
pub fn parse_ls_remote(output: &str) -> Result<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (_, reference) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("invalid ls-remote line: {line:?}"))?;
        let Some(name) = reference.trim().strip_prefix("refs/tags/") else {
            continue;
        };
        let name = name.strip_suffix("^{}").unwrap_or(name);
        if tags.last().map(String::as_str) != Some(name) {
            tags.push(name.to_string());
        }
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TagRepo;

    #[test]
    fn parses_tag_lines_in_order() {
        let output = "\
1111111111111111111111111111111111111111\trefs/tags/v1.0.0
2222222222222222222222222222222222222222\trefs/tags/v1.1.0
3333333333333333333333333333333333333333\trefs/tags/v1.1.0^{}
4444444444444444444444444444444444444444\trefs/heads/main
";
        assert_eq!(
            parse_ls_remote(output).expect("parse"),
            vec!["v1.0.0", "v1.1.0"]
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_ls_remote("not a ref line").is_err());
    }

    #[test]
    fn lists_tags_of_local_repository() {
        let repo = TagRepo::new(&["v1.0.0", "v1.2.0", "nightly"]).expect("repo");
        let remote = GitRemote::new(Duration::from_secs(30));
        let mut tags = remote.list_tags(&repo.url()).expect("list");
        tags.sort();
        assert_eq!(tags, vec!["nightly", "v1.0.0", "v1.2.0"]);
    }
}
