//! Tool configuration stored in `srcpack.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "srcpack.toml";

/// srcpack configuration (TOML).
///
/// Every field is optional in the file; command-line flags override it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SrcpackConfig {
    /// Directory holding the program definition files.
    pub programs_dir: PathBuf,

    /// Work root for host-mode builds.
    pub work_dir: PathBuf,

    /// Default install prefix baked into configure steps.
    pub install_prefix: PathBuf,

    /// Container engine executable (`docker`, `podman`).
    pub container_engine: String,

    /// Locale configured in the runtime image.
    pub locale: String,

    /// Timeout for listing remote tags.
    pub remote_timeout_secs: u64,
}

impl Default for SrcpackConfig {
    fn default() -> Self {
        Self {
            programs_dir: PathBuf::from("programs"),
            work_dir: env::temp_dir().join("srcpack"),
            install_prefix: PathBuf::from("/usr/local"),
            container_engine: "docker".to_string(),
            locale: "en_US.UTF-8".to_string(),
            remote_timeout_secs: 120,
        }
    }
}

impl SrcpackConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.install_prefix.is_absolute() {
            return Err(anyhow!(
                "install_prefix must be absolute, got {}",
                self.install_prefix.display()
            ));
        }
        if self.container_engine.trim().is_empty() {
            return Err(anyhow!("container_engine must be non-empty"));
        }
        if self.locale.trim().is_empty() || self.locale.contains(char::is_whitespace) {
            return Err(anyhow!("locale must be a single non-empty word"));
        }
        if self.remote_timeout_secs == 0 {
            return Err(anyhow!("remote_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SrcpackConfig::default()`.
pub fn load_config(path: &Path) -> Result<SrcpackConfig> {
    if !path.exists() {
        let cfg = SrcpackConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SrcpackConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SrcpackConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("srcpack.toml");
        fs::write(&path, "container_engine = \"podman\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.container_engine, "podman");
        assert_eq!(cfg.install_prefix, PathBuf::from("/usr/local"));
        assert_eq!(cfg.remote_timeout_secs, 120);
    }

    #[test]
    fn rejects_relative_prefix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("srcpack.toml");
        fs::write(&path, "install_prefix = \"opt\"\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("install_prefix"));
    }
}
