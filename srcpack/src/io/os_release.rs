//! Default base image from the host's `/etc/os-release`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// `<ID>:<VERSION_ID>`, e.g. `ubuntu:22.04`.
pub fn base_image_from(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_base_image(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_base_image(contents: &str) -> Result<String> {
    let mut id = None;
    let mut version_id = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|ch| ch == '"' || ch == '\'');
        match key.trim() {
            "ID" => id = Some(value.to_string()),
            "VERSION_ID" => version_id = Some(value.to_string()),
            _ => {}
        }
    }
    let id = id.ok_or_else(|| anyhow!("missing ID"))?;
    let version_id = version_id.ok_or_else(|| anyhow!("missing VERSION_ID"))?;
    Ok(format!("{id}:{version_id}"))
}
