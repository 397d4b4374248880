//! The dual-mode command model.
//!
//! A [`Step`] is a unit of build work with two independent renderings:
//!
//! - **execute** (see `io::execute`): perform the action against the host.
//! - **render**: produce the equivalent shell text, either as a bare script
//!   line ([`Step::render_script_line`]) or as a container recipe directive
//!   ([`Step::render_directive`]).
//!
//! Both renderings must stay behaviourally identical to direct execution:
//! sequences stop at the first failure, and a `cd` never leaks out of the
//! sequence that issued it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::StepError;

/// One unit of pipeline work, optionally described for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub description: Option<String>,
}

/// The closed set of step variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    Run(RunProcess),
    Move(MoveFile),
    MakeDirectory(PathBuf),
    ChangeDirectory(PathBuf),
    Remove(RemoveFiles),
    /// Children run in order; the working directory is restored afterwards.
    Sequence(Vec<Step>),
    /// Only meaningful inside a container recipe.
    Directive(Directive),
}

/// Run an external process with an environment overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProcess {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Run through `sudo` when the caller is not already privileged.
    pub elevated: bool,
}

/// Rename a file, optionally expanding `source` as a wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveFile {
    pub source: String,
    pub destination: PathBuf,
    pub expand: bool,
}

/// Remove files matching a set of wildcard patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveFiles {
    pub patterns: Vec<String>,
    pub recursive: bool,
    pub elevated: bool,
}

/// Container-build-only instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    From {
        image: String,
        label: Option<String>,
    },
    CopyFrom {
        label: String,
        source: PathBuf,
        destination: PathBuf,
    },
    Env {
        key: String,
        value: String,
    },
}

/// A rendered recipe block: optional comment plus one directive line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeEntry {
    pub comment: Option<String>,
    pub directive: String,
}

impl Step {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn run<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RunProcess::new(argv).into()
    }

    pub fn move_file(source: impl AsRef<Path>, destination: impl Into<PathBuf>) -> Self {
        Self::new(StepKind::Move(MoveFile {
            source: source.as_ref().to_string_lossy().into_owned(),
            destination: destination.into(),
            expand: false,
        }))
    }

    /// Move every match of `pattern` to `destination`.
    pub fn move_matching(pattern: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self::new(StepKind::Move(MoveFile {
            source: pattern.into(),
            destination: destination.into(),
            expand: true,
        }))
    }

    pub fn make_dir(path: impl Into<PathBuf>) -> Self {
        Self::new(StepKind::MakeDirectory(path.into()))
    }

    pub fn change_dir(path: impl Into<PathBuf>) -> Self {
        Self::new(StepKind::ChangeDirectory(path.into()))
    }

    pub fn sequence(steps: Vec<Step>) -> Self {
        Self::new(StepKind::Sequence(steps))
    }

    pub fn directive(directive: Directive) -> Self {
        Self::new(StepKind::Directive(directive))
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Render as one line of shell script.
    pub fn render_script_line(&self) -> Result<String, StepError> {
        match &self.kind {
            StepKind::Run(run) => run.render(),
            StepKind::Move(mv) => {
                let source = if mv.expand {
                    escape_pattern(&mv.source)
                } else {
                    quote_word(&mv.source)
                };
                Ok(format!("mv {source} {}", quote_path(&mv.destination)))
            }
            StepKind::MakeDirectory(path) => Ok(format!("mkdir -p {}", quote_path(path))),
            StepKind::ChangeDirectory(path) => Ok(format!("cd {}", quote_path(path))),
            StepKind::Remove(remove) => Ok(remove.render()),
            StepKind::Sequence(children) => render_sequence(children),
            StepKind::Directive(directive) => Err(StepError::ContainerOnly {
                directive: directive.render(),
            }),
        }
    }

    /// Render as a container recipe entry (`RUN <line>` unless this is a directive).
    pub fn render_directive(&self) -> Result<RecipeEntry, StepError> {
        let directive = match &self.kind {
            StepKind::Directive(directive) => directive.render(),
            _ => format!("RUN {}", self.render_script_line()?),
        };
        Ok(RecipeEntry {
            comment: self.description.clone(),
            directive,
        })
    }
}

impl RunProcess {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            elevated: false,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// Reject overlay keys that a shell would not accept as `KEY=VALUE`.
    pub fn validate_env(&self) -> Result<(), StepError> {
        match self.env.keys().find(|key| !is_identifier(key)) {
            Some(key) => Err(StepError::InvalidEnvKey { key: key.clone() }),
            None => Ok(()),
        }
    }

    /// `KEY=VALUE ... argv...`, prefixed with `sudo` when elevated.
    fn render(&self) -> Result<String, StepError> {
        self.validate_env()?;
        if self.argv.is_empty() {
            return Err(StepError::EmptyCommand);
        }
        let mut words = Vec::with_capacity(self.env.len() + self.argv.len() + 1);
        if self.elevated {
            words.push("sudo".to_string());
        }
        for (key, value) in &self.env {
            words.push(format!("{key}={}", quote_word(value)));
        }
        words.extend(self.argv.iter().map(|arg| quote_word(arg)));
        Ok(words.join(" "))
    }
}

impl From<RunProcess> for Step {
    fn from(run: RunProcess) -> Self {
        Step::new(StepKind::Run(run))
    }
}

impl RemoveFiles {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            recursive: false,
            elevated: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    fn render(&self) -> String {
        let mut words = Vec::new();
        if self.elevated {
            words.push("sudo".to_string());
        }
        words.push("rm".to_string());
        words.push(if self.recursive { "-rf" } else { "-f" }.to_string());
        words.extend(self.patterns.iter().map(|pattern| escape_pattern(pattern)));
        words.join(" ")
    }
}

impl From<RemoveFiles> for Step {
    fn from(remove: RemoveFiles) -> Self {
        Step::new(StepKind::Remove(remove))
    }
}

impl Directive {
    pub fn render(&self) -> String {
        match self {
            Directive::From {
                image,
                label: Some(label),
            } => format!("FROM {image} AS {label}"),
            Directive::From { image, label: None } => format!("FROM {image}"),
            Directive::CopyFrom {
                label,
                source,
                destination,
            } => format!(
                "COPY --from={label} {} {}",
                escape_copy_path(source),
                escape_copy_path(destination)
            ),
            Directive::Env { key, value } => format!("ENV {key}={}", quote_word(value)),
        }
    }
}

/// Children joined with `&&` so the shell stops at the first failure.
///
/// Nested sequences run in a subshell to keep their `cd` scoped.
fn render_sequence(children: &[Step]) -> Result<String, StepError> {
    if children.is_empty() {
        return Ok("true".to_string());
    }
    let mut lines = Vec::with_capacity(children.len());
    for child in children {
        let line = child.render_script_line()?;
        if matches!(child.kind, StepKind::Sequence(_)) {
            lines.push(format!("( {line} )"));
        } else {
            lines.push(line);
        }
    }
    Ok(lines.join(" && "))
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn is_shell_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-'
        )
}

/// Single-quote any word containing a character the shell would interpret.
fn quote_word(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        return word.to_string();
    }
    let mut quoted = String::from("'");
    for ch in word.chars() {
        if ch == '\'' {
            quoted.push_str("'\"'\"'");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Backslash-escape shell metacharacters but keep `* ? [ ]` for the shell to expand.
fn escape_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if !is_shell_safe(ch) && !matches!(ch, '*' | '?' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn quote_path(path: &Path) -> String {
    quote_word(&path.to_string_lossy())
}

/// `COPY` arguments are not shell-parsed; only spaces need escaping.
fn escape_copy_path(path: &Path) -> String {
    path.to_string_lossy().replace(' ', "\\ ")
}
