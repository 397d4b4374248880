//! Two-stage container recipe synthesis.
//!
//! Stage one (`build`) runs the whole pipeline plus packaging on the base
//! image. Stage two starts again from the base image, copies only the package
//! out of stage one and installs it.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::pipeline::{Pipeline, Target, apt_install, apt_install_steps};
use crate::core::program::ProgramDescription;
use crate::core::session::BuildSession;
use crate::core::step::{Directive, RecipeEntry, RemoveFiles, RunProcess, Step};

const RECIPE_TEMPLATE: &str = include_str!("templates/recipe.j2");

/// Label of the first (build) stage.
pub const BUILD_STAGE: &str = "build";

const PACKAGE_INDEX_CACHE: &str = "/var/lib/apt/lists/*";

/// An ordered list of recipe entries, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    entries: Vec<RecipeEntry>,
}

#[derive(Debug, Serialize)]
struct EntryView<'a> {
    comment: Vec<&'a str>,
    directive: &'a str,
}

impl Recipe {
    pub fn from_steps(steps: &[Step]) -> Result<Self> {
        let entries = steps
            .iter()
            .map(Step::render_directive)
            .collect::<Result<Vec<_>, _>>()
            .context("render recipe step")?;
        Ok(Self { entries })
    }

    /// Blank-line separated `# comment` + directive blocks.
    pub fn render(&self) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("recipe", RECIPE_TEMPLATE)
            .context("load recipe template")?;
        let views: Vec<EntryView<'_>> = self
            .entries
            .iter()
            .map(|entry| EntryView {
                comment: entry
                    .comment
                    .as_deref()
                    .map(|comment| comment.lines().collect())
                    .unwrap_or_default(),
                directive: &entry.directive,
            })
            .collect();
        let rendered = env
            .get_template("recipe")?
            .render(context! { entries => views })
            .context("render recipe template")?;
        Ok(rendered)
    }
}

/// Every step of the two-stage recipe, in order.
pub fn recipe_steps(
    program: &ProgramDescription,
    session: &BuildSession,
    locale: &str,
) -> Vec<Step> {
    let pipeline = Pipeline::new(program, session, Target::Container);
    let artifact = pipeline.artifact_path();

    let mut steps = vec![
        Step::directive(Directive::From {
            image: session.base_image().to_string(),
            label: Some(BUILD_STAGE.to_string()),
        })
        .describe(format!("Build {} {}", program.name, session.version())),
        apt_install(&["checkinstall".to_string()], false).describe("Install packaging utility"),
    ];
    steps.extend(pipeline.stages());
    steps.push(pipeline.package());
    steps.push(clear_package_index().describe("Clear package index cache"));

    steps.push(
        Step::directive(Directive::From {
            image: session.base_image().to_string(),
            label: None,
        })
        .describe("Runtime image"),
    );
    steps.push(Step::directive(Directive::CopyFrom {
        label: BUILD_STAGE.to_string(),
        source: artifact.clone(),
        destination: artifact.clone(),
    }));
    let mut install = apt_install_steps(&[artifact.to_string_lossy().into_owned()], false);
    install.push(clear_package_index());
    steps.push(Step::sequence(install).describe(format!("Install {}", session.package_name())));
    steps.extend(locale_steps(locale));
    steps
}

/// Synthesize and render the recipe text.
pub fn render_recipe(
    program: &ProgramDescription,
    session: &BuildSession,
    locale: &str,
) -> Result<String> {
    Recipe::from_steps(&recipe_steps(program, session, locale))?.render()
}

fn clear_package_index() -> Step {
    RemoveFiles::new([PACKAGE_INDEX_CACHE]).recursive(true).into()
}

fn locale_steps(locale: &str) -> Vec<Step> {
    vec![
        Step::sequence(vec![
            apt_install(&["locales".to_string()], false),
            Step::run(["locale-gen", locale]),
            RunProcess::new(["update-locale".to_string(), format!("LANG={locale}")]).into(),
            clear_package_index(),
        ])
        .describe(format!("Configure locale {locale}")),
        Step::directive(Directive::Env {
            key: "LANG".to_string(),
            value: locale.to_string(),
        }),
        Step::directive(Directive::Env {
            key: "LC_ALL".to_string(),
            value: locale.to_string(),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::program::ProgramFile;
    use crate::core::session::SessionOptions;
    use crate::core::version::Release;

    fn fixture() -> (ProgramDescription, BuildSession) {
        let file: ProgramFile = toml::from_str(
            r#"
            [program]
            name = "foo"
            build_system = "cmake"
            source_repository = "https://example.com/foo.git"
            tag_pattern = '^v(?P<version>[\d.]+)$'

            [dependencies]
            build = ["git", "cmake", "ninja-build"]
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
                jobs: Some(4),
                base_image: "ubuntu:22.04".to_string(),
                install_prefix: PathBuf::from("/usr/local"),
                package_name: None,
                package_version: None,
            },
            8,
        )
        .expect("session");
        (program, session)
    }

    #[test]
    fn renders_comment_directive_blocks() {
        let recipe = Recipe::from_steps(&[
            Step::directive(Directive::From {
                image: "ubuntu:22.04".to_string(),
                label: None,
            })
            .describe("Base"),
            Step::run(["echo", "hi"]),
        ])
        .expect("recipe");
        assert_eq!(
            recipe.render().expect("render"),
            "# Base\nFROM ubuntu:22.04\n\nRUN echo hi\n"
        );
    }

    #[test]
    fn two_stage_layout() {
        let (program, session) = fixture();
        let text = render_recipe(&program, &session, "en_US.UTF-8").expect("render");
        let directives: Vec<&str> = text
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.split_whitespace().next().unwrap_or_default())
            .collect();
        assert_eq!(
            directives,
            vec![
                "FROM", "RUN", "RUN", "RUN", "RUN", "RUN", "RUN", "RUN", "RUN", "FROM", "COPY",
                "RUN", "RUN", "ENV", "ENV"
            ]
        );
        assert!(text.starts_with("# Build foo 1.2.3\nFROM ubuntu:22.04 AS build\n"));
        assert!(text.contains(
            "COPY --from=build /build/packages/foo_1.2.3.deb /build/packages/foo_1.2.3.deb"
        ));
        assert!(text.contains("RUN rm -rf /var/lib/apt/lists/*\n"));
        assert!(text.contains("ENV LC_ALL=en_US.UTF-8\n"));
    }

    #[test]
    fn packaging_tool_is_installed_before_pipeline() {
        let (program, session) = fixture();
        let text = render_recipe(&program, &session, "en_US.UTF-8").expect("render");
        let checkinstall = text.find("install -y checkinstall").expect("checkinstall");
        let clone = text.find("git clone").expect("clone");
        assert!(checkinstall < clone);
    }
}
