//! Per-iteration instruction handed to the agent.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

/// What the previous attempt left behind, relative to the experiment directory.
#[derive(Debug, Clone, Serialize)]
pub struct PreviousAttempt {
    pub index: u32,
    /// Human-readable outcome, e.g. "exited with code 0".
    pub outcome: String,
    pub stdout_path: String,
    pub stderr_path: String,
}

#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub index: u32,
    pub max_iterations: u32,
    pub artifact: &'a str,
    pub required_files: &'a [String],
    pub allowed_tools: &'a [String],
    pub previous: Option<PreviousAttempt>,
}

/// Template engine wrapper around minijinja.
pub struct PromptRenderer {
    env: Environment<'static>,
    source: String,
}

impl PromptRenderer {
    /// Build a renderer from `custom`, or from the built-in template when `None`.
    ///
    /// The template is compiled once here so syntax errors surface before the
    /// first attempt.
    pub fn new(custom: Option<&str>) -> Result<Self> {
        let source = custom.unwrap_or(ITERATION_TEMPLATE).to_string();
        {
            let probe = Environment::new();
            probe
                .template_from_str(&source)
                .context("compile prompt template")?;
        }
        Ok(Self {
            env: Environment::new(),
            source,
        })
    }

    pub fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let rendered = self
            .env
            .render_str(
                &self.source,
                context! {
                    index => input.index,
                    max_iterations => input.max_iterations,
                    artifact => input.artifact,
                    required_files => input.required_files,
                    allowed_tools => input.allowed_tools,
                    previous => &input.previous,
                },
            )
            .context("render prompt template")?;
        Ok(rendered.trim().to_string())
    }
}
