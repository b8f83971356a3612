//! System instructions for the analysis model

use crate::sandbox::EnvironmentState;

const ANALYSIS_SYSTEM_PROMPT: &str = include_str!("prompts/analysis_system.md");

/// Placeholder replaced with the environment description
pub const VARIABLES_PLACEHOLDER: &str = "{notebook_variables}";

/// Fixed instructions with the current environment substituted in.
///
/// Plain text replacement: the instructions contain literal braces (the
/// f-string example) that a template engine would try to interpret.
pub fn build_system_prompt(environment: &EnvironmentState) -> String {
    render_instructions(ANALYSIS_SYSTEM_PROMPT, environment)
}

pub fn render_instructions(template: &str, environment: &EnvironmentState) -> String {
    template.replace(VARIABLES_PLACEHOLDER, &environment.render())
}
