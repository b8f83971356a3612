//! Model response parsing
//!
//! Two strategies, tried in order:
//! 1. Structured: the response (or its ```yaml fenced block) is a YAML mapping
//!    with an `action` key.
//! 2. Heuristic: the first fenced code block in the raw text.
//!
//! The heuristic only runs when the structured parse yields no usable code, so
//! a response that is malformed but still carries code keeps the run going.

use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::OnceLock;

pub const ACTION_GENERATE_CODE: &str = "generate_code";
pub const ACTION_ANALYSIS_COMPLETE: &str = "analysis_complete";

/// What the model asked for this round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAction {
    GenerateCode { thought: String, code: String },
    AnalysisComplete { report_text: String },
    Invalid { reason: String },
    Unknown { raw_action: String },
}

fn yaml_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```ya?ml[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap())
}

fn any_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[^\n]*\n(.*?)```").unwrap())
}

/// Parse raw model text into an action. Never fails.
pub fn parse(raw_text: &str) -> ParsedAction {
    let Some(doc) = parse_document(raw_text) else {
        return match extract_code_block(raw_text) {
            Some(code) => {
                tracing::warn!("Response is not a structured document; recovered fenced code block");
                ParsedAction::GenerateCode {
                    thought: String::new(),
                    code,
                }
            }
            None => ParsedAction::Invalid {
                reason: "Response is not a structured action document and contains no code block"
                    .to_string(),
            },
        };
    };

    let action = match doc.get("action") {
        None | Some(Value::Null) => ACTION_GENERATE_CODE.to_string(),
        Some(Value::String(action)) => action.trim().to_string(),
        Some(other) => {
            return ParsedAction::Unknown {
                raw_action: scalar_text(other),
            }
        }
    };

    match action.as_str() {
        ACTION_ANALYSIS_COMPLETE => ParsedAction::AnalysisComplete {
            report_text: string_field(&doc, "final_report").unwrap_or_default(),
        },
        ACTION_GENERATE_CODE => {
            let thought = string_field(&doc, "thought").unwrap_or_default();
            let code = string_field(&doc, "code")
                .filter(|code| !code.trim().is_empty())
                .or_else(|| extract_code_block(raw_text));
            match code {
                Some(code) => ParsedAction::GenerateCode { thought, code },
                None => ParsedAction::Invalid {
                    reason: "Response is missing executable code".to_string(),
                },
            }
        }
        _ => ParsedAction::Unknown { raw_action: action },
    }
}

/// Best-effort `thought` field, used only to annotate events
pub fn parse_thought(raw_text: &str) -> String {
    parse_document(raw_text)
        .and_then(|doc| string_field(&doc, "thought"))
        .unwrap_or_default()
}

/// Parse the structured document, if there is one.
///
/// A ```yaml fenced block wins over the surrounding prose; otherwise the whole
/// text is tried. Only mappings count.
pub fn parse_document(raw_text: &str) -> Option<Mapping> {
    let source = yaml_fence()
        .captures(raw_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw_text);

    match serde_yaml::from_str::<Value>(source) {
        Ok(Value::Mapping(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Response is not valid YAML");
            None
        }
    }
}

/// First fenced code block, preferring ones tagged as Python.
///
/// Blocks tagged yaml/json are skipped: those hold the action document, not code.
pub fn extract_code_block(raw_text: &str) -> Option<String> {
    let mut fallback = None;
    for caps in any_fence().captures_iter(raw_text) {
        let lang = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if body.trim().is_empty() {
            continue;
        }
        match lang.as_str() {
            "python" | "py" | "python3" => return Some(body.trim_end().to_string()),
            "yaml" | "yml" | "json" => {}
            _ => {
                if fallback.is_none() {
                    fallback = Some(body.trim_end().to_string());
                }
            }
        }
    }
    fallback
}

fn string_field(doc: &Mapping, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::Null => None,
        value => Some(scalar_text(value)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_document() {
        let raw = r#"action: "generate_code"
thought: "Compute the mean of column X."
code: |
  import pandas as pd
  df = pd.read_csv("data.csv")
  print(df["X"].mean())
"#;
        match parse(raw) {
            ParsedAction::GenerateCode { thought, code } => {
                assert_eq!(thought, "Compute the mean of column X.");
                assert!(code.starts_with("import pandas as pd\n"));
                assert!(code.contains("print(df[\"X\"].mean())"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fenced_yaml_document_with_prose() {
        let raw = "Here is the next step.\n\n```yaml\naction: analysis_complete\nfinal_report: |\n  # Report\n  Mean of X is 4.2\n```\nThanks!";
        match parse(raw) {
            ParsedAction::AnalysisComplete { report_text } => {
                assert_eq!(report_text.trim_end(), "# Report\nMean of X is 4.2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_report_defaults_to_empty() {
        assert_eq!(
            parse("action: analysis_complete\n"),
            ParsedAction::AnalysisComplete {
                report_text: String::new()
            }
        );
    }

    #[test]
    fn test_missing_action_defaults_to_generate_code() {
        let action = parse("thought: look at columns\ncode: print(df.columns.tolist())\n");
        assert_eq!(
            action,
            ParsedAction::GenerateCode {
                thought: "look at columns".to_string(),
                code: "print(df.columns.tolist())".to_string()
            }
        );
    }

    #[test]
    fn test_code_field_absent_falls_back_to_fence() {
        let raw = "action: generate_code\nthought: |\n  Load data.\n  ```python\n  df = load()\n  ```\n";
        match parse(raw) {
            ParsedAction::GenerateCode { code, .. } => assert_eq!(code, "  df = load()"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unstructured_text_with_code_block_recovers() {
        let raw = "I will load the data first:\n```python\nimport pandas as pd\ndf = pd.read_csv('a.csv')\n```\nThen we continue.";
        assert_eq!(
            parse(raw),
            ParsedAction::GenerateCode {
                thought: String::new(),
                code: "import pandas as pd\ndf = pd.read_csv('a.csv')".to_string()
            }
        );
    }

    #[test]
    fn test_no_structure_no_code_is_invalid() {
        let action = parse("I am not sure what to do next, sorry: {[ unbalanced");
        assert!(matches!(action, ParsedAction::Invalid { .. }));

        let action = parse("just some prose");
        assert!(matches!(action, ParsedAction::Invalid { .. }));
    }

    #[test]
    fn test_generate_code_with_empty_code_is_invalid() {
        let action = parse("action: generate_code\nthought: hmm\ncode: \"\"\n");
        assert_eq!(
            action,
            ParsedAction::Invalid {
                reason: "Response is missing executable code".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_action_keeps_literal() {
        assert_eq!(
            parse("action: ask_user\nquestion: which column?\n"),
            ParsedAction::Unknown {
                raw_action: "ask_user".to_string()
            }
        );
    }

    #[test]
    fn test_python_fence_preferred_over_untagged() {
        let raw = "```\nsome output\n```\n\n```python\nprint(1)\n```";
        assert_eq!(extract_code_block(raw).as_deref(), Some("print(1)"));
        assert_eq!(extract_code_block("```yaml\na: 1\n```"), None);
    }

    #[test]
    fn test_parse_thought_best_effort() {
        assert_eq!(parse_thought("action: generate_code\nthought: plan\n"), "plan");
        assert_eq!(parse_thought("not yaml: [oops"), "");
    }
}
