//! Per-run session state
//!
//! A `Session` is created fresh for every analysis and owned by exactly one
//! orchestrator run. Only its output directory outlives the run.

use crate::error::SetupError;
use crate::events::ExecutionOutcome;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Characters of the goal kept in the directory name
const DIR_GOAL_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the append-only conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    /// Root shared by all sessions; artifact paths are relative to it
    pub output_root: PathBuf,
    /// This session's own directory under `output_root`
    pub output_directory: PathBuf,
    pub created_at: DateTime<Local>,
    conversation: Vec<ConversationMessage>,
    round_count: u32,
    generated_artifacts: Vec<String>,
}

impl Session {
    /// Create the session directory and seed the conversation with the goal
    pub fn create(output_root: &Path, goal: &str, input_files: &[PathBuf]) -> Result<Self, SetupError> {
        let created_at = Local::now();
        let name = session_dir_name(goal, &created_at);
        let output_directory =
            create_unique_dir(output_root, &name).map_err(|source| SetupError::SessionDir {
                path: output_root.join(&name),
                source,
            })?;

        let mut session = Self {
            output_root: output_root.to_path_buf(),
            output_directory,
            created_at,
            conversation: Vec::new(),
            round_count: 0,
            generated_artifacts: Vec::new(),
        };
        session.push(ConversationMessage::user(initial_prompt(goal, input_files)));
        Ok(session)
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.conversation.push(message);
    }

    pub fn conversation(&self) -> &[ConversationMessage] {
        &self.conversation
    }

    /// Start the next round and return its number
    pub fn begin_round(&mut self) -> u32 {
        self.round_count += 1;
        self.round_count
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn record_artifact(&mut self, relative_path: String) {
        self.generated_artifacts.push(relative_path);
    }

    pub fn artifacts(&self) -> &[String] {
        &self.generated_artifacts
    }

    /// Conversation replayed verbatim as the prompt: `role: content` blocks
    pub fn transcript(&self) -> String {
        self.conversation
            .iter()
            .map(|msg| format!("{}: {}", msg.role, msg.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn initial_prompt(goal: &str, input_files: &[PathBuf]) -> String {
    let mut prompt = format!("User goal: {}", goal);
    if !input_files.is_empty() {
        let files: Vec<String> = input_files.iter().map(|p| p.display().to_string()).collect();
        prompt.push_str(&format!("\nData files: {}", files.join(", ")));
    }
    prompt
}

/// Directory name derived from the goal plus a timestamp suffix.
///
/// Non-alphanumeric characters become `_`; letters from any script are kept.
pub fn session_dir_name(goal: &str, created_at: &DateTime<Local>) -> String {
    let mut slug = String::new();
    for c in goal.trim().chars().take(DIR_GOAL_CHARS) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "analysis" } else { slug };
    format!("{}_{}", slug, created_at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Create a fresh directory `parent/name`, or `name_1`, `name_2`... when taken.
///
/// `create_dir` fails on an existing entry, so two runs never share a directory.
pub fn create_unique_dir(parent: &Path, name: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(parent)?;
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            parent.join(name)
        } else {
            parent.join(format!("{}_{}", name, attempt))
        };
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Feedback message shown to the model after an execution
pub fn format_feedback(outcome: &ExecutionOutcome) -> String {
    let mut text = String::from("Code execution feedback:\n");
    if outcome.succeeded {
        text.push_str("Status: success\n");
    } else {
        text.push_str("Status: failed\n");
    }

    if outcome.stdout.trim().is_empty() {
        text.push_str("Output: (none)\n");
    } else {
        text.push_str(&format!("Output:\n{}\n", outcome.stdout.trim_end()));
    }

    if let Some(error) = &outcome.error {
        text.push_str(&format!("Error:\n{}\n", error));
    }
    if let Some(image) = &outcome.artifact_path {
        text.push_str(&format!("Image saved: {}\n", image));
    }
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dir_name_is_deterministic() {
        let at = Local.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            session_dir_name("Compute the mean of column X!", &at),
            "Compute_the_mean_of_column_X_20260301_093000_000"
        );
        assert_eq!(
            session_dir_name("Compute the mean of column X!", &at),
            session_dir_name("Compute the mean of column X!", &at)
        );
    }

    #[test]
    fn test_dir_name_keeps_non_latin_letters() {
        let at = Local.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert!(session_dir_name("分析销售数据", &at).starts_with("分析销售数据_"));
        assert!(session_dir_name("  ???  ", &at).starts_with("analysis_"));
    }

    #[test]
    fn test_create_seeds_conversation() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(
            root.path(),
            "compute the mean of column X",
            &[PathBuf::from("data.csv"), PathBuf::from("extra.csv")],
        )
        .unwrap();

        assert!(session.output_directory.is_dir());
        assert!(session.output_directory.starts_with(root.path()));
        assert_eq!(session.round_count(), 0);
        assert_eq!(session.conversation().len(), 1);
        assert_eq!(
            session.transcript(),
            "user: User goal: compute the mean of column X\nData files: data.csv, extra.csv"
        );
    }

    #[test]
    fn test_unique_dir_skips_taken_names() {
        let root = tempfile::tempdir().unwrap();
        let parent = root.path().join("out");

        let first = create_unique_dir(&parent, "goal_20260301_093000_000").unwrap();
        let second = create_unique_dir(&parent, "goal_20260301_093000_000").unwrap();
        let third = create_unique_dir(&parent, "goal_20260301_093000_000").unwrap();

        assert_eq!(first, parent.join("goal_20260301_093000_000"));
        assert_eq!(second, parent.join("goal_20260301_093000_000_1"));
        assert_eq!(third, parent.join("goal_20260301_093000_000_2"));
        assert!(third.is_dir());
    }

    #[test]
    fn test_same_goal_sessions_get_separate_dirs() {
        let root = tempfile::tempdir().unwrap();
        let sessions: Vec<Session> = (0..5)
            .map(|_| Session::create(root.path(), "same goal", &[]).unwrap())
            .collect();

        for (i, a) in sessions.iter().enumerate() {
            assert!(a.output_directory.is_dir());
            for b in &sessions[i + 1..] {
                assert_ne!(a.output_directory, b.output_directory);
            }
        }
    }

    #[test]
    fn test_transcript_preserves_order() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::create(root.path(), "goal", &[]).unwrap();
        session.push(ConversationMessage::assistant("action: generate_code"));
        session.push(ConversationMessage::user("Code execution feedback:\nStatus: success"));
        assert_eq!(
            session.transcript(),
            "user: User goal: goal\n\nassistant: action: generate_code\n\nuser: Code execution feedback:\nStatus: success"
        );
    }

    #[test]
    fn test_format_feedback() {
        let ok = ExecutionOutcome::success("4.2\n");
        assert_eq!(
            format_feedback(&ok),
            "Code execution feedback:\nStatus: success\nOutput:\n4.2"
        );

        let failed = ExecutionOutcome::failure("", "KeyError: 'X'");
        let text = format_feedback(&failed);
        assert!(text.contains("Status: failed"));
        assert!(text.contains("Output: (none)"));
        assert!(text.ends_with("Error:\nKeyError: 'X'"));
    }
}
