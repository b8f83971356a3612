//! AnalysisAgent - the round loop
//!
//! Each run gets a fresh `Session` and a fresh sandbox, then repeats:
//! 1. Call the model (streaming) with the transcript and rendered instructions
//! 2. Parse the accumulated text into a `ParsedAction`
//! 3. Run generated code and feed the outcome back into the conversation
//!
//! until the model reports completion, the round budget runs out, or the
//! model or sandbox fails. Every exit path ends with the channel sentinel.

use super::AgentSettings;
use crate::channel::{event_channel, EventReceiver, EventSender};
use crate::error::{AgentError, SetupError};
use crate::events::{ExecutionOutcome, ReportContent, StreamEvent};
use crate::parser::{self, ParsedAction};
use crate::prompt::build_system_prompt;
use crate::provider::ModelClient;
use crate::sandbox::{self, CodeSandbox, SandboxLauncher, SESSION_DIR_VARIABLE};
use crate::session::{format_feedback, ConversationMessage, Session};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model sent `analysis_complete`
    Completed,
    /// The round budget ran out first
    Truncated,
    /// Setup, the model or the sandbox failed
    Failed,
}

/// What is left of a session once its run is over
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub rounds: u32,
    /// Artifact paths relative to the output root, in discovery order
    pub artifacts: Vec<String>,
    /// None when the session could not be created
    pub output_directory: Option<PathBuf>,
}

enum RoundResult {
    Continue,
    Finished,
}

/// Drives analysis runs. Cheap to clone; holds no per-run state.
#[derive(Clone)]
pub struct AnalysisAgent {
    model: Arc<dyn ModelClient>,
    launcher: Arc<dyn SandboxLauncher>,
    settings: AgentSettings,
}

impl AnalysisAgent {
    pub fn new(model: Arc<dyn ModelClient>, launcher: Arc<dyn SandboxLauncher>, settings: AgentSettings) -> Self {
        Self {
            model,
            launcher,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Start a run on a background task and hand back its events.
    ///
    /// The run does not stop if the receiver is dropped; it plays out to one of
    /// its terminal conditions.
    pub fn run(&self, goal: impl Into<String>, input_files: Vec<PathBuf>) -> EventReceiver {
        let (tx, rx) = event_channel();
        let agent = self.clone();
        let goal = goal.into();
        tokio::spawn(async move {
            agent.drive(&goal, &input_files, tx).await;
        });
        rx
    }

    /// Run the loop inline, sending events to `events`
    pub async fn drive(&self, goal: &str, input_files: &[PathBuf], mut events: EventSender) -> RunSummary {
        let span = tracing::info_span!("analysis_run", run_id = %Uuid::new_v4());
        let summary = self
            .execute(goal, input_files, &mut events)
            .instrument(span.clone())
            .await;
        tracing::info!(
            parent: &span,
            outcome = ?summary.outcome,
            rounds = summary.rounds,
            artifacts = summary.artifacts.len(),
            "Analysis run finished"
        );
        events.finish();
        summary
    }

    async fn execute(&self, goal: &str, input_files: &[PathBuf], events: &mut EventSender) -> RunSummary {
        let (mut session, mut sandbox) = match self.start_session(goal, input_files).await {
            Ok(started) => started,
            Err(e) => {
                let e = AgentError::from(e);
                tracing::error!(error = %e, "Could not start analysis session");
                events.send(StreamEvent::error(e.to_string()));
                return RunSummary {
                    outcome: RunOutcome::Failed,
                    rounds: 0,
                    artifacts: Vec::new(),
                    output_directory: None,
                };
            }
        };

        tracing::info!(
            session_dir = %session.output_directory.display(),
            max_rounds = self.settings.max_rounds,
            "Analysis session started"
        );
        events.send(StreamEvent::log(format!(
            "Session directory: {}",
            session.output_directory.display()
        )));

        let outcome = self.round_loop(&mut session, sandbox.as_mut(), events).await;

        RunSummary {
            outcome,
            rounds: session.round_count(),
            artifacts: session.artifacts().to_vec(),
            output_directory: Some(session.output_directory.clone()),
        }
    }

    async fn start_session(
        &self,
        goal: &str,
        input_files: &[PathBuf],
    ) -> Result<(Session, Box<dyn CodeSandbox>), SetupError> {
        let session = Session::create(&self.settings.output_dir, goal, input_files)?;
        let mut sandbox = self.launcher.launch(&session.output_directory).await?;

        let session_dir = sandbox::absolutize(&session.output_directory);
        sandbox
            .bind(
                SESSION_DIR_VARIABLE,
                serde_json::Value::String(session_dir.display().to_string()),
            )
            .await?;

        Ok((session, sandbox))
    }

    async fn round_loop(
        &self,
        session: &mut Session,
        sandbox: &mut dyn CodeSandbox,
        events: &mut EventSender,
    ) -> RunOutcome {
        let max_rounds = self.settings.max_rounds;

        while session.round_count() < max_rounds {
            let round = session.begin_round();
            tracing::info!(round, max_rounds, "Round started");
            events.send(StreamEvent::log(format!("Round {} of {}", round, max_rounds)));

            match self.play_round(round, session, sandbox, events).await {
                Ok(RoundResult::Continue) => {}
                Ok(RoundResult::Finished) => return RunOutcome::Completed,
                Err(e) => {
                    tracing::error!(round, error = %e, "Round failed; ending run");
                    events.send(StreamEvent::error(e.to_string()));
                    return RunOutcome::Failed;
                }
            }
        }

        tracing::warn!(max_rounds, "Round budget exhausted before analysis_complete");
        events.send(StreamEvent::log(format!(
            "Reached the maximum number of rounds ({})",
            max_rounds
        )));
        events.send(StreamEvent::Report {
            content: ReportContent {
                text: truncation_report(max_rounds),
                images: session.artifacts().to_vec(),
            },
        });
        RunOutcome::Truncated
    }

    async fn play_round(
        &self,
        round: u32,
        session: &mut Session,
        sandbox: &mut dyn CodeSandbox,
        events: &mut EventSender,
    ) -> Result<RoundResult, AgentError> {
        let environment = sandbox.describe_environment().await?;
        let instructions = build_system_prompt(&environment);
        let transcript = session.transcript();
        tracing::debug!(round, variables = environment.variables.len(), prompt = %transcript, "Calling model");

        let mut stream = self.model.call(&transcript, &instructions).await?;
        let mut response = String::new();
        while let Some(fragment) = stream.next().await {
            response.push_str(&fragment?);
            events.send(StreamEvent::step_in_progress(round, response.clone()));
        }
        tracing::debug!(round, response = %response, "Model response complete");

        let thought = parser::parse_thought(&response);

        match parser::parse(&response) {
            ParsedAction::AnalysisComplete { report_text } => {
                tracing::info!(round, artifacts = session.artifacts().len(), "Analysis complete");
                events.send(StreamEvent::Step {
                    round,
                    thought,
                    code: String::new(),
                    execution_result: None,
                });
                events.send(StreamEvent::Report {
                    content: ReportContent {
                        text: report_text,
                        images: session.artifacts().to_vec(),
                    },
                });
                Ok(RoundResult::Finished)
            }
            ParsedAction::GenerateCode { code, .. } if !code.trim().is_empty() => {
                let outcome = self.execute_code(round, &code, session, sandbox).await?;
                let feedback = format_feedback(&outcome);
                events.send(StreamEvent::Step {
                    round,
                    thought,
                    code,
                    execution_result: Some(outcome),
                });
                session.push(ConversationMessage::assistant(response));
                session.push(ConversationMessage::user(feedback));
                Ok(RoundResult::Continue)
            }
            ParsedAction::GenerateCode { .. } => {
                tracing::warn!(round, "Model asked to run code but sent none");
                reject_round(round, thought, "Response is missing executable code", events);
                Ok(RoundResult::Continue)
            }
            ParsedAction::Invalid { reason } => {
                tracing::warn!(round, reason = %reason, "Unparseable model response");
                reject_round(round, thought, &reason, events);
                Ok(RoundResult::Continue)
            }
            ParsedAction::Unknown { raw_action } => {
                tracing::warn!(round, action = %raw_action, "Unknown action");
                reject_round(round, thought, &format!("Unknown action: {}", raw_action), events);
                Ok(RoundResult::Continue)
            }
        }
    }

    /// Run one fragment and pick up any images it announced
    async fn execute_code(
        &self,
        round: u32,
        code: &str,
        session: &mut Session,
        sandbox: &mut dyn CodeSandbox,
    ) -> Result<ExecutionOutcome, AgentError> {
        let mut outcome = sandbox.run(code).await?;

        if outcome.succeeded {
            let found: Vec<String> = sandbox::image_markers(&outcome.stdout)
                .into_iter()
                .filter_map(|path| {
                    sandbox::resolve_artifact(path, &session.output_directory, &session.output_root)
                })
                .collect();
            for artifact in found {
                tracing::info!(round, artifact = %artifact, "Artifact recorded");
                outcome.artifact_path = Some(artifact.clone());
                session.record_artifact(artifact);
            }
        }

        tracing::info!(
            round,
            success = outcome.succeeded,
            output_chars = outcome.stdout.len(),
            "Code executed"
        );
        Ok(outcome)
    }
}

// The round produced nothing runnable: record the reason, leave the
// conversation as it was.
fn reject_round(round: u32, thought: String, reason: &str, events: &mut EventSender) {
    events.send(StreamEvent::Step {
        round,
        thought,
        code: String::new(),
        execution_result: Some(ExecutionOutcome::failure("", reason)),
    });
}

/// Report text used when the budget runs out
pub fn truncation_report(max_rounds: u32) -> String {
    format!(
        "Analysis stopped: the maximum number of rounds ({}) was reached before the analysis completed.",
        max_rounds
    )
}
