//! Analysis event types
//!
//! These events are emitted by the orchestrator during a run and consumed by
//! whatever sits on the other end of the channel (CLI, an SSE endpoint). This
//! is the ONLY way a run communicates with the outside world.

use serde::{Deserialize, Serialize, Serializer};

/// Events emitted during an analysis run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Progress note for the human
    Log { content: String },

    /// One round's state. Re-emitted while the model streams (thought grows,
    /// code and execution_result empty), then once more finalized.
    Step {
        round: u32,
        thought: String,
        code: String,
        #[serde(serialize_with = "serialize_outcome")]
        execution_result: Option<ExecutionOutcome>,
    },

    /// Final (or truncated) report
    Report { content: ReportContent },

    /// Fatal error; the run is over
    Error { content: String },
}

impl StreamEvent {
    pub fn log(content: impl Into<String>) -> Self {
        StreamEvent::Log {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        StreamEvent::Error {
            content: content.into(),
        }
    }

    /// In-progress step carrying only the accumulated model text
    pub fn step_in_progress(round: u32, thought: impl Into<String>) -> Self {
        StreamEvent::Step {
            round,
            thought: thought.into(),
            code: String::new(),
            execution_result: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Log { .. } => "log",
            StreamEvent::Step { .. } => "step",
            StreamEvent::Report { .. } => "report",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Report body: narrative text plus the artifacts produced so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    pub text: String,
    /// Paths relative to the output root
    pub images: Vec<String>,
}

/// Result of running one code fragment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(rename = "output")]
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "image_url", skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            error: None,
            artifact_path: None,
        }
    }

    pub fn failure(stdout: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: stdout.into(),
            error: Some(error.into()),
            artifact_path: None,
        }
    }
}

// Absent outcomes go over the wire as `{}` so consumers can treat the field
// as always-an-object.
fn serialize_outcome<S: Serializer>(
    outcome: &Option<ExecutionOutcome>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match outcome {
        Some(outcome) => outcome.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

/// What travels through the channel: an event, or the end-of-stream sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(StreamEvent),
    End,
}

/// SSE frame marking the end of a run
pub const SSE_DONE: &str = "data: [DONE]\n\n";

impl StreamItem {
    /// Render as one Server-Sent Events frame
    pub fn to_sse(&self) -> String {
        match self {
            StreamItem::Event(event) => {
                let json = serde_json::to_string(event)
                    .unwrap_or_else(|e| format!(r#"{{"type":"error","content":"{}"}}"#, e));
                format!("data: {}\n\n", json)
            }
            StreamItem::End => SSE_DONE.to_string(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamItem::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_progress_step_has_empty_result_object() {
        let event = StreamEvent::step_in_progress(2, "thinking about it");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "step",
                "round": 2,
                "thought": "thinking about it",
                "code": "",
                "execution_result": {}
            })
        );
    }

    #[test]
    fn test_finalized_step_serializes_outcome_fields() {
        let mut outcome = ExecutionOutcome::success("IMAGE_PATH:/x/a.png\n");
        outcome.artifact_path = Some("sess/a.png".to_string());
        let event = StreamEvent::Step {
            round: 1,
            thought: "plot".to_string(),
            code: "plt.plot()".to_string(),
            execution_result: Some(outcome),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["execution_result"]["success"], json!(true));
        assert_eq!(value["execution_result"]["image_url"], json!("sess/a.png"));
        assert!(value["execution_result"].get("error").is_none());
    }

    #[test]
    fn test_report_wire_shape() {
        let event = StreamEvent::Report {
            content: ReportContent {
                text: "done".to_string(),
                images: vec!["s/chart.png".to_string()],
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "report", "content": {"text": "done", "images": ["s/chart.png"]}})
        );
    }

    #[test]
    fn test_sse_frames() {
        let frame = StreamItem::Event(StreamEvent::log("hi")).to_sse();
        assert_eq!(frame, "data: {\"type\":\"log\",\"content\":\"hi\"}\n\n");
        assert_eq!(StreamItem::End.to_sse(), SSE_DONE);
    }
}
