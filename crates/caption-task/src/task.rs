use crate::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptionOutcome {
    Captioned { caption: String },
    Failed { reason: String },
}

/// The caption (or failure) for one image of a batch. Serialized results always carry
/// `caption`, failures render it as `"Error: <reason>"` next to `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CaptionResult {
    pub filename: String,
    pub engine_used: String,
    #[serde(flatten)]
    pub outcome: CaptionOutcome,
}

impl CaptionResult {
    pub fn captioned(filename: &str, engine_id: &str, caption: String) -> Self {
        Self {
            filename: filename.to_string(),
            engine_used: engine_id.to_string(),
            outcome: CaptionOutcome::Captioned { caption },
        }
    }

    pub fn failed(filename: &str, engine_id: &str, reason: String) -> Self {
        Self {
            filename: filename.to_string(),
            engine_used: engine_id.to_string(),
            outcome: CaptionOutcome::Failed { reason },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CaptionOutcome::Failed { .. })
    }

    /// Single-string rendering for clients that show failures inline.
    pub fn caption_text(&self) -> String {
        match &self.outcome {
            CaptionOutcome::Captioned { caption } => caption.clone(),
            CaptionOutcome::Failed { reason } => format!("Error: {}", reason),
        }
    }
}

impl Serialize for CaptionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CaptionResult", 5)?;
        state.serialize_field("filename", &self.filename)?;
        state.serialize_field("engine_used", &self.engine_used)?;
        match &self.outcome {
            CaptionOutcome::Captioned { caption } => {
                state.serialize_field("outcome", "captioned")?;
                state.serialize_field("caption", caption)?;
            }
            CaptionOutcome::Failed { reason } => {
                state.serialize_field("outcome", "failed")?;
                state.serialize_field("caption", &self.caption_text())?;
                state.serialize_field("reason", reason)?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub status: TaskStatus,
    pub total: usize,
    pub current: usize,
    pub progress_pct: u32,
    pub results: Vec<CaptionResult>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub engine_id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(engine_id: &str, total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Processing,
            total,
            current: 0,
            progress_pct: 0,
            results: vec![],
            error: None,
            message: None,
            engine_id: engine_id.to_string(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
    }

    /// Append the next result in input order and advance progress.
    pub fn record(&mut self, result: CaptionResult) {
        self.results.push(result);
        self.current = (self.current + 1).min(self.total);
        self.progress_pct = if self.total == 0 {
            100
        } else {
            (self.current * 100 / self.total) as u32
        };
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.message = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Error;
        self.message = Some(format!("Error: {}", error));
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
