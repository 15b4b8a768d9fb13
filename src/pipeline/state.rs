//! Run state machine
//!
//! ```text
//! Idle -> Acquiring -> Parsing -> Classifying -> Writing -> Done
//!            \___________\____________\____________\-----> Failed
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumIter};
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Acquiring,
    Parsing,
    Classifying,
    Writing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Acquiring)
            | (Acquiring, Parsing)
            | (Parsing, Classifying)
            | (Classifying, Writing)
            | (Writing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Broadcast to subscribers on every transition
#[derive(Debug, Clone, Serialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Tracks one run's state and history, publishing each transition
pub struct RunStateTracker {
    run_id: Uuid,
    current: PipelineState,
    history: Vec<StateTransition>,
    progress_tx: broadcast::Sender<PipelineProgress>,
}

impl RunStateTracker {
    pub fn new(run_id: Uuid, progress_tx: broadcast::Sender<PipelineProgress>) -> Self {
        Self {
            run_id,
            current: PipelineState::Idle,
            history: Vec::new(),
            progress_tx,
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StateTransition> {
        self.history
    }

    pub fn advance(&mut self, next: PipelineState, message: impl Into<String>) -> AppResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(AppError::internal(format!(
                "invalid pipeline transition from {} to {}",
                self.current, next
            )));
        }

        let message = message.into();
        if next == PipelineState::Failed {
            error!("Run {} failed while {}: {}", self.run_id, self.current, message);
        } else {
            info!("Run {} entering {}: {}", self.run_id, next, message);
        }

        let at = Utc::now();
        self.history.push(StateTransition {
            from: self.current,
            to: next,
            at,
            message: message.clone(),
        });
        self.current = next;

        // No subscribers is not an error
        let _ = self.progress_tx.send(PipelineProgress {
            run_id: self.run_id,
            state: next,
            message,
            at,
        });
        Ok(())
    }

    /// Move to `Failed` unless the run already finished
    pub fn fail(&mut self, reason: &AppError) {
        if !self.current.is_terminal() {
            let _ = self.advance(PipelineState::Failed, reason.to_string());
        }
    }
}
