use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use super::state::{PipelineState, StateTransition};
use crate::ingestor::{AcquireReport, ChannelWriteReport, CuratedReport, ParseReport, WriteReport};
use crate::models::{Channel, DayKey, ProgramView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    /// Incremental refresh of a single day
    Refresh,
    /// Purge and reload everything from the canonical source
    Rebuild,
}

/// Everything a run did, stage by stage
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Days the run wrote buckets for (the requested day for a refresh)
    pub days: Vec<DayKey>,
    pub state: PipelineState,
    pub history: Vec<StateTransition>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub purged: IndexMap<String, usize>,
    pub acquire: Option<AcquireReport>,
    pub parse: Option<ParseReport>,
    pub channels: Option<ChannelWriteReport>,
    pub programs: Option<WriteReport>,
    pub curated: Option<CuratedReport>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            days: Vec::new(),
            state: PipelineState::Idle,
            history: Vec::new(),
            purged: IndexMap::new(),
            acquire: None,
            parse: None,
            channels: None,
            programs: None,
            curated: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }

    /// Failed chunk commits across every write stage
    pub fn failed_commits(&self) -> usize {
        self.channels.as_ref().map_or(0, |c| c.failed_commits.len())
            + self.programs.as_ref().map_or(0, |p| p.failed_commits.len())
            + self.curated.as_ref().map_or(0, |c| c.failed_commits.len())
    }

    pub(crate) fn finish(&mut self, state: PipelineState, history: Vec<StateTransition>) {
        let finished_at = Utc::now();
        self.state = state;
        self.history = history;
        self.duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.finished_at = Some(finished_at);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSchedule {
    pub channel_id: String,
    pub channel: Channel,
    pub programs: Vec<ProgramView>,
}

/// Stored programs for one day, grouped by channel
#[derive(Debug, Clone, Serialize)]
pub struct DaySchedule {
    pub day: DayKey,
    /// Whether the read had to run a refresh first
    pub refreshed: bool,
    pub channels: Vec<ChannelSchedule>,
}

impl DaySchedule {
    pub fn program_count(&self) -> usize {
        self.channels.iter().map(|c| c.programs.len()).sum()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSchedule> {
        self.channels.iter().find(|c| c.channel.name == name)
    }
}
