//! Run orchestration: state machine, reports and the [`Pipeline`] itself

pub mod orchestrator;
pub mod report;
pub mod state;

pub use orchestrator::Pipeline;
pub use report::{ChannelSchedule, DaySchedule, RunMode, RunReport};
pub use state::{PipelineProgress, PipelineState, RunStateTracker, StateTransition};
