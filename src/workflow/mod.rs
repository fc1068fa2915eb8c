pub mod context;
pub mod engine;
pub mod outcome;
pub mod stage;
pub mod steps;
pub mod waits;

pub use context::{RunState, StageCtx};
pub use engine::StageEngine;
pub use outcome::{Disposition, StageOutcome, StageStatus, SubmissionResult, SubmissionStatus};
pub use stage::{route, Escalation, Stage, Transition};
pub use steps::{PortalSteps, StageStep, StepOk, StepResult};
pub use waits::{settle, WaitStrategy};
