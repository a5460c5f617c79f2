pub mod sequence_guard;
pub mod evaluation_worker;
pub mod dispatcher;
pub mod event_watcher;
pub mod submission_manager;
pub mod orchestrator;

pub use sequence_guard::{ReleaseResult, Reservation, SequenceGuard};
pub use evaluation_worker::{EvaluationSettings, EvaluationWorker};
pub use dispatcher::{Dispatcher, DispatcherSettings, PendingResult};
pub use event_watcher::{EventWatcher, WatcherSettings, WatcherState, WatcherStats};
pub use submission_manager::{SubmissionManager, SubmissionRecord, SubmissionStats};
pub use orchestrator::{Collaborators, EngineStatus, Orchestrator};
