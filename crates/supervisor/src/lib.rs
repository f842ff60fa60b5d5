pub mod orchestrator;
pub mod state;
pub mod supervisor;
pub mod workers;

pub use orchestrator::{Criticality, HealthView, Orchestrator, OrchestratorHandle, WorkerFactory};
pub use state::{SupervisionAction, WorkerRecord, WorkerState};
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorHandle, SupervisorStatus, WorkerSnapshot};
pub use workers::{
    CapitalWorker, ExecutionWorker, IngestWorker, ObservabilityWorker, PipelineWorker,
};
