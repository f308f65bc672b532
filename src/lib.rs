pub mod control;
pub mod dispatch;
pub mod gateway;
pub mod job;
pub mod runtime;
pub mod session;

pub use control::{
    Account, AppContext, ControlSurface, GatewaySessionFactory, Input, JsonFileStore, MemoryStore,
    Operator, OperatorId, Reply, SessionFactory, StateStore,
};
pub use dispatch::{
    DispatchEngine, DispatchService, EngineReport, EngineState, StatusSnapshot, StopTarget,
    TaskId, TaskRegistry,
};
pub use gateway::{GatewayError, GatewayOptions, GatewaySession};
pub use job::{DeliveryMode, JobError, JobSpecification, Message, TargetId};
pub use runtime::config::{DispatchConfig, DispatchConfigBuilder};
pub use runtime::progress::SendProgress;
pub use runtime::telemetry::{init_tracing, DispatchTelemetry, TelemetrySnapshot};
pub use session::{SessionError, SessionFuture, SessionHandle, TargetResolver, TargetSummary};
