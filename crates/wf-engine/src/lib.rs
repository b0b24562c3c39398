mod expr;
mod instance;
mod process;
mod saga;

pub use expr::{Expr, ExprParseError};
pub use instance::{Engine, EngineError, InstanceStatus, ProcessInstance, Task};
pub use process::{
	GatewayBranch, Node, NodeId, NodeKind, ProcessBuildError, ProcessBuilder, ProcessDefinition,
	RetryPolicy, TaskKind,
};
pub use saga::{run_saga, SagaEvent, SagaInstance, SagaState, SagaStep, NOT_COMPENSATABLE_REASON};
