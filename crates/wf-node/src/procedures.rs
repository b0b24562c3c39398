use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use wf_common::ServiceError;
use wf_engine::{run_saga, SagaStep};
use wf_rpc::{RequestContext, RouterError};

use crate::app::{self, AppState};

/// Registers every procedure from the minimal surface (§6) onto `state`'s
/// router. Each handler deserializes its input, forwards the call through
/// the process actor's mailbox, and maps the engine's typed error back onto
/// a `RouterError` so the transports only ever see one error shape.
pub fn register_all(state: &AppState) -> Result<(), RouterError> {
	let router = state.router.clone();

	register(&router, "process.start", state.clone(), |state, ctx, input| async move {
		let params: StartParams = parse(input)?;
		let instance = app::start_process(
			&state,
			ctx.tenant_id,
			params.process_id,
			params.business_key,
			params.variables.unwrap_or_default(),
			Some(ctx.correlation_id),
		)
		.await
		.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	register(&router, "process.signal", state.clone(), |state, ctx, input| async move {
		let params: SignalParams = parse(input)?;
		let instance = app::signal_process(
			&state,
			ctx.tenant_id,
			params.instance_id,
			params.name,
			params.variables.unwrap_or_default(),
			Some(ctx.correlation_id),
			false,
		)
		.await
		.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	register(&router, "process.message", state.clone(), |state, ctx, input| async move {
		let params: SignalParams = parse(input)?;
		let instance = app::signal_process(
			&state,
			ctx.tenant_id,
			params.instance_id,
			params.name,
			params.variables.unwrap_or_default(),
			Some(ctx.correlation_id),
			true,
		)
		.await
		.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	register(&router, "process.completeTask", state.clone(), |state, ctx, input| async move {
		let params: CompleteTaskParams = parse(input)?;
		let instance = app::complete_task(
			&state,
			ctx.tenant_id,
			params.instance_id,
			params.task_id,
			params.variables.unwrap_or_default(),
			Some(ctx.correlation_id),
		)
		.await
		.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	register(&router, "process.getInstance", state.clone(), |state, ctx, input| async move {
		let params: InstanceParams = parse(input)?;
		let instance = app::get_instance(&state, ctx.tenant_id, params.instance_id).await.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	register(&router, "process.getTasks", state.clone(), |state, ctx, input| async move {
		let params: InstanceParams = parse(input)?;
		let tasks = app::get_tasks(&state, ctx.tenant_id, params.instance_id).await.map_err(ask_error)?;
		Ok(serde_json::to_value(tasks).expect("tasks serialize"))
	})?;

	// Completes every currently pending service task once (§4.3's
	// engine-completed task semantics), recording one `task_completed` event
	// per completion so replay-on-restart sees the same trail a manual
	// `completeTask` call would leave.
	register(&router, "process.tickServiceTasks", state.clone(), |state, ctx, input| async move {
		let params: InstanceParams = parse(input)?;
		let instance = app::tick_service_tasks(&state, ctx.tenant_id, params.instance_id).await.map_err(ask_error)?;
		Ok(serde_json::to_value(instance).expect("instance serializes"))
	})?;

	// The saga orchestrator (§4.3) has no durable instance of its own in this
	// minimal surface — a run is a single request/response computation over
	// caller-supplied steps, not a process tied to a tenant-scoped actor.
	register(&router, "saga.run", state.clone(), |_state, _ctx, input| async move {
		let params: SagaRunParams = parse(input)?;
		let fails_with: HashMap<String, String> =
			params.steps.iter().filter_map(|step| step.fails_with.clone().map(|reason| (step.name.clone(), reason))).collect();
		let steps: Vec<SagaStep> = params
			.steps
			.into_iter()
			.map(|step| {
				if step.compensatable {
					SagaStep::compensatable(step.name)
				} else {
					SagaStep::non_compensatable(step.name)
				}
			})
			.collect();
		let (instance, events) = run_saga(
			&steps,
			|name| match fails_with.get(name) {
				Some(reason) => Err(reason.clone()),
				None => Ok(()),
			},
			|name| tracing::info!(step = %name, "compensating saga step"),
		);
		Ok(serde_json::json!({"instance": instance, "events": events}))
	})?;

	Ok(())
}

fn register<F, Fut>(
	router: &Arc<wf_rpc::Router>,
	name: &'static str,
	state: AppState,
	handler: F,
) -> Result<(), RouterError>
where
	F: Fn(AppState, RequestContext, serde_json::Value) -> Fut + Send + Sync + 'static,
	Fut: std::future::Future<Output = Result<serde_json::Value, RouterError>> + Send + 'static,
{
	router.register(
		name,
		Arc::new(move |ctx, input| {
			let state = state.clone();
			Box::pin(handler(state, ctx, input))
		}),
	)
}

fn parse<T: for<'de> Deserialize<'de>>(input: serde_json::Value) -> Result<T, RouterError> {
	serde_json::from_value(input).map_err(|err| RouterError::ValidationFailed(err.to_string()))
}

/// `RouterError` only carries four shapes; map the engine's richer error
/// code onto the closest one so the HTTP/WS layers still see the right
/// status (§4.5's table keys off `ServiceErrorCode`, not this enum).
fn ask_error(err: wf_actors::AskError<wf_engine::EngineError>) -> RouterError {
	use wf_common::ServiceErrorCode::*;
	match err {
		wf_actors::AskError::ErrorReply(engine_err) => match engine_err.error_code() {
			NotFound => RouterError::NotFound(engine_err.to_string()),
			ValidationFailed | PermissionDenied | Unauthorized => RouterError::ValidationFailed(engine_err.to_string()),
			_ => RouterError::Internal(engine_err.to_string()),
		},
		wf_actors::AskError::MessageNotDelivered | wf_actors::AskError::ProcessMessageError => {
			RouterError::Internal(err.to_string())
		},
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartParams {
	process_id: String,
	business_key: String,
	variables: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalParams {
	instance_id: String,
	name: String,
	variables: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskParams {
	instance_id: String,
	task_id: String,
	variables: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceParams {
	instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SagaRunParams {
	steps: Vec<SagaStepParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SagaStepParams {
	name: String,
	compensatable: bool,
	/// When set, the step's forward action fails with this message instead
	/// of succeeding — lets a caller exercise the compensation path without
	/// a real external side effect to fail.
	fails_with: Option<String>,
}
