use wf_common::new_quid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStep {
	pub name: String,
	pub compensatable: bool,
}

impl SagaStep {
	pub fn compensatable(name: impl Into<String>) -> Self {
		SagaStep { name: name.into(), compensatable: true }
	}

	pub fn non_compensatable(name: impl Into<String>) -> Self {
		SagaStep { name: name.into(), compensatable: false }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SagaState {
	Idle,
	Running,
	Compensating,
	Completed,
	Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
	pub saga_id: String,
	pub steps: Vec<SagaStep>,
	pub completed_steps: Vec<String>,
	pub failed_step: Option<String>,
	pub error_message: Option<String>,
	pub state: SagaState,
}

/// Emitted in execution order; a transport/event-store layer turns each into
/// a persisted event (`saga_compensated` etc.) and a log line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaEvent {
	StepCompleted { step: String },
	StepFailed { step: String, reason: String },
	#[serde(rename = "saga_compensated")]
	Compensated { step: String },
	CompensationSkipped { step: String, reason: String },
}

pub const NOT_COMPENSATABLE_REASON: &str = "not compensatable — already externally observable";

/// Runs `steps` forward via `forward`, appending to `completedSteps` as each
/// succeeds. On the first failure, compensates every completed step in
/// reverse order through `compensate`, skipping non-compensatable ones.
/// Compensation handlers are assumed infallible and must not enqueue further
/// forward steps.
pub fn run_saga(
	steps: &[SagaStep],
	forward: impl Fn(&str) -> Result<(), String>,
	mut compensate: impl FnMut(&str),
) -> (SagaInstance, Vec<SagaEvent>) {
	let mut instance = SagaInstance {
		saga_id: new_quid("saga"),
		steps: steps.to_vec(),
		completed_steps: Vec::new(),
		failed_step: None,
		error_message: None,
		state: SagaState::Running,
	};
	let mut events = Vec::new();
	let mut failure = None;

	for step in steps {
		match forward(&step.name) {
			Ok(()) => {
				instance.completed_steps.push(step.name.clone());
				events.push(SagaEvent::StepCompleted { step: step.name.clone() });
			},
			Err(reason) => {
				failure = Some((step.name.clone(), reason));
				break;
			},
		}
	}

	let Some((failed_step, reason)) = failure else {
		instance.state = SagaState::Completed;
		return (instance, events);
	};

	instance.failed_step = Some(failed_step.clone());
	instance.error_message = Some(reason.clone());
	instance.state = SagaState::Compensating;
	events.push(SagaEvent::StepFailed { step: failed_step, reason });

	let completed_in_order = instance.completed_steps.clone();
	for name in completed_in_order.iter().rev() {
		let step_def = steps.iter().find(|s| &s.name == name).expect("completed step is a known step");
		if step_def.compensatable {
			compensate(name);
			events.push(SagaEvent::Compensated { step: name.clone() });
		} else {
			events.push(SagaEvent::CompensationSkipped {
				step: name.clone(),
				reason: NOT_COMPENSATABLE_REASON.to_string(),
			});
		}
	}
	instance.state = SagaState::Failed;
	(instance, events)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;

	#[test]
	fn all_steps_succeed_completes_without_compensation() {
		let steps = vec![SagaStep::compensatable("a"), SagaStep::compensatable("b")];
		let (instance, events) = run_saga(&steps, |_name| Ok(()), |_name| panic!("should not compensate"));
		assert_eq!(instance.state, SagaState::Completed);
		assert_eq!(instance.completed_steps, vec!["a", "b"]);
		assert!(events.iter().all(|e| matches!(e, SagaEvent::StepCompleted { .. })));
	}

	#[test]
	fn failure_compensates_completed_steps_in_reverse_skipping_non_compensatable() {
		let steps = vec![
			SagaStep::compensatable("user-creation"),
			SagaStep::non_compensatable("email-verification"),
			SagaStep::compensatable("welcome-notification"),
			SagaStep::compensatable("welcome-message"),
		];
		let invoked = RefCell::new(Vec::new());
		let (instance, events) = run_saga(
			&steps,
			|name| if name == "welcome-notification" { Err("smtp unavailable".to_string()) } else { Ok(()) },
			|name| invoked.borrow_mut().push(name.to_string()),
		);

		assert_eq!(instance.state, SagaState::Failed);
		assert_eq!(instance.failed_step.as_deref(), Some("welcome-notification"));
		assert_eq!(invoked.into_inner(), vec!["user-creation".to_string()]);

		let compensated: Vec<&str> = events
			.iter()
			.filter_map(|e| match e {
				SagaEvent::Compensated { step } => Some(step.as_str()),
				_ => None,
			})
			.collect();
		assert_eq!(compensated, vec!["user-creation"]);

		let skipped: Vec<&str> = events
			.iter()
			.filter_map(|e| match e {
				SagaEvent::CompensationSkipped { step, reason } => {
					assert_eq!(reason, NOT_COMPENSATABLE_REASON);
					Some(step.as_str())
				},
				_ => None,
			})
			.collect();
		assert_eq!(skipped, vec!["email-verification"]);
	}

	#[test]
	fn failing_at_the_first_step_compensates_nothing() {
		let steps = vec![SagaStep::compensatable("a")];
		let (instance, events) = run_saga(&steps, |_| Err("boom".to_string()), |_| panic!("nothing to compensate"));
		assert_eq!(instance.state, SagaState::Failed);
		assert!(instance.completed_steps.is_empty());
		assert!(events.iter().any(|e| matches!(e, SagaEvent::StepFailed { .. })));
	}
}
