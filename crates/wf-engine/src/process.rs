use std::collections::HashMap;
use std::time::Duration;

use crate::expr::Expr;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
	User,
	Service,
	Send,
	Receive,
	Manual,
	BusinessRule,
}

/// Fixed-delay retry policy for a service task.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy { max_attempts: 1, delay: Duration::from_millis(0) }
	}
}

#[derive(Debug, Clone)]
pub enum NodeKind {
	Start,
	End,
	Task { kind: TaskKind, name: String, retry: RetryPolicy, timeout: Option<Duration> },
	ExclusiveGateway,
	ParallelGateway,
}

#[derive(Debug, Clone)]
pub struct Node {
	pub id: NodeId,
	pub kind: NodeKind,
}

/// One branch out of an exclusive gateway: either a named condition or the
/// single allowed `otherwise` default.
#[derive(Debug, Clone)]
pub struct GatewayBranch {
	pub name: Option<String>,
	pub condition: Option<Expr>,
	pub target: NodeId,
	pub is_otherwise: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessBuildError {
	#[error("node `{0}` is not defined")]
	UnknownNode(NodeId),
	#[error("gateway `{0}` already has an `otherwise` branch")]
	DuplicateOtherwise(NodeId),
	#[error("process has no start node")]
	MissingStart,
}

/// A directed graph of nodes: start/end events, tasks, and gateways. Built
/// once via [`ProcessBuilder`] and then shared read-only across instances.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
	pub process_id: String,
	pub start_node: NodeId,
	nodes: HashMap<NodeId, Node>,
	/// Default successor for non-gateway nodes.
	edges: HashMap<NodeId, NodeId>,
	/// Branches for exclusive-gateway nodes; parallel-gateway nodes use the
	/// `target` field only (condition/otherwise are unused).
	gateway_branches: HashMap<NodeId, Vec<GatewayBranch>>,
}

impl ProcessDefinition {
	pub fn node(&self, id: &str) -> Option<&Node> {
		self.nodes.get(id)
	}

	pub fn next_of(&self, id: &str) -> Option<&NodeId> {
		self.edges.get(id)
	}

	pub fn branches_of(&self, id: &str) -> &[GatewayBranch] {
		self.gateway_branches.get(id).map(Vec::as_slice).unwrap_or(&[])
	}
}

pub struct ProcessBuilder {
	process_id: String,
	nodes: HashMap<NodeId, Node>,
	edges: HashMap<NodeId, NodeId>,
	gateway_branches: HashMap<NodeId, Vec<GatewayBranch>>,
	start_node: Option<NodeId>,
	last: Option<NodeId>,
}

impl ProcessBuilder {
	pub fn new(process_id: impl Into<String>) -> Self {
		ProcessBuilder {
			process_id: process_id.into(),
			nodes: HashMap::new(),
			edges: HashMap::new(),
			gateway_branches: HashMap::new(),
			start_node: None,
			last: None,
		}
	}

	fn insert(&mut self, id: &str, kind: NodeKind) {
		self.nodes.insert(id.to_string(), Node { id: id.to_string(), kind });
		if let Some(last) = &self.last {
			self.edges.insert(last.clone(), id.to_string());
		}
		self.last = Some(id.to_string());
	}

	pub fn start_event(mut self, id: &str) -> Self {
		self.start_node = Some(id.to_string());
		self.insert(id, NodeKind::Start);
		self
	}

	pub fn end_event(mut self, id: &str) -> Self {
		self.insert(id, NodeKind::End);
		self
	}

	pub fn service_task(mut self, id: &str, name: &str) -> Self {
		self.insert(
			id,
			NodeKind::Task { kind: TaskKind::Service, name: name.to_string(), retry: RetryPolicy::default(), timeout: None },
		);
		self
	}

	pub fn service_task_with_retry(mut self, id: &str, name: &str, retry: RetryPolicy, timeout: Option<Duration>) -> Self {
		self.insert(id, NodeKind::Task { kind: TaskKind::Service, name: name.to_string(), retry, timeout });
		self
	}

	pub fn user_task(mut self, id: &str, name: &str) -> Self {
		self.insert(
			id,
			NodeKind::Task { kind: TaskKind::User, name: name.to_string(), retry: RetryPolicy::default(), timeout: None },
		);
		self
	}

	pub fn exclusive_gateway(mut self, id: &str) -> Self {
		self.insert(id, NodeKind::ExclusiveGateway);
		self
	}

	pub fn parallel_gateway(mut self, id: &str) -> Self {
		self.insert(id, NodeKind::ParallelGateway);
		self
	}

	/// Adds a conditional branch out of an exclusive gateway. `expr` is parsed
	/// eagerly so malformed conditions fail at build time, not at dispatch.
	pub fn when(mut self, gateway_id: &str, name: &str, expr: &str, target: &str) -> Self {
		let condition = Expr::parse(expr).ok();
		self.gateway_branches.entry(gateway_id.to_string()).or_default().push(GatewayBranch {
			name: Some(name.to_string()),
			condition,
			target: target.to_string(),
			is_otherwise: false,
		});
		self
	}

	pub fn otherwise(mut self, gateway_id: &str, target: &str) -> Self {
		self.gateway_branches.entry(gateway_id.to_string()).or_default().push(GatewayBranch {
			name: None,
			condition: None,
			target: target.to_string(),
			is_otherwise: true,
		});
		self
	}

	/// Explicit edge that doesn't follow builder call order, e.g. a parallel
	/// gateway fan-out target or a loop-back join.
	pub fn move_to(mut self, from: &str, to: &str) -> Self {
		self.edges.insert(from.to_string(), to.to_string());
		self
	}

	pub fn build(self) -> Result<ProcessDefinition, ProcessBuildError> {
		let start_node = self.start_node.ok_or(ProcessBuildError::MissingStart)?;
		for gateway_id in self.gateway_branches.keys() {
			let otherwise_count =
				self.gateway_branches[gateway_id].iter().filter(|b| b.is_otherwise).count();
			if otherwise_count > 1 {
				return Err(ProcessBuildError::DuplicateOtherwise(gateway_id.clone()));
			}
		}
		Ok(ProcessDefinition {
			process_id: self.process_id,
			start_node,
			nodes: self.nodes,
			edges: self.edges,
			gateway_branches: self.gateway_branches,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn linear_chain_wires_implicit_edges() {
		let def = ProcessBuilder::new("p1")
			.start_event("start")
			.service_task("validate", "ValidateOrder")
			.end_event("end")
			.build()
			.unwrap();
		assert_eq!(def.next_of("start"), Some(&"validate".to_string()));
		assert_eq!(def.next_of("validate"), Some(&"end".to_string()));
	}

	#[test]
	fn gateway_collects_branches_in_call_order() {
		let def = ProcessBuilder::new("p1")
			.start_event("start")
			.exclusive_gateway("check")
			.when("check", "low", "amount <= 1000", "auto")
			.otherwise("check", "manual")
			.service_task("auto", "AutoApprove")
			.user_task("manual", "ManagerApproval")
			.build()
			.unwrap();
		let branches = def.branches_of("check");
		assert_eq!(branches.len(), 2);
		assert!(branches[1].is_otherwise);
	}

	#[test]
	fn duplicate_otherwise_is_rejected() {
		let result = ProcessBuilder::new("p1")
			.start_event("start")
			.exclusive_gateway("check")
			.otherwise("check", "a")
			.otherwise("check", "b")
			.build();
		assert!(matches!(result, Err(ProcessBuildError::DuplicateOtherwise(_))));
	}
}
