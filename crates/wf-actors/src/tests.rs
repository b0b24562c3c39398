//! Minimal actor and message shared by the other modules' unit tests.

use async_trait::async_trait;

use crate::{Actor, ActorContext, ActorExitStatus, Handler};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ping;

/// Counts how many `Ping` messages it has received, replying with the count.
#[derive(Debug, Default, Clone)]
pub(crate) struct PingReceiverActor {
	count: usize,
}

#[async_trait]
impl Actor for PingReceiverActor {
	type ObservableState = usize;

	fn name(&self) -> String {
		"PingReceiverActor".to_string()
	}

	fn observable_state(&self) -> usize {
		self.count
	}
}

#[async_trait]
impl Handler<Ping> for PingReceiverActor {
	type Reply = usize;

	async fn handle(&mut self, _msg: Ping, _ctx: &ActorContext<Self>) -> Result<usize, ActorExitStatus> {
		self.count += 1;
		Ok(self.count)
	}
}
