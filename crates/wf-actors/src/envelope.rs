use std::{any::Any, fmt};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{actor::DeferableReplyHandler, Actor, ActorContext, ActorExitStatus};

/// Captures a message together with the handler implementation needed to
/// deliver it, erasing the message's concrete type so heterogeneous messages
/// can share one mailbox.
pub struct Envelope<A> {
	handler_envelope: Box<dyn EnvelopeT<A>>,
}

impl<A: Actor> Envelope<A> {
	/// Returns the message as a boxed `Any`. Test-only.
	pub fn message(&mut self) -> Box<dyn Any> {
		self.handler_envelope.message()
	}

	pub fn message_typed<M: 'static>(&mut self) -> Option<M> {
		self.handler_envelope.message().downcast::<M>().ok().map(|boxed| *boxed)
	}

	pub async fn handle_message(
		&mut self,
		actor: &mut A,
		ctx: &ActorContext<A>,
	) -> Result<(), ActorExitStatus> {
		self.handler_envelope.handle_message(actor, ctx).await
	}
}

impl<A: Actor> fmt::Debug for Envelope<A> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_tuple("Envelope").field(&self.handler_envelope.debug_msg()).finish()
	}
}

#[async_trait]
trait EnvelopeT<A: Actor>: Send {
	fn debug_msg(&self) -> String;

	fn message(&mut self) -> Box<dyn Any>;

	async fn handle_message(
		&mut self,
		actor: &mut A,
		ctx: &ActorContext<A>,
	) -> Result<(), ActorExitStatus>;
}

#[async_trait]
impl<A, M> EnvelopeT<A> for Option<(oneshot::Sender<A::Reply>, M)>
where
	A: DeferableReplyHandler<M>,
	M: fmt::Debug + Send + 'static,
{
	fn debug_msg(&self) -> String {
		match self.as_ref() {
			Some((_response_tx, msg)) => format!("{msg:?}"),
			None => "<consumed>".to_string(),
		}
	}

	fn message(&mut self) -> Box<dyn Any> {
		match self.take() {
			Some((_, message)) => Box::new(message),
			None => Box::new(()),
		}
	}

	async fn handle_message(
		&mut self,
		actor: &mut A,
		ctx: &ActorContext<A>,
	) -> Result<(), ActorExitStatus> {
		let (response_tx, msg) = self.take().expect("handle_message should never be called twice");
		actor.handle_message(msg, response_tx, ctx).await
	}
}

pub(crate) fn wrap_in_envelope<A, M>(msg: M) -> (Envelope<A>, oneshot::Receiver<A::Reply>)
where
	A: DeferableReplyHandler<M>,
	M: fmt::Debug + Send + 'static,
{
	let (response_tx, response_rx) = oneshot::channel();
	let handler_envelope = Some((response_tx, msg));
	let envelope = Envelope { handler_envelope: Box::new(handler_envelope) };
	(envelope, response_rx)
}
