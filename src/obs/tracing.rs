// self
use crate::{_prelude::*, obs::FlowKind};

/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// `session_gate.flow` span carrying the flow kind, the call site, and an optional subject
/// (renewal round, request line, or navigation target).
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens a span for `kind` at `stage`; the subject stays empty until recorded.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			Self {
				span: tracing::info_span!(
					"session_gate.flow",
					flow = kind.as_str(),
					stage,
					subject = tracing::field::Empty,
				),
			}
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Records what the flow is acting on.
	pub fn subject(self, subject: impl Display) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("subject", tracing::field::display(subject));
		#[cfg(not(feature = "tracing"))]
		let _ = subject;

		self
	}

	/// Runs `fut` inside the span without holding an entered guard across `.await`.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrumented_futures_keep_their_output() {
		let span = FlowSpan::new(FlowKind::Navigation, "before_transition").subject("/dashboard");

		assert_eq!(span.instrument(async { "allowed" }).await, "allowed");
	}
}
