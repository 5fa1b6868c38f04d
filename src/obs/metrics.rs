// self
use crate::obs::{FlowKind, FlowOutcome};

/// Counts one flow outcome as `session_gate_flow_total{flow, outcome}`.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(
		"session_gate_flow_total",
		"flow" => kind.as_str(),
		"outcome" => outcome.as_str()
	)
	.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Counts a redirected transition as `session_gate_redirect_total{reason}`.
pub fn record_redirect(reason: &'static str) {
	#[cfg(feature = "metrics")]
	metrics::counter!("session_gate_redirect_total", "reason" => reason).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = reason;
}

/// Records how many callers a settled renewal round resumed.
pub fn record_round_waiters(waiters: usize) {
	#[cfg(feature = "metrics")]
	metrics::histogram!("session_gate_renewal_waiters").record(waiters as f64);
	#[cfg(not(feature = "metrics"))]
	let _ = waiters;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_accept_every_label_without_a_recorder() {
		for kind in [FlowKind::Renewal, FlowKind::Request, FlowKind::Navigation] {
			record_flow_outcome(kind, FlowOutcome::Cancelled);
		}

		record_redirect("forbidden");
		record_round_waiters(3);
	}
}
