//! Optional observability for the renewal, request, and navigation flows.
//!
//! # Feature Flags
//!
//! - `tracing`: every flow runs inside a `session_gate.flow` span (`flow`, `stage`, and
//!   `subject` fields), and renewal rounds, teardowns, and redirects emit debug/warn events.
//! - `metrics`: `session_gate_flow_total{flow, outcome}` and
//!   `session_gate_redirect_total{reason}` counters plus the `session_gate_renewal_waiters`
//!   histogram.
//!
//! Without either feature every helper here compiles to nothing.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Emits a `tracing` event when the `tracing` feature is enabled; compiles to nothing otherwise.
macro_rules! flow_event {
	($level:ident, $($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	};
}

macro_rules! labeled {
	($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal,)+ }) => {
		$(#[$meta])*
		#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
		pub enum $name {
			$($(#[$vmeta])* $variant,)+
		}
		impl $name {
			/// Stable label used for span fields and metric labels.
			pub const fn as_str(self) -> &'static str {
				match self {
					$(Self::$variant => $label,)+
				}
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(self.as_str())
			}
		}
	};
}

labeled! {
	/// Flows the crate observes.
	FlowKind {
		/// Credential validation and single-flight renewal.
		Renewal => "renewal",
		/// Authenticated request dispatch and replay.
		Request => "request",
		/// Route transition evaluation.
		Navigation => "navigation",
	}
}

labeled! {
	/// How a flow ended.
	FlowOutcome {
		/// Entry to a flow.
		Attempt => "attempt",
		/// Completed; allowed transitions count here.
		Success => "success",
		/// Error returned to the caller; redirected transitions count here.
		Failure => "failure",
		/// Aborted by the client or dropped mid-flight.
		Cancelled => "cancelled",
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn labels_are_stable() {
		assert_eq!(FlowKind::Navigation.to_string(), "navigation");
		assert_eq!(FlowOutcome::Cancelled.as_str(), "cancelled");
	}
}
