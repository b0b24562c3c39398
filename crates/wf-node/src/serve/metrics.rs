use once_cell::sync::Lazy;
use wf_common::metrics::{counter_vec, histogram_vec, HistogramVec, IntCounterVec};

/// RPC call counters/timers exposed at `GET /api/v1/metrics`, labeled by
/// procedure name and outcome (§4.8's `tracing` spans cover the per-call
/// detail; these counters cover aggregate rate/latency).
pub struct RpcMetrics {
	pub calls_total: IntCounterVec<2>,
	pub call_duration_seconds: HistogramVec<1>,
}

impl Default for RpcMetrics {
	fn default() -> Self {
		RpcMetrics {
			calls_total: counter_vec(
				"rpc_calls_total",
				"Total number of RPC calls received, by procedure and outcome",
				"node",
				&[],
				["procedure", "outcome"],
			),
			call_duration_seconds: histogram_vec(
				"rpc_call_duration_seconds",
				"RPC call duration in seconds, by procedure",
				"node",
				&[],
				["procedure"],
			),
		}
	}
}

pub static RPC_METRICS: Lazy<RpcMetrics> = Lazy::new(RpcMetrics::default);
