//! Optional, read-only HTTP surface for operators: liveness, a Prometheus
//! text exposition of queue/topology sizes, and a JSON snapshot of the
//! known topology. Gated behind the `introspection` feature so embedding
//! this crate into a minimal binary doesn't pull in axum by default.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::signalslotable::SignalSlotable;
use crate::tracker::TrackedInstance;

#[derive(Clone)]
struct AppState {
    instance: Arc<SignalSlotable>,
}

pub fn router(instance: Arc<SignalSlotable>) -> Router {
    let state = AppState { instance };
    Router::new().route("/healthz", get(healthz)).route("/metrics", get(metrics)).route("/instances", get(instances)).with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let known = state.instance.tracker().known_instances().len();
    let strands = state.instance.strand_pool_len();
    let body = format!(
        "# HELP karabo_net_known_instances Instances currently tracked as alive.\n\
         # TYPE karabo_net_known_instances gauge\n\
         karabo_net_known_instances {known}\n\
         # HELP karabo_net_active_strands Per-sender strands currently allocated.\n\
         # TYPE karabo_net_active_strands gauge\n\
         karabo_net_active_strands {strands}\n"
    );
    ([("content-type", "text/plain; version=0.0.4")], body)
}

#[derive(Serialize)]
struct InstanceView {
    instance_id: String,
    instance_type: String,
}

impl From<TrackedInstance> for InstanceView {
    fn from(t: TrackedInstance) -> Self {
        Self { instance_id: t.instance_id, instance_type: t.instance_type }
    }
}

async fn instances(State(state): State<AppState>) -> impl IntoResponse {
    let list: Vec<InstanceView> = state.instance.tracker().known_instances().into_iter().map(InstanceView::from).collect();
    Json(list)
}
