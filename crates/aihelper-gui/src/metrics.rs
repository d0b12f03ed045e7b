use aihelper_core::PipelineKind;
use tracing::{info, warn};

pub fn pipeline_started(session_id: &str, pipeline: PipelineKind, available_permits: usize) {
    info!(
        target = "telemetry.gui",
        session_id,
        pipeline = pipeline.as_str(),
        available_permits,
        event = "pipeline_started"
    );
}

pub fn pipeline_completed(session_id: &str, pipeline: PipelineKind, elapsed_ms: u128) {
    info!(
        target = "telemetry.gui",
        session_id,
        pipeline = pipeline.as_str(),
        elapsed_ms = elapsed_ms as u64,
        event = "pipeline_completed"
    );
}

pub fn pipeline_failed(session_id: &str, pipeline: PipelineKind, error: &str) {
    warn!(
        target = "telemetry.gui",
        session_id,
        pipeline = pipeline.as_str(),
        error,
        event = "pipeline_failed"
    );
}
