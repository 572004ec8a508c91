/*!
 * Structured Tracing
 * Subscriber setup and dispatch spans built on the tracing crate
 *
 * Features:
 * - Trace ID per dispatched call for correlating grate and cage logs
 * - JSON-formatted logs for structured parsing
 * - Duration and result recorded on the dispatch span
 */

use crate::core::types::{CageId, GrateId, HandlerIndex};
use std::time::Instant;
use tracing::{debug, info, span, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub const ENV_TRACE_JSON: &str = "LIND_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - LIND_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(pid = std::process::id(), json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one dispatched call
pub struct DispatchSpan {
    span: tracing::Span,
    start: Instant,
}

impl DispatchSpan {
    pub fn new(grate: GrateId, index: HandlerIndex, caller: CageId) -> Self {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            trace_id = tracing::field::Empty,
            grate = grate.as_raw(),
            index = index.as_raw(),
            caller = caller.as_raw(),
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );
        if !span.is_disabled() {
            span.record("trace_id", generate_trace_id().as_str());
        }

        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn finish(self, result: i64) {
        let elapsed = self.start.elapsed();
        self.span.record("duration_us", elapsed.as_micros() as u64);
        self.span.record("result", result);
        let _entered = self.span.enter();
        debug!(result, "dispatch completed");
    }
}
