//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and WebSocket session. The
//! configuration is hot-swappable at runtime via the config API, so it lives
//! behind `Arc<RwLock<...>>`; metrics are updated on every request and every
//! pipeline event. Locks are held only long enough to copy data out.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all handlers and session tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runtime-updatable configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Request and pipeline counters
    pub metrics: Arc<RwLock<PipelineMetrics>>,
    /// Server start time, for uptime reporting
    pub start_time: Instant,
}

/// Counters collected across all requests and voice sessions.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,
    /// Total HTTP errors since start
    pub error_count: u64,
    /// Currently connected voice sessions
    pub active_sessions: u32,
    /// Voice sessions accepted since start
    pub sessions_started: u64,
    /// Conversational turns that streamed to completion
    pub turns_completed: u64,
    /// Barge-ins observed (interrupts during thinking/speaking)
    pub barge_ins: u64,
    /// Recoverable pipeline errors reported to clients
    pub pipeline_errors: u64,
    /// Per-endpoint request statistics, keyed like "GET /health"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(PipelineMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Validate and swap in a new configuration.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Admit a new voice session if capacity allows. Returns `false` when
    /// the concurrent-session limit is already reached.
    pub fn try_begin_session(&self) -> bool {
        let max = self.get_config().session.max_concurrent_sessions;
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions as usize >= max {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.sessions_started += 1;
        true
    }

    /// Release a previously admitted session. Underflow-guarded so a double
    /// cleanup cannot wrap the counter.
    pub fn end_session(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_turn_completed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.turns_completed += 1;
    }

    pub fn record_barge_in(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.barge_ins += 1;
    }

    pub fn record_pipeline_error(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.pipeline_errors += 1;
    }

    /// Consistent copy of the counters for serialization.
    pub fn get_metrics_snapshot(&self) -> PipelineMetrics {
        let metrics = self.metrics.read().unwrap();
        PipelineMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            sessions_started: metrics.sessions_started,
            turns_completed: metrics.turns_completed,
            barge_ins: metrics.barge_ins,
            pipeline_errors: metrics.pipeline_errors,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_admission_respects_limit() {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 2;
        let state = AppState::new(config);

        assert!(state.try_begin_session());
        assert!(state.try_begin_session());
        assert!(!state.try_begin_session());

        state.end_session();
        assert!(state.try_begin_session());

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_sessions, 2);
        assert_eq!(snapshot.sessions_started, 3);
    }

    #[test]
    fn test_end_session_does_not_underflow() {
        let state = AppState::new(AppConfig::default());
        state.end_session();
        state.end_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let state = AppState::new(AppConfig::default());
        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().server.port, 8080);
    }
}
