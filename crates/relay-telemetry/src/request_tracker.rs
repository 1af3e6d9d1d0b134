//! In-flight request tracking.
//!
//! Tracks every relay request from arrival to completion so the admin
//! surface can report live counts and rolling aggregates without touching
//! the metrics registry.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::Usage;
use tracing::debug;

/// A request currently in flight.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Request id assigned at the edge
    pub request_id: String,
    /// Public model name
    pub model: String,
    /// Channel currently serving the request, once selected
    pub channel: Option<String>,
    /// Whether the client asked for a stream
    pub streaming: bool,
    /// Arrival time
    pub started: Instant,
    /// Time to the first streamed line, when applicable
    pub first_token: Option<Duration>,
}

impl RequestInfo {
    /// Track a new request.
    #[must_use]
    pub fn new(request_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
            channel: None,
            streaming: false,
            started: Instant::now(),
            first_token: None,
        }
    }

    /// Mark the request as streaming.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CompletedAggregate {
    total: u64,
    succeeded: u64,
    total_duration: Duration,
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Rolling tracker statistics.
#[derive(Debug, Clone, Copy)]
pub struct TrackerStats {
    /// Requests currently in flight
    pub active_requests: usize,
    /// Requests completed since start
    pub total_completed: u64,
    /// Share of completed requests that succeeded
    pub success_rate: f64,
    /// Mean wall time of completed requests
    pub avg_duration: Duration,
    /// Billed prompt tokens across completed requests
    pub prompt_tokens: i64,
    /// Completion tokens across completed requests
    pub completion_tokens: i64,
}

/// Tracks in-flight requests and aggregates completed ones.
#[derive(Default)]
pub struct RequestTracker {
    active: DashMap<String, RequestInfo>,
    completed: Mutex<CompletedAggregate>,
}

impl RequestTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arriving request.
    pub fn start(&self, info: RequestInfo) {
        self.active.insert(info.request_id.clone(), info);
    }

    /// Record which channel is serving a request.
    pub fn update_channel(&self, request_id: &str, channel: &str) {
        if let Some(mut info) = self.active.get_mut(request_id) {
            info.channel = Some(channel.to_string());
        }
    }

    /// Record the arrival of the first streamed line.
    pub fn record_first_token(&self, request_id: &str) {
        if let Some(mut info) = self.active.get_mut(request_id) {
            if info.first_token.is_none() {
                info.first_token = Some(info.started.elapsed());
            }
        }
    }

    /// Complete a request successfully.
    pub fn complete_success(&self, request_id: &str, usage: Option<&Usage>) {
        let Some((_, info)) = self.active.remove(request_id) else {
            return;
        };
        let mut completed = self.completed.lock();
        completed.total += 1;
        completed.succeeded += 1;
        completed.total_duration += info.started.elapsed();
        if let Some(usage) = usage {
            completed.prompt_tokens += usage.prompt_tokens;
            completed.completion_tokens += usage.completion_tokens;
        }
    }

    /// Complete a request with an error.
    pub fn complete_error(&self, request_id: &str, status: u16, message: impl AsRef<str>) {
        let Some((_, info)) = self.active.remove(request_id) else {
            return;
        };
        debug!(
            request_id,
            status,
            error = message.as_ref(),
            "request completed with error"
        );
        let mut completed = self.completed.lock();
        completed.total += 1;
        completed.total_duration += info.started.elapsed();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        let completed = *self.completed.lock();
        let success_rate = if completed.total == 0 {
            1.0
        } else {
            completed.succeeded as f64 / completed.total as f64
        };
        let avg_duration = if completed.total == 0 {
            Duration::ZERO
        } else {
            completed.total_duration / u32::try_from(completed.total).unwrap_or(u32::MAX)
        };
        TrackerStats {
            active_requests: self.active.len(),
            total_completed: completed.total,
            success_rate,
            avg_duration,
            prompt_tokens: completed.prompt_tokens,
            completion_tokens: completed.completion_tokens,
        }
    }
}
