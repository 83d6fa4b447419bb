//! Server-driven polling of remote jobs.
//!
//! A job moves `Pending → (Wait | NotReady)* → Complete | Failed`. The wait
//! between polls is whatever the server's `Retry-After` says; the client never
//! escalates it. [`classify`] is the pure transition function and
//! [`poll_job`] drives it against a [`SimulationApi`].

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::{ApiResponse, SimulationApi};
use crate::config::PollPolicy;
use crate::errors::{AlphaBatchError, Result};

const SUCCESS_STATUSES: &[&str] = &["COMPLETE", "WARNING"];
const FAILURE_STATUSES: &[&str] = &["ERROR", "FAIL", "FAILED", "CANCELLED", "TIMEOUT"];

/// What one poll response means for the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Server asked us to come back after this long.
    Wait(Duration),
    /// Neither a wait nor a terminal status; poll again.
    NotReady,
    Complete(Value),
    Failed(Value),
    /// Non-2xx answer while polling.
    TransportFailure(u16),
}

/// Terminal result of polling one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Complete(Value),
    Failed { reason: String, body: Value },
}

/// Classify one poll response.
pub fn classify(response: &ApiResponse) -> PollStep {
    if !response.is_success() {
        return PollStep::TransportFailure(response.status);
    }
    if let Some(seconds) = response.retry_after {
        if seconds > 0.0 {
            return match Duration::try_from_secs_f64(seconds) {
                Ok(wait) => PollStep::Wait(wait),
                Err(_) => {
                    warn!("Unusable Retry-After {}; treating the poll as failed", seconds);
                    PollStep::TransportFailure(response.status)
                }
            };
        }
    }
    match response.body_str("status").map(str::to_ascii_uppercase) {
        Some(status) if SUCCESS_STATUSES.contains(&status.as_str()) => {
            PollStep::Complete(response.body.clone())
        }
        Some(status) if FAILURE_STATUSES.contains(&status.as_str()) => {
            PollStep::Failed(response.body.clone())
        }
        _ => PollStep::NotReady,
    }
}

/// Poll `location` until the job is terminal or transport failures run out.
pub async fn poll_job(api: &dyn SimulationApi, location: &str, policy: &PollPolicy) -> JobOutcome {
    let mut failures: u32 = 0;
    loop {
        let step = match api.get(location).await {
            Ok(response) => classify(&response),
            Err(e) => {
                warn!("Polling {} failed: {}", location, e);
                PollStep::TransportFailure(0)
            }
        };

        match step {
            PollStep::Wait(duration) => {
                debug!("Job {} running, next poll in {:?}", location, duration);
                tokio::time::sleep(duration).await;
            }
            PollStep::NotReady => {
                tokio::time::sleep(policy.idle_poll_interval).await;
            }
            PollStep::Complete(body) => return JobOutcome::Complete(body),
            PollStep::Failed(body) => {
                error!("Simulation {} failed: {}", location, body);
                return JobOutcome::Failed {
                    reason: "remote status ERROR".to_string(),
                    body,
                };
            }
            PollStep::TransportFailure(status) => {
                failures += 1;
                if failures > policy.max_poll_failures {
                    error!(
                        "Simulation {} failed after {} polling errors (last status {})",
                        location, failures, status
                    );
                    return JobOutcome::Failed {
                        reason: format!("{} polling transport failures", failures),
                        body: Value::Null,
                    };
                }
                warn!(
                    "Simulation {} poll error (status {}), retry {}/{}",
                    location, status, failures, policy.max_poll_failures
                );
                tokio::time::sleep(policy.transport_retry_delay).await;
            }
        }
    }
}

/// GET `path`, sleeping and repeating for as long as the answer carries a
/// `Retry-After` header. No status field is consulted.
pub async fn fetch_until_ready(api: &dyn SimulationApi, path: &str) -> Result<ApiResponse> {
    loop {
        let response = api.get(path).await?;
        match response.retry_after {
            Some(seconds) => {
                let wait = if seconds > 0.0 {
                    Duration::try_from_secs_f64(seconds).map_err(|_| {
                        AlphaBatchError::api(
                            response.status,
                            format!("unusable Retry-After {} from {}", seconds, path),
                        )
                    })?
                } else {
                    Duration::ZERO
                };
                debug!("{} not ready, retrying in {:?}", path, wait);
                tokio::time::sleep(wait).await;
            }
            None => return Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock_api::MockSimulationApi;
    use serde_json::json;

    #[test]
    fn retry_after_means_wait_exactly_that_long() {
        let response = ApiResponse::new(200, json!({"progress": 0.4})).with_retry_after(2.5);
        assert_eq!(classify(&response), PollStep::Wait(Duration::from_millis(2500)));
    }

    #[test]
    fn terminal_statuses_are_recognised() {
        let done = ApiResponse::new(200, json!({"status": "COMPLETE", "alpha": "A1"}));
        assert!(matches!(classify(&done), PollStep::Complete(_)));
        let warned = ApiResponse::new(200, json!({"status": "WARNING", "alpha": "A1"}));
        assert!(matches!(classify(&warned), PollStep::Complete(_)));
        let failed = ApiResponse::new(200, json!({"status": "ERROR", "message": "bad"}));
        assert!(matches!(classify(&failed), PollStep::Failed(_)));
    }

    #[test]
    fn missing_wait_and_status_is_not_ready() {
        assert_eq!(classify(&ApiResponse::new(200, json!({}))), PollStep::NotReady);
        assert_eq!(
            classify(&ApiResponse::new(200, json!({"status": "RUNNING"}))),
            PollStep::NotReady
        );
        let zero_wait = ApiResponse::new(200, json!({"status": "COMPLETE"})).with_retry_after(0.0);
        assert!(matches!(classify(&zero_wait), PollStep::Complete(_)));
    }

    #[test]
    fn oversized_retry_after_is_a_transport_failure() {
        let response = ApiResponse::new(200, json!({})).with_retry_after(1e20);
        assert_eq!(classify(&response), PollStep::TransportFailure(200));
        let infinite = ApiResponse::new(200, json!({})).with_retry_after(f64::INFINITY);
        assert_eq!(classify(&infinite), PollStep::TransportFailure(200));
    }

    #[test]
    fn non_2xx_is_a_transport_failure() {
        assert_eq!(
            classify(&ApiResponse::new(502, Value::Null)),
            PollStep::TransportFailure(502)
        );
    }

    fn policy(max_poll_failures: u32) -> PollPolicy {
        PollPolicy {
            max_poll_failures,
            transport_retry_delay: Duration::from_secs(30),
            idle_poll_interval: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_transport_failures_are_tolerated() {
        let mock = MockSimulationApi::new();
        mock.script_get("/jobs/1", vec![
            Ok(ApiResponse::new(503, Value::Null)),
            Err(crate::errors::AlphaBatchError::transport("timeout")),
            Ok(ApiResponse::new(200, json!({})).with_retry_after(3.0)),
            Ok(ApiResponse::new(200, json!({"status": "COMPLETE", "alpha": "A9"}))),
        ]);
        let outcome = poll_job(&mock, "/jobs/1", &policy(2)).await;
        assert_eq!(outcome, JobOutcome::Complete(json!({"status": "COMPLETE", "alpha": "A9"})));
    }

    #[tokio::test(start_paused = true)]
    async fn third_transport_failure_fails_the_job() {
        let mock = MockSimulationApi::new();
        mock.script_get("/jobs/2", vec![
            Ok(ApiResponse::new(503, Value::Null)),
            Ok(ApiResponse::new(503, Value::Null)),
            Ok(ApiResponse::new(503, Value::Null)),
            Ok(ApiResponse::new(200, json!({"status": "COMPLETE"}))),
        ]);
        let outcome = poll_job(&mock, "/jobs/2", &policy(2)).await;
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_budget_is_configurable() {
        let mock = MockSimulationApi::new();
        mock.script_get("/jobs/3", vec![
            Ok(ApiResponse::new(503, Value::Null)),
            Ok(ApiResponse::new(200, json!({"status": "COMPLETE"}))),
        ]);
        let outcome = poll_job(&mock, "/jobs/3", &policy(0)).await;
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn server_wait_is_honoured_without_escalation() {
        let mock = MockSimulationApi::new();
        mock.script_get("/jobs/4", vec![
            Ok(ApiResponse::new(200, json!({})).with_retry_after(4.0)),
            Ok(ApiResponse::new(200, json!({})).with_retry_after(4.0)),
            Ok(ApiResponse::new(200, json!({"status": "COMPLETE"}))),
        ]);
        let started = tokio::time::Instant::now();
        let outcome = poll_job(&mock, "/jobs/4", &policy(2)).await;
        assert!(matches!(outcome, JobOutcome::Complete(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_until_ready_loops_on_header_only() {
        let mock = MockSimulationApi::new();
        mock.script_get("/alphas/A1/check", vec![
            Ok(ApiResponse::new(200, Value::Null).with_retry_after(1.0)),
            Ok(ApiResponse::new(200, json!({"is": {"checks": []}}))),
        ]);
        let response = fetch_until_ready(&mock, "/alphas/A1/check").await.unwrap();
        assert_eq!(response.body, json!({"is": {"checks": []}}));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_until_ready_rejects_oversized_wait() {
        let mock = MockSimulationApi::new();
        mock.script_get("/alphas/A2", vec![
            Ok(ApiResponse::new(200, Value::Null).with_retry_after(1e20)),
        ]);
        let err = fetch_until_ready(&mock, "/alphas/A2").await.unwrap_err();
        assert!(err.to_string().contains("Retry-After"));
        assert!(!err.is_fatal());
    }
}
