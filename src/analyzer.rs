//! Post-completion analysis of produced alphas.
//!
//! Every endpoint here may answer with a `Retry-After` header while the
//! platform is still computing; those calls go through
//! [`fetch_until_ready`]. A failed call for one alpha is logged and leaves
//! that part of its [`AlphaAnalysis`] empty.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::api::SharedApi;
use crate::config::AnalysisConfig;
use crate::errors::{AlphaBatchError, Result};
use crate::model::AlphaResult;
use crate::poller::fetch_until_ready;
use crate::session::SessionManager;

/// Number of alphas analyzed concurrently.
pub const ANALYSIS_WORKERS: usize = 3;

/// Tabular payload of the recordset and correlation endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSet {
    pub columns: Vec<String>,
    pub records: Vec<Vec<Value>>,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

impl RecordSet {
    /// Parse `{schema: {properties: [{name}]}, records: [[...]], max, min}`.
    /// `None` when the body carries no records at all.
    pub fn from_body(body: &Value) -> Option<Self> {
        let records = body.get("records")?.as_array()?;
        let columns = body
            .pointer("/schema/properties")
            .and_then(Value::as_array)
            .map(|properties| {
                properties
                    .iter()
                    .filter_map(|property| property.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            columns,
            records: records
                .iter()
                .map(|row| row.as_array().cloned().unwrap_or_default())
                .collect(),
            max: body.get("max").and_then(Value::as_f64),
            min: body.get("min").and_then(Value::as_f64),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Numeric cell of `row` in column `name`.
    pub fn number(&self, row: usize, name: &str) -> Option<f64> {
        let index = self.column_index(name)?;
        self.records.get(row)?.get(index)?.as_f64()
    }

    /// Largest numeric value of column `name` over rows accepted by `keep`.
    pub fn column_max(&self, name: &str, keep: impl Fn(usize) -> bool) -> Option<f64> {
        (0..self.len())
            .filter(|&row| keep(row))
            .filter_map(|row| self.number(row, name))
            .fold(None, |acc: Option<f64>, value| Some(acc.map_or(value, |m| m.max(value))))
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CheckVerdict {
    Pass,
    Fail,
    /// Nothing to compare against.
    None,
    /// Any other status the platform reports, e.g. `PENDING` or `WARNING`.
    Other(String),
}

impl CheckVerdict {
    fn from_platform(result: &str) -> Self {
        match result.to_ascii_uppercase().as_str() {
            "PASS" => CheckVerdict::Pass,
            "FAIL" => CheckVerdict::Fail,
            "NONE" => CheckVerdict::None,
            other => CheckVerdict::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CheckVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckVerdict::Pass => write!(f, "PASS"),
            CheckVerdict::Fail => write!(f, "FAIL"),
            CheckVerdict::None => write!(f, "NONE"),
            CheckVerdict::Other(status) => write!(f, "{}", status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub alpha_id: String,
    pub test: String,
    pub verdict: CheckVerdict,
    pub limit: Option<f64>,
    pub value: Option<f64>,
}

/// Self-correlation: PASS when the largest correlation is strictly below the
/// threshold, or when there are no records to compare.
pub fn self_correlation_verdict(records: Option<&RecordSet>, threshold: f64) -> (CheckVerdict, Option<f64>) {
    let value = records
        .filter(|set| !set.is_empty())
        .and_then(|set| set.column_max("correlation", |_| true));
    match value {
        None => (CheckVerdict::Pass, Some(0.0)),
        Some(value) if value < threshold => (CheckVerdict::Pass, Some(value)),
        Some(value) => (CheckVerdict::Fail, Some(value)),
    }
}

/// Production correlation: the largest `max` over rows with `alphas > 0`
/// must not exceed the threshold. NONE when no such row exists.
pub fn prod_correlation_verdict(records: Option<&RecordSet>, threshold: f64) -> (CheckVerdict, Option<f64>) {
    let value = records.and_then(|set| {
        set.column_max("max", |row| set.number(row, "alphas").map_or(false, |n| n > 0.0))
    });
    match value {
        None => (CheckVerdict::None, None),
        Some(value) if value <= threshold => (CheckVerdict::Pass, Some(value)),
        Some(value) => (CheckVerdict::Fail, Some(value)),
    }
}

/// Parse the `is.checks` list of the submission check endpoint.
pub fn submission_checks(alpha_id: &str, body: &Value) -> Option<Vec<CheckResult>> {
    let checks = body.pointer("/is/checks")?.as_array()?;
    Some(
        checks
            .iter()
            .map(|check| CheckResult {
                alpha_id: alpha_id.to_string(),
                test: check
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                verdict: CheckVerdict::from_platform(
                    check.get("result").and_then(Value::as_str).unwrap_or("NONE"),
                ),
                limit: check.get("limit").and_then(Value::as_f64),
                value: check.get("value").and_then(Value::as_f64),
            })
            .collect(),
    )
}

/// Everything collected for one alpha.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlphaAnalysis {
    pub alpha_id: String,
    pub pnl: Option<RecordSet>,
    pub yearly_stats: Option<RecordSet>,
    pub checks: Vec<CheckResult>,
}

impl AlphaAnalysis {
    /// True when no enabled check came back FAIL.
    pub fn passed(&self) -> bool {
        !self.checks.iter().any(|check| check.verdict == CheckVerdict::Fail)
    }
}

#[derive(Clone)]
pub struct Analyzer {
    session: Arc<SessionManager>,
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(session: Arc<SessionManager>, config: AnalysisConfig) -> Self {
        Self { session, config }
    }

    /// Analyze every result on a small worker pool. Only fatal session errors are returned.
    pub async fn analyze(&self, results: &[AlphaResult]) -> Result<Vec<AlphaAnalysis>> {
        if !self.config.is_enabled() || results.is_empty() {
            return Ok(Vec::new());
        }
        info!("Analyzing {} alphas", results.len());

        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(results.iter().map(|result| result.id.clone()).collect()));
        let workers = ANALYSIS_WORKERS.min(results.len());
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = queue.clone();
            let analyzer = self.clone();
            handles.push(tokio::spawn(async move {
                let mut analyses = Vec::new();
                loop {
                    let next = queue
                        .lock()
                        .map_err(|_| AlphaBatchError::Worker("analysis queue lock poisoned".to_string()))?
                        .pop_front();
                    let Some(alpha_id) = next else {
                        break;
                    };
                    let api = analyzer.session.acquire().await?;
                    analyses.push(analyzer.analyze_alpha(&api, &alpha_id).await);
                }
                Ok::<_, AlphaBatchError>(analyses)
            }));
        }

        let mut analyses = Vec::with_capacity(results.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => analyses.extend(outcome?),
                Err(e) => error!("Analysis worker ended abnormally: {}", e),
            }
        }
        let order: Vec<&str> = results.iter().map(|result| result.id.as_str()).collect();
        analyses.sort_by_key(|analysis| {
            order
                .iter()
                .position(|id| *id == analysis.alpha_id)
                .unwrap_or(usize::MAX)
        });
        Ok(analyses)
    }

    /// Run every enabled call for one alpha.
    pub async fn analyze_alpha(&self, api: &SharedApi, alpha_id: &str) -> AlphaAnalysis {
        let mut analysis = AlphaAnalysis {
            alpha_id: alpha_id.to_string(),
            ..AlphaAnalysis::default()
        };

        if self.config.get_pnl {
            analysis.pnl = self
                .fetch(api, alpha_id, "recordsets/pnl")
                .await
                .and_then(|body| RecordSet::from_body(&body));
        }
        if self.config.get_stats {
            analysis.yearly_stats = self
                .fetch(api, alpha_id, "recordsets/yearly-stats")
                .await
                .and_then(|body| RecordSet::from_body(&body));
        }

        let threshold = self.config.correlation_threshold;
        if self.config.check_submission {
            match self.fetch(api, alpha_id, "check").await {
                Some(body) => match submission_checks(alpha_id, &body) {
                    Some(checks) => analysis.checks = checks,
                    None => warn!("Cannot check submission of alpha {}: {}", alpha_id, body),
                },
                None => warn!("Submission check for alpha {} unavailable", alpha_id),
            }
        } else {
            if self.config.check_self_corr {
                let records = self
                    .fetch(api, alpha_id, "correlations/self")
                    .await
                    .and_then(|body| RecordSet::from_body(&body));
                let (verdict, value) = self_correlation_verdict(records.as_ref(), threshold);
                analysis.checks.push(CheckResult {
                    alpha_id: alpha_id.to_string(),
                    test: "SELF_CORRELATION".to_string(),
                    verdict,
                    limit: Some(threshold),
                    value,
                });
            }
            if self.config.check_prod_corr {
                let records = self
                    .fetch(api, alpha_id, "correlations/prod")
                    .await
                    .and_then(|body| RecordSet::from_body(&body));
                let (verdict, value) = prod_correlation_verdict(records.as_ref(), threshold);
                analysis.checks.push(CheckResult {
                    alpha_id: alpha_id.to_string(),
                    test: "PROD_CORRELATION".to_string(),
                    verdict,
                    limit: Some(threshold),
                    value,
                });
            }
        }

        for check in &analysis.checks {
            debug!(
                "Alpha {} {}: {} (value {:?}, limit {:?})",
                alpha_id, check.test, check.verdict, check.value, check.limit
            );
        }
        info!(
            "Alpha {} analyzed: {} checks, {}",
            alpha_id,
            analysis.checks.len(),
            if analysis.passed() { "no failures" } else { "has failures" }
        );
        analysis
    }

    async fn fetch(&self, api: &SharedApi, alpha_id: &str, endpoint: &str) -> Option<Value> {
        let path = format!("/alphas/{}/{}", alpha_id, endpoint);
        match fetch_until_ready(api.as_ref(), &path).await {
            Ok(response) if response.is_success() => Some(response.body),
            Ok(response) => {
                warn!("{} returned status {}", path, response.status);
                None
            }
            Err(e) => {
                warn!("{} failed: {}", path, e);
                None
            }
        }
    }
}
