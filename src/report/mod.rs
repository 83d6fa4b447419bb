//! Reporting utilities for summarising batch runs.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::AlphaAnalysis;
use crate::errors::Result;
use crate::model::AlphaResult;

/// Counts for one processed manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub manifest: PathBuf,
    /// Requests in the manifest.
    pub total: usize,
    /// Requests whose slot completed during this run.
    pub successful: usize,
    /// Requests whose slot failed during this run.
    pub failed: usize,
    /// Requests already in the checkpoint before the run.
    pub skipped: usize,
    pub produced_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    /// Summary for a manifest that had nothing left to do.
    pub fn skipped(manifest: &Path, total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            manifest: manifest.to_path_buf(),
            total,
            successful: 0,
            failed: 0,
            skipped: total,
            produced_ids: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Seconds between start and finish.
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: total={} successful={} failed={} skipped={} alphas={} in {:.1}s",
            self.manifest.display(),
            self.total,
            self.successful,
            self.failed,
            self.skipped,
            self.produced_ids.len(),
            self.elapsed_secs()
        )
    }
}

/// Everything one run produced, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub summaries: Vec<BatchSummary>,
    /// Manifests that could not be loaded, with the reason.
    pub skipped_manifests: Vec<(PathBuf, String)>,
    pub results: Vec<AlphaResult>,
    pub analyses: Vec<AlphaAnalysis>,
}

impl RunReport {
    pub fn total_successful(&self) -> usize {
        self.summaries.iter().map(|summary| summary.successful).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.summaries.iter().map(|summary| summary.failed).sum()
    }

    /// Whether every attempted request completed.
    pub fn is_clean(&self) -> bool {
        self.total_failed() == 0 && self.skipped_manifests.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} manifests processed, {} skipped: {} successful, {} failed",
            self.summaries.len(),
            self.skipped_manifests.len(),
            self.total_successful(),
            self.total_failed()
        )?;
        for summary in &self.summaries {
            writeln!(f, "  {}", summary)?;
        }
        for (manifest, reason) in &self.skipped_manifests {
            writeln!(f, "  {}: skipped ({})", manifest.display(), reason)?;
        }
        Ok(())
    }
}

/// Summary row used when exporting produced alphas.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub alpha_id: String,
    #[serde(rename = "type")]
    pub alpha_type: String,
    pub region: String,
    pub universe: String,
    pub delay: u8,
    pub expression: String,
    pub status: String,
    pub completed_at: String,
}

impl From<&AlphaResult> for ResultRow {
    fn from(result: &AlphaResult) -> Self {
        Self {
            alpha_id: result.id.clone(),
            alpha_type: result.alpha_type.as_str().to_string(),
            region: result.settings.region.clone(),
            universe: result.settings.universe.clone(),
            delay: result.settings.delay,
            expression: result.payload.describe(),
            status: result.status.clone(),
            completed_at: result.completed_at.to_rfc3339(),
        }
    }
}

/// Append produced alphas to a CSV file; the header is written only when the file is new.
pub fn write_results_csv<P: AsRef<Path>>(path: P, results: &[AlphaResult]) -> Result<()> {
    let path = path.as_ref();
    let is_new = std::fs::metadata(path).map(|meta| meta.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for result in results {
        writer.serialize(ResultRow::from(result))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SimulationRequest, SimulationSettings};
    use serde_json::json;

    fn result(id: &str) -> AlphaResult {
        let request = SimulationRequest::regular("rank(close)", SimulationSettings::default());
        AlphaResult::from_document(&request, id, &json!({"id": id, "status": "UNSUBMITTED"}))
    }

    #[test]
    fn summary_displays_counts() {
        let started = Utc::now();
        let summary = BatchSummary {
            manifest: PathBuf::from("batch.json"),
            total: 12,
            successful: 10,
            failed: 2,
            skipped: 0,
            produced_ids: vec!["A1".to_string()],
            started_at: started,
            finished_at: started,
        };
        let text = summary.to_string();
        assert!(text.contains("total=12"));
        assert!(text.contains("failed=2"));
    }

    #[test]
    fn csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results_csv(&path, &[result("A1")]).unwrap();
        write_results_csv(&path, &[result("A2"), result("A3")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "alpha_id,type,region,universe,delay,expression,status,completed_at"
        );
        assert!(lines[1].starts_with("A1,REGULAR,USA,TOP3000,1,rank(close),UNSUBMITTED,"));
        assert!(lines[3].starts_with("A3,"));
    }
}
