//! Serial processing of manifests.
//!
//! Each manifest goes through load, checkpoint filter, packing, dispatch and
//! optional analysis before the next one starts. A manifest that cannot be
//! parsed is skipped; only fatal session errors end the run early.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::analyzer::Analyzer;
use crate::checkpoint::CheckpointStore;
use crate::config::BatchConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::fingerprint::filter_pending;
use crate::manifest::load_manifest;
use crate::packer::{pack, shuffle_pending, PackPlan};
use crate::report::{write_results_csv, BatchSummary, RunReport};
use crate::session::SessionManager;

pub struct BatchOrchestrator {
    session: Arc<SessionManager>,
    config: BatchConfig,
    results_csv: Option<PathBuf>,
}

impl BatchOrchestrator {
    pub fn new(session: Arc<SessionManager>, config: BatchConfig) -> Self {
        Self {
            session,
            config: config.validated(),
            results_csv: None,
        }
    }

    /// Append every produced alpha to this CSV file after each manifest.
    pub fn with_results_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_csv = Some(path.into());
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process `manifests` in order.
    pub async fn run(&self, manifests: &[PathBuf]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for (position, manifest) in manifests.iter().enumerate() {
            info!(
                "Manifest {}/{}: {}",
                position + 1,
                manifests.len(),
                manifest.display()
            );
            if let Err(e) = self.process_manifest(manifest, &mut report).await {
                error!("Stopping run at {}: {}", manifest.display(), e);
                return Err(e);
            }
        }
        info!(
            "Run finished: {} successful, {} failed, {} manifests skipped",
            report.total_successful(),
            report.total_failed(),
            report.skipped_manifests.len()
        );
        Ok(report)
    }

    async fn process_manifest(&self, manifest: &Path, report: &mut RunReport) -> Result<()> {
        let started_at = Utc::now();
        let entries = match load_manifest(manifest) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping manifest: {}", e);
                report
                    .skipped_manifests
                    .push((manifest.to_path_buf(), e.to_string()));
                return Ok(());
            }
        };

        let checkpoint = Arc::new(CheckpointStore::for_manifest(
            manifest,
            &self.config.checkpoint_suffix,
        ));
        let completed = checkpoint.load();
        let mut pending = filter_pending(&entries, &completed);
        let skipped = entries.len() - pending.len();
        info!(
            "{} requests, {} already completed, {} pending",
            entries.len(),
            skipped,
            pending.len()
        );

        if pending.is_empty() {
            info!("Nothing to do for {}", manifest.display());
            report
                .summaries
                .push(BatchSummary::skipped(manifest, entries.len(), started_at));
            return Ok(());
        }

        if self.config.shuffle {
            let seed = self.config.shuffle_seed.unwrap_or_else(rand::random);
            info!("Shuffling pending requests (seed {})", seed);
            shuffle_pending(&mut pending, seed);
        }

        let plan = match self.config.fan_in() {
            Some(k) => PackPlan::multi(k, self.config.min_multi_batch),
            None => PackPlan::single(),
        };
        let (_, slots) = pack(pending, plan);

        let dispatcher = Dispatcher::new(self.session.clone(), checkpoint, &self.config);
        let dispatch = dispatcher.run(slots).await?;
        let results = dispatch.results();

        if self.config.analysis.is_enabled() {
            let analyzer = Analyzer::new(self.session.clone(), self.config.analysis.clone());
            report.analyses.extend(analyzer.analyze(&results).await?);
        }

        if let Some(path) = &self.results_csv {
            if let Err(e) = write_results_csv(path, &results) {
                warn!("Cannot export results to {}: {}", path.display(), e);
            }
        }

        let summary = BatchSummary {
            manifest: manifest.to_path_buf(),
            total: entries.len(),
            successful: dispatch.successful_alphas(),
            failed: dispatch.failed_alphas(),
            skipped,
            produced_ids: dispatch.produced_ids(),
            started_at,
            finished_at: Utc::now(),
        };
        info!("{}", summary);
        report.summaries.push(summary);
        report.results.extend(results);
        Ok(())
    }
}
