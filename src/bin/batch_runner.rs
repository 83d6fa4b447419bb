//! Batch runner: submit every manifest's pending simulations and resume from checkpoints.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use alpha_batch_sim::api::HttpSimulationApi;
use alpha_batch_sim::config::{
    AnalysisConfig, ApiConfig, BatchConfig, Credentials, BASE_URL_ENV, DEFAULT_ALPHAS_PER_SLOT,
    DEFAULT_BASE_URL, EMAIL_ENV, PASSWORD_ENV,
};
use alpha_batch_sim::errors::{AlphaBatchError, Result};
use alpha_batch_sim::logging::init_logging;
use alpha_batch_sim::manifest::read_manifest_list;
use alpha_batch_sim::orchestrator::BatchOrchestrator;
use alpha_batch_sim::report::RunReport;
use alpha_batch_sim::session::SessionManager;

#[derive(Parser)]
#[command(name = "batch-runner")]
#[command(about = "Resumable batch alpha simulation against the simulation platform")]
struct Args {
    /// Text file listing one manifest path per line
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Manifest JSON files, processed after those of --manifest
    manifests: Vec<PathBuf>,

    /// Platform account email
    #[arg(long, env = EMAIL_ENV)]
    username: String,

    /// Platform account password
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    password: String,

    /// Number of concurrent slots (1-8)
    #[arg(long, default_value_t = 3)]
    concurrent: usize,

    /// Pack several alphas into one multi-simulation
    #[arg(long)]
    multi_sim: bool,

    /// Alphas per multi-simulation (2-10)
    #[arg(long, default_value_t = DEFAULT_ALPHAS_PER_SLOT)]
    alphas_per_slot: usize,

    /// Below this many pending alphas multi-simulation is skipped (0 disables)
    #[arg(long, default_value_t = 0)]
    min_multi_batch: usize,

    /// Platform API root
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Client-side timeout for every platform call, in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout: u64,

    /// Tag applied to every produced alpha (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Fetch the PnL recordset of each produced alpha
    #[arg(long)]
    get_pnl: bool,

    /// Fetch the yearly statistics of each produced alpha
    #[arg(long)]
    get_stats: bool,

    /// Run the platform submission checks (replaces the correlation checks)
    #[arg(long)]
    check_submission: bool,

    #[arg(long)]
    check_self_corr: bool,

    #[arg(long)]
    check_prod_corr: bool,

    /// Correlation limit for the correlation checks
    #[arg(long, default_value_t = 0.7)]
    corr_threshold: f64,

    /// Append produced alphas to this CSV file
    #[arg(long)]
    results_csv: Option<PathBuf>,

    /// Shuffle pending alphas before packing
    #[arg(long)]
    shuffle: bool,

    /// Seed for --shuffle
    #[arg(long, requires = "shuffle")]
    seed: Option<u64>,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn manifest_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = match &self.manifest {
            Some(list) => read_manifest_list(list)?,
            None => Vec::new(),
        };
        paths.extend(self.manifests.iter().cloned());
        if paths.is_empty() {
            return Err(AlphaBatchError::config_error(
                "no manifests given; pass --manifest <list> or manifest paths",
            ));
        }
        Ok(paths)
    }

    fn batch_config(&self) -> BatchConfig {
        let mut config = BatchConfig::new(self.concurrent)
            .with_alpha_tags(self.tags.clone())
            .with_analysis(AnalysisConfig {
                get_pnl: self.get_pnl,
                get_stats: self.get_stats,
                check_submission: self.check_submission,
                check_self_corr: self.check_self_corr,
                check_prod_corr: self.check_prod_corr,
                correlation_threshold: self.corr_threshold,
            });
        if self.multi_sim {
            config = config
                .with_multi_sim(self.alphas_per_slot)
                .with_min_multi_batch(self.min_multi_batch);
        }
        if self.shuffle {
            config = config.with_shuffle(self.seed);
        }
        config
    }
}

async fn run(args: Args) -> Result<RunReport> {
    let manifests = args.manifest_paths()?;
    let credentials = Credentials::new(args.username.clone(), args.password.clone()).validated()?;
    let api = HttpSimulationApi::new(
        &ApiConfig::default()
            .with_base_url(args.base_url.clone())
            .with_request_timeout(Duration::from_secs(args.request_timeout.max(1))),
    )?;
    info!("Using {}", api.base_url());

    let config = args.batch_config();
    let session = Arc::new(SessionManager::new(
        Arc::new(api),
        credentials,
        config.session.clone(),
    ));
    session.login().await?;

    let mut orchestrator = BatchOrchestrator::new(session, config);
    if let Some(path) = &args.results_csv {
        orchestrator = orchestrator.with_results_csv(path.clone());
    }
    orchestrator.run(&manifests).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose) {
        eprintln!("{}", e);
    }

    tokio::select! {
        outcome = run(args) => match outcome {
            Ok(report) => {
                print!("{}", report);
                if report.is_clean() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => {
                error!("[{}] {}", e.category(), e);
                eprintln!("{}", e.user_message());
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; completed slots are checkpointed, rerun to resume");
            ExitCode::from(130)
        }
    }
}
