//! psync-agent: reconciles declared identity policies with the remote control plane.
//!
//! Each run:
//! - Loads the manifest and the tracked state file
//! - Refreshes every tracked policy and decides create/update/replace/delete
//! - Drives each change to its target state through the lifecycle driver
//! - Saves the state file as the pass goes, on failures and on SIGINT/SIGTERM,
//!   so the next run can resume

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use psync_agent::{
    HttpIdentityClient, Manifest, PolicyReconciler, StateStore, SyncReport, SyncState, Syncer,
};
use psync_core::{Driver, DriverConfig};
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// psync agent
#[derive(Parser, Debug)]
#[command(name = "psync-agent", version, about)]
struct Args {
    /// Identity API endpoint
    #[arg(
        long,
        env = "PSYNC_ENDPOINT",
        default_value = "https://identity.us-ashburn-1.oraclecloud.com"
    )]
    endpoint: String,

    /// Bearer token for the identity API
    #[arg(long, env = "PSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// State file tracking managed policies
    #[arg(long, default_value = "psync.state.json")]
    state: PathBuf,

    /// Deadline in seconds for each create/update/delete polling phase
    #[arg(long, default_value = "900")]
    timeout: u64,

    /// Initial poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Maximum poll interval in milliseconds
    #[arg(long, default_value = "10000")]
    max_poll_interval_ms: u64,

    /// Not-found answers tolerated while a new policy becomes visible
    #[arg(long, default_value = "20")]
    not_found_checks: u32,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Policies reconciled concurrently
    #[arg(long, default_value = "4")]
    concurrency: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the manifest with the remote policies
    Apply {
        /// Manifest with the declared policies
        #[arg(long, short)]
        manifest: PathBuf,
    },
    /// Show what apply would do without writing anything
    Plan {
        /// Manifest with the declared policies
        #[arg(long, short)]
        manifest: PathBuf,
    },
    /// Track an existing remote policy under a manifest key
    Import {
        /// Manifest key
        key: String,
        /// Remote policy ID
        policy_id: String,
    },
    /// Delete every tracked policy
    Destroy,
}

impl Args {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig::default()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_poll_interval(
                Duration::from_millis(self.poll_interval_ms),
                Duration::from_millis(self.max_poll_interval_ms),
            )
            .with_not_found_checks(self.not_found_checks)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "psync_agent=info,psync_core=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting psync-agent");
    info!("Identity endpoint: {}", args.endpoint);

    let client = HttpIdentityClient::new(
        &args.endpoint,
        args.token.clone(),
        Duration::from_secs(args.request_timeout),
    )
    .context("Failed to create identity client")?;
    let reconciler = PolicyReconciler::new(Arc::new(client), Driver::new(args.driver_config()));
    let store = StateStore::new(&args.state);
    let syncer = Syncer::new(reconciler, args.concurrency).with_store(store.clone());

    let mut state = store
        .load()
        .await
        .with_context(|| format!("Failed to load state from {}", store.path().display()))?;

    match &args.command {
        Command::Apply { manifest } => {
            let manifest = Manifest::load(manifest)
                .await
                .context("Failed to load manifest")?;
            let report = run_pass(&syncer, &manifest, &mut state, &store).await?;
            store.save(&state).await.context("Failed to save state")?;

            for (new, old) in &report.moved {
                println!("{:<32} moved from {}", new, old);
            }
            for (key, outcome) in &report.outcomes {
                println!("{:<32} {}", key, outcome);
            }
            for key in &report.deleted {
                println!("{:<32} deleted", key);
            }
            if !report.is_success() {
                for (key, reason) in &report.failures {
                    println!("{:<32} FAILED: {}", key, reason);
                }
                bail!("{} policies failed to reconcile", report.failures.len());
            }
        }
        Command::Plan { manifest } => {
            let manifest = Manifest::load(manifest)
                .await
                .context("Failed to load manifest")?;
            let plan = syncer.plan(&manifest, &state).await;

            for (new, old) in &plan.moved {
                println!("{:<32} move from {}", new, old);
            }
            for (key, action) in &plan.actions {
                println!("{:<32} {}", key, action);
            }
            if !plan.has_changes() {
                println!("No changes.");
            }
            if !plan.failures.is_empty() {
                for (key, reason) in &plan.failures {
                    println!("{:<32} FAILED: {}", key, reason);
                }
                bail!("{} policies could not be planned", plan.failures.len());
            }
        }
        Command::Import { key, policy_id } => {
            syncer
                .import(key, policy_id, &mut state)
                .await
                .with_context(|| format!("Failed to import policy {}", policy_id))?;
            store.save(&state).await.context("Failed to save state")?;
            println!("Imported {} as {}", policy_id, key);
        }
        Command::Destroy => {
            if state.policies.is_empty() {
                warn!("No tracked policies");
            }
            let report = run_pass(&syncer, &Manifest::default(), &mut state, &store).await?;
            store.save(&state).await.context("Failed to save state")?;

            for key in &report.deleted {
                println!("{:<32} deleted", key);
            }
            if !report.is_success() {
                bail!("{} policies failed to delete", report.failures.len());
            }
        }
    }

    Ok(())
}

/// Run one pass. On SIGINT or SIGTERM the pass is abandoned and the state
/// saved, so the next run resumes from the ids bound so far.
async fn run_pass(
    syncer: &Syncer<HttpIdentityClient>,
    manifest: &Manifest,
    state: &mut SyncState,
    store: &StateStore,
) -> Result<SyncReport> {
    let mut sigterm = signal::unix::signal(SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    let received = tokio::select! {
        report = syncer.apply(manifest, state) => return Ok(report),
        _ = signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };

    warn!("Received {}, saving state before exit", received);
    store.save(state).await.context("Failed to save state")?;
    bail!("Interrupted by {}", received)
}
