use anyhow::{Context, Result};
use clap::Parser;
use commonware_cryptography::{ed25519::PrivateKey, Signer};
use commonware_runtime::{tokio, Runner};
use futures::future::join_all;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;
use tracing::{info, warn};
use veiled_simulator::{run_session, Config, Network};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load config
    let config_file = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Could not read config file {}", args.config.display()))?;
    let config: Config =
        serde_yaml::from_str(&config_file).context("Could not parse config file")?;
    let config = config.validate().context("Invalid config")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();
    info!(?config, "loaded config file");

    // Initialize runtime
    let cfg = tokio::Config::default().with_worker_threads(config.worker_threads);
    let executor = tokio::Runner::new(cfg);

    // Start runtime
    executor.start(|context| async move {
        let network = Network::new(
            context.clone(),
            config.seed,
            config.committee_size,
            Some(config.threshold),
        )
        .context("Failed to deal committee")?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let sessions: Vec<_> = (0..config.participants as u64)
            .map(|i| {
                let wallet = PrivateKey::from_seed(config.seed.wrapping_add(i + 1));
                let target = (rng.gen(), rng.gen());
                run_session(context.clone(), &network, wallet, target)
            })
            .collect();

        let mut failed = 0;
        for report in join_all(sessions).await {
            match report {
                Ok(report) => info!(
                    participant = ?report.participant,
                    position = ?report.position,
                    target = ?report.target,
                    building = ?report.building,
                    "session complete"
                ),
                Err(err) => {
                    failed += 1;
                    warn!(%err, "session failed");
                }
            }
        }
        info!(
            sessions = config.participants,
            failed,
            height = network.ledger.height().await,
            "simulation finished"
        );
        Ok::<(), anyhow::Error>(())
    })
}
