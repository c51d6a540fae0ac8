use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use fee_market_sim::prelude::*;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Pretty,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Csv => Format::CSV,
            OutputFormat::Pretty => Format::PrettyPrint,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "fee-sweep",
    about = "Sweep fee-market policies over historical blocks and report \
             miner deviation rates",
    version
)]
struct Cli {
    /// TOML run configuration.
    #[arg(long, value_name = "PATH", default_value = "config/default.toml")]
    config: PathBuf,

    /// Block feed CSV.
    #[arg(long, value_name = "PATH")]
    blocks: PathBuf,

    /// Daily miner cost CSV.
    #[arg(long, value_name = "PATH")]
    costs: PathBuf,

    /// Directory under which a `run_id=<unix time>` directory is created.
    #[arg(long, value_name = "DIR", default_value = "results")]
    out_dir: PathBuf,

    /// Format of the tables printed to stdout. Files are always CSV.
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Overrides `sweep.top_miners` of the configuration.
    #[arg(long, value_name = "N")]
    top_miners: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "fee_market_sim=info,fee_sweep=info".to_string()
            }),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SimConfig::from_path(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    if let Some(n) = cli.top_miners {
        config.sweep.top_miners = n;
        config.validate().context("invalid --top-miners")?;
    }

    let feed = BlockFeed::from_path(&cli.blocks)
        .with_context(|| {
            format!("loading block feed {}", cli.blocks.display())
        })?;
    let prices = feed.price_index().with_context(|| {
        format!(
            "block feed {} has no btc_usd prices to convert miner costs",
            cli.blocks.display()
        )
    })?;

    let table = CostTable::from_path(&cli.costs)
        .with_context(|| {
            format!("loading daily costs {}", cli.costs.display())
        })?;
    let miners = table
        .top_by_share(config.sweep.top_miners, &prices)
        .context("selecting miners by hash-power share")?;
    let table = table
        .restricted_to(&miners)
        .context("restricting daily costs to the selected miners")?;
    let costs = CostResolver::new(&table, &prices);

    tracing::info!(
        miners = miners.len(),
        cost_entries = costs.len(),
        mean_btc_usd = prices.mean(),
        "selected miners"
    );

    let sweep = ExperimentSweep::new(
        RunParams::from(&config),
        &SweepGrid::from(&config),
        Arc::new(feed),
        Arc::new(costs),
        miners,
    )
    .context("preparing sweep")?;

    let results = sweep.run_all();

    let run_dir = write_outputs(&cli.out_dir, &cli.config, results.clone())?;
    tracing::info!(dir = %run_dir.display(), "wrote results");

    let results = results.with_format(cli.format.into());
    println!("{}", results.summary());

    Ok(())
}

/// Writes the results, summary, miner values and a copy of the configuration
/// to a fresh run directory under `out_dir`.
fn write_outputs(
    out_dir: &Path,
    config_path: &Path,
    results: ResultsTable,
) -> Result<PathBuf> {
    let run_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_secs();
    let run_dir = out_dir.join(format!("run_id={}", run_id));
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let results = results.with_format(Format::CSV);
    let files = [
        ("results.csv", results.to_string()),
        ("summary.csv", results.summary().to_string()),
        ("miners.csv", results.miner_values().to_string()),
    ];
    for (name, contents) in files {
        let path = run_dir.join(name);
        fs::write(&path, contents + "\n")
            .with_context(|| format!("writing {}", path.display()))?;
    }

    let config_copy = run_dir.join("config.toml");
    fs::copy(config_path, &config_copy)
        .with_context(|| {
            format!("copying config to {}", config_copy.display())
        })?;

    Ok(run_dir)
}
