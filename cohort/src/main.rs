use std::path::PathBuf;

use clap::Parser;
use cohort::{cohort::Cohort, config::CohortConfig};
use host_core::stat::SurveySeries;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Parser)]
struct Args {
    /// path of a TOML configuration file (defaults are used without one)
    #[arg(long)]
    config: Option<PathBuf>,
    /// resume from this checkpoint instead of starting a new cohort
    #[arg(long)]
    resume: Option<PathBuf>,
    /// write a checkpoint here when the run ends
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// write the survey series here as an Arrow IPC file
    #[arg(long)]
    output: Option<PathBuf>,
    /// number of days to simulate, overriding the configuration
    #[arg(long)]
    days: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => CohortConfig::from_file(path)?,
        None => CohortConfig::default(),
    };
    let mut cohort = match &args.resume {
        Some(path) => {
            let cohort = Cohort::load(path)?;
            tracing::info!("resumed {} hosts at day {}", cohort.hosts().len(), cohort.day());
            cohort
        }
        None => Cohort::new(&config),
    };

    let days = args.days.unwrap_or(config.days);
    let mut series = SurveySeries::default();
    for _ in 0..days {
        cohort.step(&config)?;
        if cohort.day() % config.survey_interval == 0 {
            let survey = cohort.survey(&config);
            tracing::info!("{}", serde_json::to_string(&survey.total())?);
            series.push(&survey);
        }
    }

    if let Some(path) = &args.output {
        series.export(path)?;
        tracing::info!("wrote {} surveys to {}", series.len(), path.display());
    }
    if let Some(path) = &args.checkpoint {
        cohort.save(path)?;
        tracing::info!("saved checkpoint at day {} to {}", cohort.day(), path.display());
    }
    Ok(())
}
