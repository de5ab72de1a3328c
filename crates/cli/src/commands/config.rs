use clap::{Args, Subcommand};

use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the live detector configuration.
    Show,
    /// Update fields of the detector configuration.
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        /// Counting window, minutes (5-120).
        #[arg(long)]
        time_window_minutes: Option<u32>,
        /// Sightings required inside the window (>= 5).
        #[arg(long)]
        threshold_count: Option<u32>,
        /// Maximum burst span, fractional minutes (0.5-30).
        #[arg(long)]
        time_span_threshold_minutes: Option<f64>,
        /// Idle hours before a dynamic rule expires (>= 1).
        #[arg(long)]
        expiration_hours: Option<u32>,
        /// Idle bound for last-hit reporting, hours (>= 1).
        #[arg(long)]
        last_hit_threshold_hours: Option<u32>,
    },
}

pub async fn execute(
    store: SqliteStore,
    args: ConfigArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let repo = store.detector_config();

    match args.command {
        ConfigCommand::Show => {
            let config = repo.load().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => {
                    println!("enabled                   = {}", config.enabled);
                    println!("timeWindowMinutes         = {}", config.time_window_minutes);
                    println!("thresholdCount            = {}", config.threshold_count);
                    println!(
                        "timeSpanThresholdMinutes  = {}",
                        config.time_span_threshold_minutes
                    );
                    println!("expirationHours           = {}", config.expiration_hours);
                    println!(
                        "lastHitThresholdHours     = {}",
                        config.last_hit_threshold_hours
                    );
                }
            }
        }
        ConfigCommand::Set {
            enabled,
            time_window_minutes,
            threshold_count,
            time_span_threshold_minutes,
            expiration_hours,
            last_hit_threshold_hours,
        } => {
            let mut config = repo.load().await?;
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(minutes) = time_window_minutes {
                config.time_window_minutes = minutes;
            }
            if let Some(count) = threshold_count {
                config.threshold_count = count;
            }
            if let Some(span) = time_span_threshold_minutes {
                config.time_span_threshold_minutes = span;
            }
            if let Some(hours) = expiration_hours {
                config.expiration_hours = hours;
            }
            if let Some(hours) = last_hit_threshold_hours {
                config.last_hit_threshold_hours = hours;
            }

            config.validate()?;
            repo.save(&config).await?;
            println!("configuration saved");
        }
    }
    Ok(())
}
