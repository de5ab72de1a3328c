use chrono::Utc;
use clap::{Args, Subcommand};

use mailsieve_monitor::SignalMonitor;
use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(subcommand)]
    command: MonitorCommand,
}

#[derive(Subcommand, Debug)]
enum MonitorCommand {
    /// List signal states (dead first, then weak, then active).
    List,
    /// Show recent alerts.
    Alerts {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

pub async fn execute(
    store: SqliteStore,
    args: MonitorArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match args.command {
        MonitorCommand::List => {
            let statuses = SignalMonitor::new(store.monitor())
                .list_statuses(Utc::now())
                .await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
                OutputFormat::Text => {
                    for status in statuses {
                        let gap = status
                            .gap_minutes
                            .map_or_else(|| "never seen".to_owned(), |g| format!("{g}m ago"));
                        println!(
                            "{:<6} {} ({}) last={} 1h={} 12h={} 24h={}",
                            status.state.as_str(),
                            status.rule.name,
                            status.rule.merchant,
                            gap,
                            status.count_1h,
                            status.count_12h,
                            status.count_24h,
                        );
                    }
                }
            }
        }
        MonitorCommand::Alerts { limit } => {
            let alerts = store.monitor().recent_alerts(limit).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&alerts)?),
                OutputFormat::Text => {
                    for alert in alerts {
                        println!(
                            "{} {} {} -> {} gap={}m: {}",
                            alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                            alert.kind.as_str(),
                            alert.previous_state.as_str(),
                            alert.current_state.as_str(),
                            alert.gap_minutes,
                            alert.message,
                        );
                    }
                }
            }
        }
    }
    Ok(())
}
