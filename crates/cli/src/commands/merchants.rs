use anyhow::{bail, Context};
use clap::{Args, Subcommand};

use mailsieve_core::{AnalysisStatus, MerchantId};
use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct MerchantsArgs {
    #[command(subcommand)]
    command: MerchantsCommand,
}

#[derive(Subcommand, Debug)]
enum MerchantsCommand {
    /// List merchants, optionally by analysis status.
    List {
        /// pending | active | ignored
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one merchant with its per-worker statuses.
    Show { merchant_id: String },
    /// Set the global analysis status.
    SetStatus {
        merchant_id: String,
        /// pending | active | ignored
        status: String,
    },
    /// Set a per-worker analysis status override.
    SetWorkerStatus {
        merchant_id: String,
        worker: String,
        /// pending | active | ignored
        status: String,
        #[arg(long)]
        display_name: Option<String>,
    },
}

pub async fn execute(
    store: SqliteStore,
    args: MerchantsArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let merchants = store.merchants();

    match args.command {
        MerchantsCommand::List { status } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let listed = merchants.list(status).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listed)?),
                OutputFormat::Text => {
                    for merchant in listed {
                        println!(
                            "{} {} [{}] campaigns={} emails={}",
                            merchant.id,
                            merchant.domain,
                            merchant.analysis_status.as_str(),
                            merchant.total_campaigns,
                            merchant.total_emails,
                        );
                    }
                }
            }
        }
        MerchantsCommand::Show { merchant_id } => {
            let id = parse_merchant_id(&merchant_id)?;
            let Some(merchant) = merchants.get(id).await? else {
                bail!("merchant not found: {id}");
            };
            let statuses = merchants.worker_statuses(id).await?;
            match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "merchant": merchant,
                            "workerStatuses": statuses,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{} {} [{}]",
                        merchant.id,
                        merchant.domain,
                        merchant.analysis_status.as_str()
                    );
                    for status in statuses {
                        println!(
                            "  worker {} -> {}",
                            status.worker_name,
                            status.analysis_status.as_str()
                        );
                    }
                }
            }
        }
        MerchantsCommand::SetStatus {
            merchant_id,
            status,
        } => {
            let id = parse_merchant_id(&merchant_id)?;
            let status = parse_status(&status)?;
            if !merchants.set_status(id, status).await? {
                bail!("merchant not found: {id}");
            }
            println!("updated {id}");
        }
        MerchantsCommand::SetWorkerStatus {
            merchant_id,
            worker,
            status,
            display_name,
        } => {
            let id = parse_merchant_id(&merchant_id)?;
            let status = parse_status(&status)?;
            merchants
                .set_worker_status(id, &worker, status, display_name.as_deref())
                .await?;
            println!("updated {id} for worker {worker}");
        }
    }
    Ok(())
}

fn parse_merchant_id(raw: &str) -> anyhow::Result<MerchantId> {
    MerchantId::parse(raw).context("merchant id must be a UUID")
}

fn parse_status(raw: &str) -> anyhow::Result<AnalysisStatus> {
    AnalysisStatus::parse(raw).with_context(|| format!("unknown analysis status: {raw}"))
}
