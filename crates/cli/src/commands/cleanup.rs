use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use serde_json::json;

use mailsieve_analytics::{RetentionConfig, RetentionManager};
use mailsieve_core::MerchantId;
use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    #[command(subcommand)]
    command: CleanupCommand,
}

#[derive(Subcommand, Debug)]
enum CleanupCommand {
    /// Delete data of ignored merchants.
    Ignored {
        /// Specific worker, or "global" to cascade ignored merchants.
        #[arg(long, default_value = "global")]
        worker: String,
    },
    /// Delete data of merchants stuck in pending.
    Pending {
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long, default_value = "global")]
        worker: String,
    },
    /// Delete dynamic rules idle past the configured expiration.
    ExpiredRules,
    /// Remove one worker's data from a merchant (cascades the merchant
    /// when nothing remains).
    DeleteMerchant {
        merchant_id: String,
        #[arg(long)]
        worker: String,
    },
    /// Remove path rows of recipients who never became new users.
    OldUserPaths {
        merchant_id: String,
        /// Also delete each recipient's first entry.
        #[arg(long)]
        all: bool,
    },
    /// Rebuild a merchant's recipient paths from raw emails.
    RebuildPaths {
        merchant_id: String,
        /// Restrict the replay to these workers.
        #[arg(long)]
        worker: Vec<String>,
    },
}

pub async fn execute(
    store: SqliteStore,
    args: CleanupArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let retention = RetentionManager::new(
        store.merchants(),
        store.campaigns(),
        store.cleanup(),
        store.logs(),
        store.tracker(),
        RetentionConfig::default(),
    );

    let summary = match args.command {
        CleanupCommand::Ignored { worker } => {
            let result = retention.cleanup_ignored_merchant_data(&worker).await?;
            json!({"itemsDeleted": result.items_deleted, "itemsAffected": result.items_affected})
        }
        CleanupCommand::Pending { days, worker } => {
            let result = retention.cleanup_old_pending_data(days, &worker).await?;
            json!({"itemsDeleted": result.items_deleted, "itemsAffected": result.items_affected})
        }
        CleanupCommand::ExpiredRules => {
            let config = store.detector_config().load().await?;
            if config.enabled {
                let cutoff = Utc::now() - Duration::hours(i64::from(config.expiration_hours));
                let expired = store.rules().delete_expired_dynamic(cutoff).await?;
                json!({"itemsDeleted": expired})
            } else {
                json!({"itemsDeleted": 0, "skipped": "dynamic detection disabled"})
            }
        }
        CleanupCommand::DeleteMerchant { merchant_id, worker } => {
            let merchant_id = parse_merchant_id(&merchant_id)?;
            let result = retention.delete_merchant_data(merchant_id, &worker).await?;
            json!({
                "emailsDeleted": result.emails_deleted,
                "pathsDeleted": result.paths_deleted,
                "campaignsUpdated": result.campaigns_updated,
                "merchantDeleted": result.merchant_deleted,
            })
        }
        CleanupCommand::OldUserPaths { merchant_id, all } => {
            let merchant_id = parse_merchant_id(&merchant_id)?;
            let result = if all {
                retention.cleanup_all_old_user_paths(merchant_id).await?
            } else {
                retention.cleanup_old_user_paths(merchant_id).await?
            };
            json!({"itemsDeleted": result.items_deleted})
        }
        CleanupCommand::RebuildPaths { merchant_id, worker } => {
            let merchant_id = parse_merchant_id(&merchant_id)?;
            let rebuilder = mailsieve_analytics::PathRebuilder::new(
                store.campaigns(),
                store.paths(),
                mailsieve_analytics::RootManager::new(store.campaigns(), store.paths()),
            );
            let workers = (!worker.is_empty()).then_some(worker.as_slice());
            let cancel = tokio_util::sync::CancellationToken::new();
            let result = rebuilder.rebuild(merchant_id, workers, &cancel).await?;
            json!({
                "pathsDeleted": result.paths_deleted,
                "pathsCreated": result.paths_created,
                "recipients": result.recipients,
                "newUsersAssigned": result.new_users_assigned,
            })
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => println!("{summary}"),
    }
    Ok(())
}

fn parse_merchant_id(raw: &str) -> anyhow::Result<MerchantId> {
    MerchantId::parse(raw).context("merchant id must be a UUID")
}
