use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::json;

use mailsieve_analytics::{CampaignAnalyzer, RootManager, DEFAULT_MAIN_PATH_THRESHOLD};
use mailsieve_core::{CampaignId, MerchantId};
use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Merchant to analyze.
    merchant_id: String,

    /// Restrict counts to recipients seen by these workers.
    #[arg(long)]
    worker: Vec<String>,

    #[command(subcommand)]
    command: AnalyzeCommand,
}

#[derive(Subcommand, Debug)]
enum AnalyzeCommand {
    /// Campaign-to-campaign transitions by distinct recipients.
    Transitions,
    /// Main/secondary/valuable path branches.
    Branches {
        /// Share (percent) above which a branch is a main path.
        #[arg(long, default_value_t = DEFAULT_MAIN_PATH_THRESHOLD)]
        main_threshold: f64,
    },
    /// Valuable campaigns with their neighbors and DAG level.
    Valuable,
    /// DAG levels over the full transition graph.
    Levels,
    /// DAG levels over new-user paths seeded by confirmed roots.
    NewUserLevels,
    /// Confirm or revoke a root campaign and recalculate new users.
    SetRoot {
        campaign_id: String,
        #[arg(long)]
        revoke: bool,
    },
    /// Recalculate every recipient's new-user flag from confirmed roots.
    RecalcNewUsers,
}

pub async fn execute(
    store: SqliteStore,
    args: AnalyzeArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let merchant_id =
        MerchantId::parse(&args.merchant_id).context("merchant id must be a UUID")?;
    let workers = (!args.worker.is_empty()).then_some(args.worker.as_slice());
    let analyzer = CampaignAnalyzer::new(store.campaigns(), store.paths());

    let output = match args.command {
        AnalyzeCommand::Transitions => {
            let transitions = analyzer.campaign_transitions(merchant_id, workers).await?;
            serde_json::to_value(transitions)?
        }
        AnalyzeCommand::Branches { main_threshold } => {
            let analysis = analyzer
                .branch_analysis(merchant_id, workers, main_threshold)
                .await?;
            serde_json::to_value(analysis)?
        }
        AnalyzeCommand::Valuable => {
            let reports = analyzer
                .valuable_campaign_analysis(merchant_id, workers)
                .await?;
            serde_json::to_value(reports)?
        }
        AnalyzeCommand::Levels => {
            let levels = analyzer.dag_levels(merchant_id, workers).await?;
            serde_json::to_value(levels.into_iter().collect::<Vec<_>>())?
        }
        AnalyzeCommand::NewUserLevels => {
            let levels = analyzer.new_user_dag_levels(merchant_id).await?;
            serde_json::to_value(levels.into_iter().collect::<Vec<_>>())?
        }
        AnalyzeCommand::SetRoot {
            campaign_id,
            revoke,
        } => {
            let campaign_id =
                CampaignId::parse(&campaign_id).context("campaign id must be a UUID")?;
            let touched = RootManager::new(store.campaigns(), store.paths())
                .set_root(merchant_id, campaign_id, !revoke)
                .await?;
            json!({"itemsAffected": touched})
        }
        AnalyzeCommand::RecalcNewUsers => {
            let assigned = RootManager::new(store.campaigns(), store.paths())
                .recalculate_all_new_users(merchant_id)
                .await?;
            json!({"recipientsAssigned": assigned})
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => println!("{output}"),
    }
    Ok(())
}
