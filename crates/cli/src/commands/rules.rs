use anyhow::{bail, Context};
use clap::{Args, Subcommand};

use mailsieve_core::{FilterRule, MatchField, MatchMode, RuleCategory, RuleId};
use mailsieve_state::SqliteStore;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List every stored rule.
    List,
    /// Add a rule.
    Add {
        /// whitelist | blacklist | dynamic | watch
        #[arg(long)]
        category: String,
        /// sender | subject | domain
        #[arg(long, default_value = "subject")]
        field: String,
        /// exact | contains | startsWith | endsWith | regex
        #[arg(long, default_value = "contains")]
        mode: String,
        #[arg(long)]
        pattern: String,
        /// Worker the rule is scoped to; omitted means global.
        #[arg(long)]
        worker: Option<String>,
    },
    /// Remove a rule by id.
    Remove { id: String },
    /// Enable a rule by id.
    Enable { id: String },
    /// Disable a rule by id.
    Disable { id: String },
}

pub async fn execute(
    store: SqliteStore,
    args: RulesArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let rules = store.rules();

    match args.command {
        RulesCommand::List => {
            let listed = rules.list().await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&listed)?);
                }
                OutputFormat::Text => {
                    for rule in listed {
                        println!(
                            "{} [{}] {} {} \"{}\" enabled={} worker={}",
                            rule.id,
                            rule.category.as_str(),
                            rule.match_field.as_str(),
                            rule.match_mode.as_str(),
                            rule.pattern,
                            rule.enabled,
                            rule.worker,
                        );
                    }
                }
            }
        }
        RulesCommand::Add {
            category,
            field,
            mode,
            pattern,
            worker,
        } => {
            let Some(category) = RuleCategory::parse(&category) else {
                bail!("unknown category: {category}");
            };
            let Some(field) = MatchField::parse(&field) else {
                bail!("unknown match field: {field}");
            };
            let Some(mode) = MatchMode::parse(&mode) else {
                bail!("unknown match mode: {mode}");
            };
            if pattern.is_empty() {
                bail!("pattern must not be empty");
            }
            let matcher = mailsieve_core::PatternMatcher::new();
            if let Err(error) = matcher.validate(&pattern, mode) {
                bail!("invalid pattern: {error}");
            }

            let mut rule = FilterRule::new(category, field, mode, pattern);
            if let Some(worker) = worker {
                rule = rule.with_worker(worker);
            }
            rules.insert(&rule).await?;
            println!("created {}", rule.id);
        }
        RulesCommand::Remove { id } => {
            let id = parse_rule_id(&id)?;
            if rules.delete(id).await? {
                println!("removed {id}");
            } else {
                bail!("rule not found: {id}");
            }
        }
        RulesCommand::Enable { id } => {
            let id = parse_rule_id(&id)?;
            if !rules.set_enabled(id, true).await? {
                bail!("rule not found: {id}");
            }
            println!("enabled {id}");
        }
        RulesCommand::Disable { id } => {
            let id = parse_rule_id(&id)?;
            if !rules.set_enabled(id, false).await? {
                bail!("rule not found: {id}");
            }
            println!("disabled {id}");
        }
    }
    Ok(())
}

fn parse_rule_id(raw: &str) -> anyhow::Result<RuleId> {
    RuleId::parse(raw).context("rule id must be a UUID")
}
