use std::time::Duration;

use clap::Args;
use tracing::info;

use mailsieve_executor::{OverflowPolicy, ProcessorConfig};
use mailsieve_gateway::GatewayBuilder;
use mailsieve_state::SqliteStore;

/// Run the service: filter pipeline, task drainer, and background ticks.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Bound of the async task queue.
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Maximum envelopes drained per batch.
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Block producers on a full queue instead of dropping the newest
    /// envelope.
    #[arg(long)]
    block_on_full: bool,

    /// Defer dynamic-rule learning to the async processor. The first
    /// burst message then passes through instead of being blocked.
    #[arg(long)]
    deferred_dynamic_tracking: bool,

    /// Seconds allowed for the final queue drain at shutdown.
    #[arg(long, default_value_t = 30)]
    shutdown_deadline_secs: u64,
}

pub async fn execute(store: SqliteStore, args: RunArgs) -> anyhow::Result<()> {
    let overflow = if args.block_on_full {
        OverflowPolicy::Block
    } else {
        OverflowPolicy::DropNewest
    };

    let mut builder = GatewayBuilder::new(
        store,
        ProcessorConfig::new(args.queue_capacity, args.batch_size, overflow),
    );
    if args.deferred_dynamic_tracking {
        builder = builder.with_deferred_dynamic_tracking();
    }
    let built = builder.build().await?;

    let background = tokio::spawn(built.background.run());
    info!("mailsieve running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining outstanding tasks");

    built.cancel.cancel();
    let _ = built.shutdown.send(()).await;
    built
        .tasks
        .drain_and_stop(Duration::from_secs(args.shutdown_deadline_secs))
        .await;
    let _ = background.await;

    let metrics = built.gateway.metrics();
    info!(
        processed = metrics.emails_processed,
        forwarded = metrics.emails_forwarded,
        dropped = metrics.emails_dropped,
        "mailsieve stopped"
    );
    Ok(())
}
