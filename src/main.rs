use anyhow::Context;
use sqs_send::adapters::{load_sdk_config, SqsQueueClient};
use sqs_send::config::{Cli, RunConfig};
use sqs_send::core::{resolve_queue_url, run_sends};
use sqs_send::observability::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse_args();
    let config = RunConfig::load(&cli).context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let mut source = config
        .payload
        .open()
        .context("unable to open message source")?;

    let sdk_config = load_sdk_config(&config)
        .await
        .context("unable to load AWS configuration")?;
    let queue_client = SqsQueueClient::from_sdk_config(&sdk_config, config.endpoint_url.as_ref());

    let queue_url = resolve_queue_url(&queue_client, &config.queue)
        .await
        .with_context(|| format!("unable to find queue URL for '{}'", config.queue))?;
    tracing::debug!(host = ?queue_url.url().host_str(), "queue resolved");

    let mut stdout = std::io::stdout().lock();
    let sent = run_sends(
        &queue_client,
        &queue_url,
        source.as_mut(),
        config.count,
        config.interval,
        &mut stdout,
    )
    .await
    .context("unable to send message")?;
    tracing::info!(sent, "run complete");

    Ok(())
}
