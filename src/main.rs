use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::Parser;
use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;
use ses_mail_ingest::{Config, MailIngestHandler, S3Store};
use tracing::{error, info};

fn setup_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // CloudWatch stamps and stores lines as plain text.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .init();
}

async fn invoke(
    handler: &MailIngestHandler,
    event: LambdaEvent<Value>,
) -> Result<Value, lambda_runtime::Error> {
    let request_id = event.context.request_id.clone();
    let outcome = match handler.handle(event.payload).await {
        Ok(report) => report.ensure_complete(),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(report) => Ok(serde_json::to_value(&report)?),
        Err(e) => {
            error!(request_id = %request_id, retryable = e.is_retryable(), "{e}");
            Err(e.into())
        }
    }
}

async fn replay(handler: &MailIngestHandler, path: &std::path::Path) -> Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let event: Value =
        serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))?;
    let report = handler.handle(event).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    report.ensure_complete()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    setup_logging(&config.log_level);

    let cfg = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store = S3Store::new(aws_sdk_s3::Client::new(&cfg), &config.bucket);
    let handler = Arc::new(MailIngestHandler::new(
        Arc::new(store),
        config.ingest_options(),
    ));

    if let Some(path) = &config.event_file {
        return replay(&handler, path).await;
    }

    info!(bucket = %config.bucket, prefix = %config.object_prefix, "starting Lambda runtime");
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = Arc::clone(&handler);
        async move { invoke(&handler, event).await }
    }))
    .await
    .map_err(|e| anyhow::anyhow!("lambda runtime: {e}"))
}
