use crate::config::RunConfig;
use crate::core::QueueClient;
use crate::error::Error;
use async_trait::async_trait;
use aws_config::imds::region::ImdsRegionProvider;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use url::Url;

/// Loads credentials and region the way the AWS CLI does.
///
/// Without an explicit region, instance metadata is asked first, then the
/// default provider chain (environment, profile).
pub async fn load_sdk_config(config: &RunConfig) -> Result<SdkConfig, Error> {
    let region_provider = match &config.region {
        Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
        None => RegionProviderChain::first_try(ImdsRegionProvider::builder().build())
            .or_default_provider(),
    };

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;

    match sdk_config.region() {
        Some(region) => tracing::debug!(%region, "using AWS region"),
        None => {
            return Err(Error::Config(
                "no AWS region found; pass -region or set AWS_REGION".to_string(),
            ))
        }
    }

    Ok(sdk_config)
}

#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    sqs_client: Client,
}

impl SqsQueueClient {
    pub fn new(sqs_client: Client) -> Self {
        Self { sqs_client }
    }

    pub fn from_sdk_config(sdk_config: &SdkConfig, endpoint_url: Option<&Url>) -> Self {
        let mut builder = aws_sdk_sqs::config::Builder::from(sdk_config);
        if let Some(endpoint_url) = endpoint_url {
            builder = builder.endpoint_url(endpoint_url.as_str());
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

/// SQS carries bodies as strings, so the bytes must be UTF-8.
fn message_body(body: Vec<u8>) -> Result<String, String> {
    String::from_utf8(body).map_err(|e| format!("message body is not valid UTF-8: {}", e))
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn queue_url(&self, queue_name: &str) -> Result<String, String> {
        let output = self
            .sqs_client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| format!("{}", DisplayErrorContext(e)))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| "response carried no queue URL".to_string())
    }

    async fn send_message(&self, queue_url: &str, body: Vec<u8>) -> Result<Option<String>, String> {
        let body = message_body(body)?;

        let output = self
            .sqs_client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .delay_seconds(0)
            .send()
            .await
            .map_err(|e| format!("{}", DisplayErrorContext(e)))?;

        Ok(output.message_id().map(str::to_string))
    }
}
