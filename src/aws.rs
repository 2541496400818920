use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::config::{DiscoveryJob, MetricConfig, Role};
use crate::errors::ApiError;
use crate::model::{Datapoint, Dimension, Metric, MetricDataPoint, TaggedResource};

pub mod account;
pub mod cloudwatch;
pub mod session;
pub mod tagging;

/// One `GetMetricData` answer, keyed by the query id of the batch entry.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricDataOutcome {
    pub id: String,
    pub point: MetricDataPoint,
}

/// Resource discovery by tag.
#[async_trait]
pub trait TaggingSource: Send + Sync {
    async fn resources(
        &self,
        job: &DiscoveryJob,
        region: &str,
    ) -> Result<Vec<TaggedResource>, ApiError>;
}

/// The metric-query side of the provider: series enumeration, batched
/// data queries, and raw statistics for static jobs.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric: &MetricConfig,
        recently_active_only: bool,
    ) -> Result<Vec<Metric>, ApiError>;

    async fn metric_data(
        &self,
        batch: &[crate::model::CloudwatchData],
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataOutcome>, ApiError>;

    async fn metric_statistics(
        &self,
        dimensions: &[Dimension],
        namespace: &str,
        metric: &MetricConfig,
    ) -> Result<Vec<Datapoint>, ApiError>;
}

/// Account-id resolution for a (role, region) pair.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn account_id(&self) -> Result<String, ApiError>;
}

/// Hands out per-(region, role) API clients. The scrape pipeline only
/// sees these traits, so tests can substitute stubs.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn tagging(&self, region: &str, role: &Role) -> Arc<dyn TaggingSource>;
    async fn metrics(&self, region: &str, role: &Role) -> Arc<dyn MetricSource>;
    async fn account(&self, region: &str, role: &Role) -> Arc<dyn AccountSource>;
}

pub struct AwsClientFactory {
    sessions: session::SessionCache,
    cloudwatch_semaphore: Arc<Semaphore>,
    tagging_semaphore: Arc<Semaphore>,
}

impl AwsClientFactory {
    pub fn new(
        sts_region: Option<String>,
        cloudwatch_concurrency: usize,
        tagging_concurrency: usize,
    ) -> Self {
        AwsClientFactory {
            sessions: session::SessionCache::new(sts_region),
            cloudwatch_semaphore: Arc::new(Semaphore::new(cloudwatch_concurrency)),
            tagging_semaphore: Arc::new(Semaphore::new(tagging_concurrency)),
        }
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn tagging(&self, region: &str, role: &Role) -> Arc<dyn TaggingSource> {
        let config = self.sessions.sdk_config(region, role).await;
        Arc::new(tagging::TaggingClient::new(
            aws_sdk_resourcegroupstagging::Client::new(&config),
            self.tagging_semaphore.clone(),
        ))
    }

    async fn metrics(&self, region: &str, role: &Role) -> Arc<dyn MetricSource> {
        let config = self.sessions.sdk_config(region, role).await;
        Arc::new(cloudwatch::CloudwatchClient::new(
            aws_sdk_cloudwatch::Client::new(&config),
            self.cloudwatch_semaphore.clone(),
        ))
    }

    async fn account(&self, region: &str, role: &Role) -> Arc<dyn AccountSource> {
        let config = self.sessions.sdk_config(region, role).await;
        Arc::new(account::StsAccount::new(aws_sdk_sts::Client::new(&config)))
    }
}

fn transport<E: std::error::Error + Send + Sync + 'static>(e: E) -> ApiError {
    ApiError::Transport(Box::new(e))
}

fn to_utc(dt: &aws_smithy_types::DateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

fn to_smithy(dt: DateTime<Utc>) -> aws_smithy_types::DateTime {
    aws_smithy_types::DateTime::from_secs(dt.timestamp())
}
