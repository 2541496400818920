use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{
    Dimension as CwDimension, Metric as CwMetric, MetricDataQuery, MetricStat, RecentlyActive,
    ScanBy, Statistic as CwStatistic,
};
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::Semaphore;

use crate::aws::{to_smithy, to_utc, transport, MetricDataOutcome, MetricSource};
use crate::counters::{
    CLOUDWATCH_REQUESTS, CLOUDWATCH_REQUEST_ERRORS, GETMETRICDATA_METRICS_REQUESTED,
};
use crate::errors::ApiError;
use crate::model::{
    CloudwatchData, Datapoint, Dimension, Metric, MetricDataPoint, Statistic,
};
use crate::scraper::window;

pub struct CloudwatchClient {
    client: aws_sdk_cloudwatch::Client,
    semaphore: Arc<Semaphore>,
}

impl CloudwatchClient {
    pub fn new(client: aws_sdk_cloudwatch::Client, semaphore: Arc<Semaphore>) -> Self {
        CloudwatchClient { client, semaphore }
    }
}

fn standard_statistic(statistic: &Statistic) -> Option<CwStatistic> {
    match statistic {
        Statistic::Average => Some(CwStatistic::Average),
        Statistic::Sum => Some(CwStatistic::Sum),
        Statistic::Minimum => Some(CwStatistic::Minimum),
        Statistic::Maximum => Some(CwStatistic::Maximum),
        Statistic::SampleCount => Some(CwStatistic::SampleCount),
        Statistic::Percentile(_) => None,
    }
}

#[async_trait]
impl MetricSource for CloudwatchClient {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric: &crate::config::MetricConfig,
        recently_active_only: bool,
    ) -> Result<Vec<Metric>, ApiError> {
        let mut metrics = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let _permit = self.semaphore.acquire().await.expect("semaphore closed");
            CLOUDWATCH_REQUESTS.with_label_values(&["ListMetrics"]).inc();
            let mut request = self
                .client
                .list_metrics()
                .namespace(namespace)
                .metric_name(&metric.name)
                .set_next_token(token.clone());
            if recently_active_only {
                request = request.recently_active(RecentlyActive::Pt3H);
            }
            let output = request.send().await.map_err(|e| {
                CLOUDWATCH_REQUEST_ERRORS
                    .with_label_values(&["ListMetrics"])
                    .inc();
                transport(e)
            })?;

            for entry in output.metrics() {
                metrics.push(Metric {
                    namespace: entry.namespace().unwrap_or(namespace).to_string(),
                    name: entry.metric_name().unwrap_or(&metric.name).to_string(),
                    dimensions: entry
                        .dimensions()
                        .iter()
                        .map(|d| Dimension {
                            name: d.name().unwrap_or_default().to_string(),
                            value: d.value().unwrap_or_default().to_string(),
                        })
                        .collect(),
                });
            }

            token = output.next_token().map(str::to_string);
            if token.is_none() {
                break;
            }
        }
        debug!("listed {} series for {namespace}/{}", metrics.len(), metric.name);
        Ok(metrics)
    }

    async fn metric_data(
        &self,
        batch: &[CloudwatchData],
        namespace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataOutcome>, ApiError> {
        let mut queries = Vec::with_capacity(batch.len());
        for data in batch {
            let dimensions: Vec<CwDimension> = data
                .dimensions
                .iter()
                .map(|d| {
                    CwDimension::builder()
                        .name(&d.name)
                        .value(&d.value)
                        .build()
                })
                .collect();
            let metric = CwMetric::builder()
                .namespace(namespace)
                .metric_name(&data.metric_name)
                .set_dimensions(Some(dimensions))
                .build();
            let stat = MetricStat::builder()
                .metric(metric)
                .period(data.period as i32)
                .stat(data.statistic.to_string())
                .build();
            queries.push(
                MetricDataQuery::builder()
                    .id(data.query_id.clone().unwrap_or_default())
                    .metric_stat(stat)
                    .return_data(true)
                    .build(),
            );
        }
        GETMETRICDATA_METRICS_REQUESTED.inc_by(queries.len() as u64);

        // The newest datapoint per series is all we publish; scanning
        // newest-first makes it the head of the values array.
        let mut outcomes: HashMap<String, MetricDataPoint> = HashMap::new();
        let mut token: Option<String> = None;
        loop {
            let _permit = self.semaphore.acquire().await.expect("semaphore closed");
            CLOUDWATCH_REQUESTS
                .with_label_values(&["GetMetricData"])
                .inc();
            let output = self
                .client
                .get_metric_data()
                .set_metric_data_queries(Some(queries.clone()))
                .start_time(to_smithy(start))
                .end_time(to_smithy(end))
                .scan_by(ScanBy::TimestampDescending)
                .set_next_token(token.clone())
                .send()
                .await
                .map_err(|e| {
                    CLOUDWATCH_REQUEST_ERRORS
                        .with_label_values(&["GetMetricData"])
                        .inc();
                    transport(e)
                })?;

            for result in output.metric_data_results() {
                let id = match result.id() {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let point = MetricDataPoint {
                    datapoint: result.values().first().copied(),
                    timestamp: result.timestamps().first().map(to_utc),
                };
                let entry = outcomes.entry(id).or_default();
                if entry.datapoint.is_none() {
                    *entry = point;
                }
            }

            token = output.next_token().map(str::to_string);
            if token.is_none() {
                break;
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|(id, point)| MetricDataOutcome { id, point })
            .collect())
    }

    async fn metric_statistics(
        &self,
        dimensions: &[Dimension],
        namespace: &str,
        metric: &crate::config::MetricConfig,
    ) -> Result<Vec<Datapoint>, ApiError> {
        let (start, end) = window::calculate(metric.period, metric.length, metric.delay, Utc::now());

        let mut statistics = Vec::new();
        let mut extended = Vec::new();
        for statistic in &metric.statistics {
            match standard_statistic(statistic) {
                Some(s) => statistics.push(s),
                None => extended.push(statistic.to_string()),
            }
        }

        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        CLOUDWATCH_REQUESTS
            .with_label_values(&["GetMetricStatistics"])
            .inc();
        let mut request = self
            .client
            .get_metric_statistics()
            .namespace(namespace)
            .metric_name(&metric.name)
            .period(metric.period as i32)
            .start_time(to_smithy(start))
            .end_time(to_smithy(end));
        for dimension in dimensions {
            request = request.dimensions(
                CwDimension::builder()
                    .name(&dimension.name)
                    .value(&dimension.value)
                    .build(),
            );
        }
        if !statistics.is_empty() {
            request = request.set_statistics(Some(statistics));
        }
        if !extended.is_empty() {
            request = request.set_extended_statistics(Some(extended));
        }
        let output = request.send().await.map_err(|e| {
            CLOUDWATCH_REQUEST_ERRORS
                .with_label_values(&["GetMetricStatistics"])
                .inc();
            transport(e)
        })?;

        Ok(output
            .datapoints()
            .iter()
            .map(|d| Datapoint {
                average: d.average(),
                sum: d.sum(),
                minimum: d.minimum(),
                maximum: d.maximum(),
                sample_count: d.sample_count(),
                extended_statistics: d
                    .extended_statistics()
                    .map(|m| m.clone())
                    .unwrap_or_default(),
                timestamp: d.timestamp().map(to_utc).unwrap_or_default(),
            })
            .collect())
    }
}
