use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tagwatch::aws::{
    AccountSource, ClientFactory, MetricDataOutcome, MetricSource, TaggingSource,
};
use tagwatch::config::{DiscoveryJob, MetricConfig, Role, ScrapeConf};
use tagwatch::errors::ApiError;
use tagwatch::model::{
    Datapoint, Dimension, Metric, MetricDataPoint, Tag, TaggedResource,
};
use tagwatch::output::prometheus::{migrate, MigrateOptions, PrometheusMetric};
use tagwatch::scraper::{ScrapeOptions, Scraper};

struct StubTagging {
    resources: Vec<TaggedResource>,
}

#[async_trait]
impl TaggingSource for StubTagging {
    async fn resources(
        &self,
        job: &DiscoveryJob,
        _region: &str,
    ) -> Result<Vec<TaggedResource>, ApiError> {
        let matched: Vec<TaggedResource> = self
            .resources
            .iter()
            .filter(|r| r.namespace == job.namespace)
            .filter(|r| r.filter_through_tags(&job.search_tags))
            .cloned()
            .collect();
        if matched.is_empty() {
            return Err(ApiError::ExpectedResourcesNotFound {
                namespace: job.namespace.clone(),
            });
        }
        Ok(matched)
    }
}

struct StubMetrics {
    catalog: Vec<Metric>,
    value: f64,
    datapoints: Vec<Datapoint>,
}

#[async_trait]
impl MetricSource for StubMetrics {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric: &MetricConfig,
        _recently_active_only: bool,
    ) -> Result<Vec<Metric>, ApiError> {
        Ok(self
            .catalog
            .iter()
            .filter(|m| m.namespace == namespace && m.name == metric.name)
            .cloned()
            .collect())
    }

    async fn metric_data(
        &self,
        batch: &[tagwatch::model::CloudwatchData],
        _namespace: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataOutcome>, ApiError> {
        Ok(batch
            .iter()
            .map(|entry| MetricDataOutcome {
                id: entry.query_id.clone().unwrap_or_default(),
                point: MetricDataPoint {
                    datapoint: Some(self.value),
                    timestamp: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
                },
            })
            .collect())
    }

    async fn metric_statistics(
        &self,
        _dimensions: &[Dimension],
        _namespace: &str,
        _metric: &MetricConfig,
    ) -> Result<Vec<Datapoint>, ApiError> {
        Ok(self.datapoints.clone())
    }
}

struct StubAccount;

#[async_trait]
impl AccountSource for StubAccount {
    async fn account_id(&self) -> Result<String, ApiError> {
        Ok("123".to_string())
    }
}

/// A metric source that hangs on one namespace, to exercise the scrape
/// deadline.
struct StallMetrics {
    catalog: Vec<Metric>,
    stall_namespace: String,
    value: f64,
}

#[async_trait]
impl MetricSource for StallMetrics {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric: &MetricConfig,
        _recently_active_only: bool,
    ) -> Result<Vec<Metric>, ApiError> {
        Ok(self
            .catalog
            .iter()
            .filter(|m| m.namespace == namespace && m.name == metric.name)
            .cloned()
            .collect())
    }

    async fn metric_data(
        &self,
        batch: &[tagwatch::model::CloudwatchData],
        namespace: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataOutcome>, ApiError> {
        if namespace == self.stall_namespace {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(batch
            .iter()
            .map(|entry| MetricDataOutcome {
                id: entry.query_id.clone().unwrap_or_default(),
                point: MetricDataPoint {
                    datapoint: Some(self.value),
                    timestamp: None,
                },
            })
            .collect())
    }

    async fn metric_statistics(
        &self,
        _dimensions: &[Dimension],
        _namespace: &str,
        _metric: &MetricConfig,
    ) -> Result<Vec<Datapoint>, ApiError> {
        Ok(vec![])
    }
}

struct StubFactory {
    tagging: Arc<StubTagging>,
    metrics: Arc<dyn MetricSource>,
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn tagging(&self, _region: &str, _role: &Role) -> Arc<dyn TaggingSource> {
        self.tagging.clone()
    }

    async fn metrics(&self, _region: &str, _role: &Role) -> Arc<dyn MetricSource> {
        self.metrics.clone()
    }

    async fn account(&self, _region: &str, _role: &Role) -> Arc<dyn AccountSource> {
        Arc::new(StubAccount)
    }
}

fn ec2_conf() -> ScrapeConf {
    let conf: ScrapeConf = serde_yaml::from_str(
        r#"
discovery:
  exportedTagsOnMetrics:
    AWS/EC2:
      - Name
  jobs:
    - type: AWS/EC2
      regions:
        - us-east-1
      metrics:
        - name: CPUUtilization
          statistics:
            - Average
"#,
    )
    .unwrap();
    conf.validate().unwrap();
    conf
}

fn candidate(name: &str, dimensions: &[(&str, &str)]) -> Metric {
    Metric {
        namespace: "AWS/EC2".to_string(),
        name: name.to_string(),
        dimensions: dimensions
            .iter()
            .map(|(k, v)| Dimension {
                name: k.to_string(),
                value: v.to_string(),
            })
            .collect(),
    }
}

fn scraper(conf: ScrapeConf, tagging: StubTagging, metrics: StubMetrics) -> Scraper {
    Scraper::new(
        Arc::new(conf),
        Arc::new(StubFactory {
            tagging: Arc::new(tagging),
            metrics: Arc::new(metrics),
        }),
        ScrapeOptions {
            metrics_per_query: 500,
        },
    )
}

fn samples_by_name(samples: &[PrometheusMetric], name: &str) -> Vec<PrometheusMetric> {
    samples.iter().filter(|s| s.name == name).cloned().collect()
}

#[tokio::test]
async fn discovery_job_emits_a_labeled_sample() {
    let arn = "arn:aws:ec2:us-east-1:123:instance/i-1";
    let tagging = StubTagging {
        resources: vec![TaggedResource {
            arn: arn.to_string(),
            namespace: "AWS/EC2".to_string(),
            region: "us-east-1".to_string(),
            tags: vec![Tag {
                key: "Name".to_string(),
                value: "n1".to_string(),
            }],
        }],
    };
    let metrics = StubMetrics {
        catalog: vec![
            candidate("CPUUtilization", &[("InstanceId", "i-1")]),
            // Belongs to an undiscovered instance: must be dropped.
            candidate("CPUUtilization", &[("InstanceId", "i-not-bla")]),
        ],
        value: 42.0,
        datapoints: vec![],
    };

    let output = scraper(ec2_conf(), tagging, metrics).scrape(None).await;
    assert!(output.errors.is_empty());

    let samples = migrate(&output, MigrateOptions::default());
    let cpu = samples_by_name(&samples, "aws_ec2_cpuutilization_average");
    assert_eq!(cpu.len(), 1);
    let sample = &cpu[0];
    assert_eq!(sample.value, 42.0);
    assert_eq!(sample.labels.get("name").unwrap(), arn);
    assert_eq!(sample.labels.get("region").unwrap(), "us-east-1");
    assert_eq!(sample.labels.get("account_id").unwrap(), "123");
    assert_eq!(sample.labels.get("dimension_InstanceId").unwrap(), "i-1");
    assert_eq!(sample.labels.get("tag_Name").unwrap(), "n1");

    let info = samples_by_name(&samples, "aws_ec2_info");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].labels.get("name").unwrap(), arn);
}

#[tokio::test]
async fn missing_resources_surface_as_a_soft_error() {
    let tagging = StubTagging { resources: vec![] };
    let metrics = StubMetrics {
        catalog: vec![],
        value: 0.0,
        datapoints: vec![],
    };

    let output = scraper(ec2_conf(), tagging, metrics).scrape(None).await;
    assert_eq!(output.errors.len(), 1);
    assert_eq!(
        output.errors[0].kind,
        tagwatch::errors::JobErrorKind::ExpectedResourcesNotFound
    );
    assert!(output.metrics.is_empty());
}

#[tokio::test]
async fn static_job_demultiplexes_statistics() {
    let conf: ScrapeConf = serde_yaml::from_str(
        r#"
static:
  - name: billing
    namespace: AWS/Billing
    regions:
      - us-east-1
    dimensions:
      - name: Currency
        value: USD
    metrics:
      - name: EstimatedCharges
        statistics:
          - Maximum
          - Average
"#,
    )
    .unwrap();
    conf.validate().unwrap();

    let mut extended = HashMap::new();
    extended.insert("p99".to_string(), 1.0);
    let datapoints = vec![
        Datapoint {
            average: Some(2.0),
            maximum: Some(10.0),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ..Default::default()
        },
        Datapoint {
            average: Some(4.0),
            extended_statistics: extended,
            timestamp: Utc.timestamp_opt(1_700_000_300, 0).unwrap(),
            ..Default::default()
        },
    ];
    let tagging = StubTagging { resources: vec![] };
    let metrics = StubMetrics {
        catalog: vec![],
        value: 0.0,
        datapoints,
    };

    let output = scraper(conf, tagging, metrics).scrape(None).await;
    assert!(output.errors.is_empty());

    let samples = migrate(&output, MigrateOptions::default());
    let maximum = samples_by_name(&samples, "aws_billing_estimated_charges_maximum");
    assert_eq!(maximum.len(), 1);
    assert_eq!(maximum[0].value, 10.0);
    assert_eq!(maximum[0].labels.get("name").unwrap(), "billing");
    assert_eq!(maximum[0].labels.get("dimension_Currency").unwrap(), "USD");

    let average = samples_by_name(&samples, "aws_billing_estimated_charges_average");
    assert_eq!(average[0].value, 3.0);
}

#[tokio::test]
async fn deadline_serves_the_results_collected_so_far() {
    let conf: ScrapeConf = serde_yaml::from_str(
        r#"
customNamespace:
  - name: fast
    namespace: CustomFast
    regions:
      - eu-west-1
    metrics:
      - name: QueueDepth
        statistics: [Sum]
  - name: slow
    namespace: CustomSlow
    regions:
      - eu-west-1
    metrics:
      - name: QueueDepth
        statistics: [Sum]
"#,
    )
    .unwrap();
    conf.validate().unwrap();

    let catalog: Vec<Metric> = ["CustomFast", "CustomSlow"]
        .iter()
        .map(|namespace| Metric {
            namespace: namespace.to_string(),
            name: "QueueDepth".to_string(),
            dimensions: vec![Dimension {
                name: "Queue".to_string(),
                value: "q1".to_string(),
            }],
        })
        .collect();
    let scraper = Scraper::new(
        Arc::new(conf),
        Arc::new(StubFactory {
            tagging: Arc::new(StubTagging { resources: vec![] }),
            metrics: Arc::new(StallMetrics {
                catalog,
                stall_namespace: "CustomSlow".to_string(),
                value: 7.0,
            }),
        }),
        ScrapeOptions {
            metrics_per_query: 500,
        },
    );

    let started = Instant::now();
    let output = scraper.scrape(Some(Duration::from_millis(500))).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let samples = migrate(&output, MigrateOptions::default());
    let fast = samples_by_name(&samples, "aws_custom_fast_queue_depth_sum");
    assert_eq!(fast.len(), 1);
    assert_eq!(fast[0].value, 7.0);
    assert!(samples_by_name(&samples, "aws_custom_slow_queue_depth_sum").is_empty());
}

#[tokio::test]
async fn unknown_namespace_degrades_to_a_job_error() {
    // Bypasses validate() on purpose; a bad namespace must not panic
    // the scrape.
    let conf: ScrapeConf = serde_yaml::from_str(
        r#"
discovery:
  jobs:
    - type: AWS/DoesNotExist
      regions:
        - us-east-1
      metrics:
        - name: Foo
          statistics: [Sum]
"#,
    )
    .unwrap();

    let tagging = StubTagging {
        resources: vec![TaggedResource {
            arn: "arn:aws:unknown:us-east-1:123:thing/t-1".to_string(),
            namespace: "AWS/DoesNotExist".to_string(),
            region: "us-east-1".to_string(),
            tags: vec![],
        }],
    };
    let metrics = StubMetrics {
        catalog: vec![],
        value: 0.0,
        datapoints: vec![],
    };

    let output = scraper(conf, tagging, metrics).scrape(None).await;
    assert_eq!(output.errors.len(), 1);
    assert_eq!(
        output.errors[0].kind,
        tagwatch::errors::JobErrorKind::ResourceMetadata
    );
    assert!(output.metrics.is_empty());
}

#[tokio::test]
async fn custom_namespace_job_owns_samples_by_job_name() {
    let conf: ScrapeConf = serde_yaml::from_str(
        r#"
customNamespace:
  - name: batch-jobs
    namespace: CustomBatch
    regions:
      - eu-west-1
    metrics:
      - name: QueueDepth
        statistics:
          - Sum
"#,
    )
    .unwrap();
    conf.validate().unwrap();

    let tagging = StubTagging { resources: vec![] };
    let metrics = StubMetrics {
        catalog: vec![Metric {
            namespace: "CustomBatch".to_string(),
            name: "QueueDepth".to_string(),
            dimensions: vec![Dimension {
                name: "Queue".to_string(),
                value: "q1".to_string(),
            }],
        }],
        value: 7.0,
        datapoints: vec![],
    };

    let output = scraper(conf, tagging, metrics).scrape(None).await;
    assert!(output.errors.is_empty());

    let samples = migrate(&output, MigrateOptions::default());
    let depth = samples_by_name(&samples, "aws_custom_batch_queue_depth_sum");
    assert_eq!(depth.len(), 1);
    assert_eq!(depth[0].value, 7.0);
    assert_eq!(depth[0].labels.get("name").unwrap(), "batch-jobs");
    assert_eq!(depth[0].labels.get("region").unwrap(), "eu-west-1");
}
