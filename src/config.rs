use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{Dimension, Statistic, Tag};
use crate::registry;

const DEFAULT_PERIOD: i64 = 300;
const DEFAULT_LENGTH: i64 = 300;
const DEFAULT_DELAY: i64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("discovery job {0}: unknown namespace")]
    UnknownNamespace(String),
    #[error("job {0}: no metrics configured")]
    NoMetrics(String),
    #[error("metric {0}: no statistics configured")]
    NoStatistics(String),
    #[error("job {job}: invalid dimension value filter for {dimension}: {source}")]
    InvalidDimensionFilter {
        job: String,
        dimension: String,
        source: regex::Error,
    },
    #[error("{0}: {1} out of range")]
    OutOfRangeDuration(String, &'static str),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConf {
    #[serde(default)]
    pub api_version: String,
    #[serde(rename = "sts-region", default)]
    pub sts_region: Option<String>,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(rename = "static", default)]
    pub static_jobs: Vec<StaticJob>,
    #[serde(default)]
    pub custom_namespace: Vec<CustomNamespaceJob>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default)]
    pub exported_tags_on_metrics: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub jobs: Vec<DiscoveryJob>,
}

/// `roleArn` empty means the ambient credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(default)]
    pub role_arn: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryJob {
    /// Namespace tag, e.g. `AWS/EC2`.
    #[serde(rename = "type")]
    pub namespace: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub search_tags: Vec<Tag>,
    #[serde(default)]
    pub custom_tags: Vec<Tag>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub rounding_period: Option<i64>,
    #[serde(default)]
    pub recently_active_only: bool,
    #[serde(default)]
    pub dimension_name_requirements: Vec<String>,
    #[serde(default)]
    pub dimension_value_filter: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomNamespaceJob {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub custom_tags: Vec<Tag>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub rounding_period: Option<i64>,
    #[serde(default)]
    pub recently_active_only: bool,
    #[serde(default)]
    pub dimension_name_requirements: Vec<String>,
    #[serde(default)]
    pub dimension_value_filter: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticJob {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub custom_tags: Vec<Tag>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    pub name: String,
    pub statistics: Vec<Statistic>,
    #[serde(default = "default_period")]
    pub period: i64,
    #[serde(default = "default_length")]
    pub length: i64,
    #[serde(default = "default_delay")]
    pub delay: i64,
    #[serde(default)]
    pub nil_to_zero: bool,
    #[serde(default)]
    pub add_cloudwatch_timestamp: bool,
}

fn default_period() -> i64 {
    DEFAULT_PERIOD
}

fn default_length() -> i64 {
    DEFAULT_LENGTH
}

fn default_delay() -> i64 {
    DEFAULT_DELAY
}

impl Default for MetricConfig {
    fn default() -> Self {
        MetricConfig {
            name: String::new(),
            statistics: Vec::new(),
            period: DEFAULT_PERIOD,
            length: DEFAULT_LENGTH,
            delay: DEFAULT_DELAY,
            nil_to_zero: false,
            add_cloudwatch_timestamp: false,
        }
    }
}

impl ScrapeConf {
    pub fn load(path: &Path) -> Result<ScrapeConf, ConfigError> {
        let file = File::open(path)?;
        let conf: ScrapeConf = serde_yaml::from_reader(file)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Fails fast on configuration bugs, so an invalid statistic or
    /// filter regex never reaches a scrape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for job in &self.discovery.jobs {
            if registry::service_for(&job.namespace).is_none() {
                return Err(ConfigError::UnknownNamespace(job.namespace.clone()));
            }
            validate_metrics(&job.namespace, &job.metrics)?;
            validate_dimension_filter(&job.namespace, &job.dimension_value_filter)?;
            if let Some(period) = job.rounding_period {
                check_seconds(&job.namespace, "roundingPeriod", period, 1)?;
            }
        }
        for job in &self.custom_namespace {
            validate_metrics(&job.name, &job.metrics)?;
            validate_dimension_filter(&job.name, &job.dimension_value_filter)?;
            if let Some(period) = job.rounding_period {
                check_seconds(&job.name, "roundingPeriod", period, 1)?;
            }
        }
        for job in &self.static_jobs {
            validate_metrics(&job.name, &job.metrics)?;
        }
        Ok(())
    }
}

fn validate_metrics(job: &str, metrics: &[MetricConfig]) -> Result<(), ConfigError> {
    if metrics.is_empty() {
        return Err(ConfigError::NoMetrics(job.to_string()));
    }
    for metric in metrics {
        if metric.statistics.is_empty() {
            return Err(ConfigError::NoStatistics(metric.name.clone()));
        }
        check_seconds(&metric.name, "period", metric.period, 1)?;
        check_seconds(&metric.name, "length", metric.length, 1)?;
        check_seconds(&metric.name, "delay", metric.delay, 0)?;
    }
    Ok(())
}

// GetMetricData takes the period as an i32, so bound everything here.
fn check_seconds(
    scope: &str,
    field: &'static str,
    value: i64,
    min: i64,
) -> Result<(), ConfigError> {
    if value < min || value > i64::from(i32::MAX) {
        return Err(ConfigError::OutOfRangeDuration(scope.to_string(), field));
    }
    Ok(())
}

fn validate_dimension_filter(
    job: &str,
    filter: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    for (dimension, pattern) in filter {
        if let Err(source) = Regex::new(&format!("^(?:{pattern})$")) {
            return Err(ConfigError::InvalidDimensionFilter {
                job: job.to_string(),
                dimension: dimension.clone(),
                source,
            });
        }
    }
    Ok(())
}

impl DiscoveryJob {
    pub fn roles(&self) -> Vec<Role> {
        roles_or_default(&self.roles)
    }
}

impl CustomNamespaceJob {
    pub fn roles(&self) -> Vec<Role> {
        roles_or_default(&self.roles)
    }
}

impl StaticJob {
    pub fn roles(&self) -> Vec<Role> {
        roles_or_default(&self.roles)
    }
}

fn roles_or_default(roles: &[Role]) -> Vec<Role> {
    if roles.is_empty() {
        vec![Role::default()]
    } else {
        roles.to_vec()
    }
}
