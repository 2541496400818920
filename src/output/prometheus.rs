use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::warn;
use prometheus::proto;
use regex::Regex;

use crate::counters::DUPLICATE_METRICS_FILTERED;
use crate::scraper::ScrapeOutput;

lazy_static! {
    static ref VALID_LABEL: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
    static ref CAMEL_BOUNDARY: Regex = Regex::new(r"([a-z0-9])([A-Z])").unwrap();
}

/// A finished sample. Label values stay verbatim (Prometheus labels are
/// UTF-8); only the keys get normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct PrometheusMetric {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MigrateOptions {
    pub labels_snake_case: bool,
}

/// Camel-case boundaries become dots, so `GlobalTopicCount` lowercases
/// into `global_topic_count` instead of `globaltopiccount`.
fn split_camel(s: &str) -> String {
    CAMEL_BOUNDARY.replace_all(s, "$1.$2").into_owned()
}

fn replace_special(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' | ',' | '\t' | '/' | '\\' | '.' | '-' | ':' | '=' | '@' | '<' | '>' | '“' => {
                out.push('_')
            }
            '%' => out.push_str("_percent"),
            _ => out.push(c),
        }
    }
    out
}

pub fn prom_string(s: &str) -> String {
    replace_special(&split_camel(s)).to_lowercase()
}

/// Metric-name namespace part; everything is rooted under `aws_`.
pub fn prom_namespace(namespace: &str) -> String {
    let s = prom_string(namespace);
    if s.starts_with("aws") {
        s
    } else {
        format!("aws_{s}")
    }
}

fn label_key(prefix: &str, key: &str, snake_case: bool) -> Option<String> {
    let sanitized = if snake_case {
        prom_string(key)
    } else {
        replace_special(key)
    };
    let full = format!("{prefix}{sanitized}");
    if VALID_LABEL.is_match(&full) {
        Some(full)
    } else {
        warn!("dropping label {key}: {full} is not a valid label name");
        None
    }
}

fn insert_label(
    labels: &mut BTreeMap<String, String>,
    prefix: &str,
    key: &str,
    value: &str,
    snake_case: bool,
) {
    if let Some(key) = label_key(prefix, key, snake_case) {
        labels.insert(key, value.to_string());
    }
}

/// Convert one scrape's worth of internal records into samples: an info
/// metric per tagged resource and a value metric per query record, then
/// the two output invariants (constant label key set per metric name, no
/// duplicate samples).
pub fn migrate(output: &ScrapeOutput, options: MigrateOptions) -> Vec<PrometheusMetric> {
    let snake = options.labels_snake_case;
    let mut metrics = Vec::new();

    for result in &output.resources {
        for resource in &result.resources {
            let mut labels = BTreeMap::new();
            labels.insert("name".to_string(), resource.arn.clone());
            labels.insert("region".to_string(), result.context.region.clone());
            labels.insert("account_id".to_string(), result.context.account_id.clone());
            for tag in &resource.tags {
                insert_label(&mut labels, "tag_", &tag.key, &tag.value, snake);
            }
            for tag in &result.context.custom_tags {
                insert_label(&mut labels, "custom_tag_", &tag.key, &tag.value, snake);
            }
            metrics.push(PrometheusMetric {
                name: format!("{}_info", prom_namespace(&resource.namespace)),
                labels,
                value: 0.0,
                timestamp: None,
            });
        }
    }

    for result in &output.metrics {
        for data in &result.data {
            let name = format!(
                "{}_{}_{}",
                prom_namespace(&data.namespace),
                prom_string(&data.metric_name),
                prom_string(&data.statistic.to_string()),
            );

            let mut labels = BTreeMap::new();
            labels.insert("name".to_string(), data.resource_name.clone());
            labels.insert("region".to_string(), data.region.clone());
            labels.insert("account_id".to_string(), data.account_id.clone());
            for dimension in &data.dimensions {
                insert_label(
                    &mut labels,
                    "dimension_",
                    &dimension.name,
                    &dimension.value,
                    snake,
                );
            }
            for tag in &data.tags {
                insert_label(&mut labels, "tag_", &tag.key, &tag.value, snake);
            }
            for tag in &data.custom_tags {
                insert_label(&mut labels, "custom_tag_", &tag.key, &tag.value, snake);
            }

            let point = data.result.as_ref();
            let datapoint = point.and_then(|p| p.datapoint);
            let value = match datapoint {
                Some(v) => v,
                // Emit the series even without data so it stays visible.
                None if data.nil_to_zero => 0.0,
                None => f64::NAN,
            };
            let timestamp = if data.add_timestamp && datapoint.is_some() {
                point.and_then(|p| p.timestamp)
            } else {
                None
            };

            metrics.push(PrometheusMetric {
                name,
                labels,
                value,
                timestamp,
            });
        }
    }

    ensure_label_consistency(&mut metrics);
    dedupe(metrics)
}

/// Every sample of a metric family carries the same label keys, missing
/// values filled with "".
fn ensure_label_consistency(metrics: &mut [PrometheusMetric]) {
    let mut keys: HashMap<String, BTreeSet<String>> = HashMap::new();
    for metric in metrics.iter() {
        keys.entry(metric.name.clone())
            .or_default()
            .extend(metric.labels.keys().cloned());
    }
    for metric in metrics.iter_mut() {
        if let Some(keys) = keys.get(&metric.name) {
            for key in keys {
                metric
                    .labels
                    .entry(key.clone())
                    .or_insert_with(String::new);
            }
        }
    }
}

fn signature(metric: &PrometheusMetric) -> String {
    metric
        .labels
        .iter()
        .map(|(k, v)| format!("{k}\u{1}{v}"))
        .collect::<Vec<_>>()
        .join("\u{2}")
}

fn dedupe(metrics: Vec<PrometheusMetric>) -> Vec<PrometheusMetric> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(metrics.len());
    for metric in metrics {
        if seen.insert((metric.name.clone(), signature(&metric))) {
            out.push(metric);
        } else {
            DUPLICATE_METRICS_FILTERED.inc();
        }
    }
    out
}

/// Samples grouped into gauge families, ready for the text encoder.
pub fn to_metric_families(metrics: &[PrometheusMetric]) -> Vec<proto::MetricFamily> {
    let mut grouped: BTreeMap<&str, Vec<&PrometheusMetric>> = BTreeMap::new();
    for metric in metrics {
        grouped.entry(&metric.name).or_default().push(metric);
    }

    let mut families = Vec::with_capacity(grouped.len());
    for (name, group) in grouped {
        let mut family = proto::MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(format!("{name} gathered from CloudWatch"));
        family.set_field_type(proto::MetricType::GAUGE);
        for metric in group {
            let mut sample = proto::Metric::default();
            for (key, value) in &metric.labels {
                let mut pair = proto::LabelPair::default();
                pair.set_name(key.clone());
                pair.set_value(value.clone());
                sample.mut_label().push(pair);
            }
            let mut gauge = proto::Gauge::default();
            gauge.set_value(metric.value);
            sample.set_gauge(gauge);
            if let Some(timestamp) = metric.timestamp {
                sample.set_timestamp_ms(timestamp.timestamp_millis());
            }
            family.mut_metric().push(sample);
        }
        families.push(family);
    }
    families
}
