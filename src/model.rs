use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Deserialize;

lazy_static! {
    static ref PERCENTILE: Regex = Regex::new(r"^p(\d{1,2}(\.\d{1,2})?|100)$").unwrap();
}

/// A resource tag, also used as a search filter where `value` is an
/// anchored regular expression matched against the actual tag value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// A CloudWatch dimension. A metric identity is the namespace, the metric
/// name and the *set* of its dimensions, order-independent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// A resource found through the tagging API (or a custom discovery hook),
/// immutable once built and discarded at the end of the scrape.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedResource {
    pub arn: String,
    pub namespace: String,
    pub region: String,
    pub tags: Vec<Tag>,
}

impl TaggedResource {
    /// True iff every filter has a tag with the same key whose value
    /// matches the filter's anchored regex. An empty filter set matches.
    pub fn filter_through_tags(&self, filters: &[Tag]) -> bool {
        filters.iter().all(|filter| {
            self.tags.iter().any(|tag| {
                if tag.key != filter.key {
                    return false;
                }
                match Regex::new(&format!("^(?:{})$", filter.value)) {
                    Ok(re) => re.is_match(&tag.value),
                    Err(e) => {
                        warn!("invalid tag filter regex {}: {}", filter.value, e);
                        false
                    }
                }
            })
        })
    }

    /// Project the resource tags onto the exported key set: always the
    /// same keys, in order, missing values filled with "".
    pub fn metric_tags(&self, exported_keys: &[String]) -> Vec<Tag> {
        exported_keys
            .iter()
            .map(|key| Tag {
                key: key.clone(),
                value: self
                    .tags
                    .iter()
                    .find(|t| &t.key == key)
                    .map(|t| t.value.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// A catalog entry returned by `ListMetrics`: an existing series that
/// carries no data yet.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub namespace: String,
    pub name: String,
    pub dimensions: Vec<Dimension>,
}

/// Aggregation selector. Percentiles keep their literal `p<N>` spelling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Statistic {
    Average,
    Sum,
    Minimum,
    Maximum,
    SampleCount,
    Percentile(String),
}

impl Statistic {
    pub fn is_percentile(&self) -> bool {
        matches!(self, Statistic::Percentile(_))
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statistic::Average => write!(f, "Average"),
            Statistic::Sum => write!(f, "Sum"),
            Statistic::Minimum => write!(f, "Minimum"),
            Statistic::Maximum => write!(f, "Maximum"),
            Statistic::SampleCount => write!(f, "SampleCount"),
            Statistic::Percentile(p) => write!(f, "{p}"),
        }
    }
}

impl TryFrom<String> for Statistic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Average" => Ok(Statistic::Average),
            "Sum" => Ok(Statistic::Sum),
            "Minimum" => Ok(Statistic::Minimum),
            "Maximum" => Ok(Statistic::Maximum),
            "SampleCount" => Ok(Statistic::SampleCount),
            p if PERCENTILE.is_match(p) => Ok(Statistic::Percentile(p.to_string())),
            other => Err(format!("unknown statistic {other}")),
        }
    }
}

/// One raw datapoint from `GetMetricStatistics`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Datapoint {
    pub average: Option<f64>,
    pub sum: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub sample_count: Option<f64>,
    pub extended_statistics: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// The single resolved value of a query: present once the API answered
/// for the query id, even when the series itself was empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricDataPoint {
    pub datapoint: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Internal working record, one per (metric, statistic). Created by a job
/// runner, filled in from `GetMetricData` results and consumed by the
/// prometheus migrator.
#[derive(Clone, Debug)]
pub struct CloudwatchData {
    /// Owning resource ARN, the job name for custom namespaces, or
    /// "global" when no associator rule matched the metric.
    pub resource_name: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub tags: Vec<Tag>,
    pub custom_tags: Vec<Tag>,
    pub region: String,
    pub account_id: String,
    pub statistic: Statistic,
    pub period: i64,
    pub length: i64,
    pub delay: i64,
    pub nil_to_zero: bool,
    pub add_timestamp: bool,
    pub query_id: Option<String>,
    pub result: Option<MetricDataPoint>,
}

/// Demultiplex one statistic out of raw datapoints, newest first.
/// `Average` is the arithmetic mean over every point carrying an average,
/// stamped with the newest of their timestamps; the other statistics take
/// the newest point where the field is set.
pub fn select_datapoint(datapoints: &[Datapoint], statistic: &Statistic) -> MetricDataPoint {
    let mut points: Vec<&Datapoint> = datapoints.iter().collect();
    points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if let Statistic::Average = statistic {
        let averaged: Vec<&Datapoint> = points
            .iter()
            .filter(|p| p.average.is_some())
            .copied()
            .collect();
        if averaged.is_empty() {
            return MetricDataPoint::default();
        }
        let sum: f64 = averaged.iter().filter_map(|p| p.average).sum();
        return MetricDataPoint {
            datapoint: Some(sum / averaged.len() as f64),
            timestamp: averaged.iter().map(|p| p.timestamp).max(),
        };
    }

    for point in points {
        let value = match statistic {
            Statistic::Sum => point.sum,
            Statistic::Minimum => point.minimum,
            Statistic::Maximum => point.maximum,
            Statistic::SampleCount => point.sample_count,
            Statistic::Percentile(p) => point.extended_statistics.get(p).copied(),
            Statistic::Average => unreachable!(),
        };
        if let Some(value) = value {
            return MetricDataPoint {
                datapoint: Some(value),
                timestamp: Some(point.timestamp),
            };
        }
    }
    MetricDataPoint::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resource(tags: &[(&str, &str)]) -> TaggedResource {
        TaggedResource {
            arn: "arn:aws:ec2:us-east-1:123:instance/i-1".to_string(),
            namespace: "AWS/EC2".to_string(),
            region: "us-east-1".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| Tag {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    fn filters(pairs: &[(&str, &str)]) -> Vec<Tag> {
        pairs
            .iter()
            .map(|(k, v)| Tag {
                key: k.to_string(),
                value: v.to_string(),
            })
            .collect()
    }

    #[test]
    fn empty_filter_set_matches() {
        assert!(resource(&[]).filter_through_tags(&[]));
    }

    #[test]
    fn all_filters_must_match() {
        let r = resource(&[("Name", "web-1"), ("Env", "prod")]);
        assert!(r.filter_through_tags(&filters(&[("Name", "web-.*")])));
        assert!(r.filter_through_tags(&filters(&[("Name", "web-.*"), ("Env", "prod")])));
        assert!(!r.filter_through_tags(&filters(&[("Name", "web-.*"), ("Env", "dev")])));
        assert!(!r.filter_through_tags(&filters(&[("Missing", ".*")])));
    }

    #[test]
    fn filter_value_regex_is_anchored() {
        let r = resource(&[("Name", "web-1-old")]);
        assert!(!r.filter_through_tags(&filters(&[("Name", "web-1")])));
        assert!(r.filter_through_tags(&filters(&[("Name", "web-1.*")])));
    }

    #[test]
    fn metric_tags_keep_a_constant_key_set() {
        let r = resource(&[("Name", "web-1")]);
        let exported = vec!["Name".to_string(), "Owner".to_string()];
        let tags = r.metric_tags(&exported);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].value, "web-1");
        assert_eq!(tags[1].key, "Owner");
        assert_eq!(tags[1].value, "");
    }

    #[test]
    fn statistic_parsing() {
        assert_eq!(
            Statistic::try_from("Average".to_string()),
            Ok(Statistic::Average)
        );
        assert_eq!(
            Statistic::try_from("p99".to_string()),
            Ok(Statistic::Percentile("p99".to_string()))
        );
        assert_eq!(
            Statistic::try_from("p99.99".to_string()),
            Ok(Statistic::Percentile("p99.99".to_string()))
        );
        assert_eq!(
            Statistic::try_from("p100".to_string()),
            Ok(Statistic::Percentile("p100".to_string()))
        );
        assert!(Statistic::try_from("p101".to_string()).is_err());
        assert!(Statistic::try_from("median".to_string()).is_err());
    }

    fn point(ts: i64) -> Datapoint {
        Datapoint {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn average_is_a_mean_over_all_points() {
        let points = vec![
            Datapoint {
                average: Some(2.0),
                ..point(100)
            },
            Datapoint {
                average: Some(4.0),
                ..point(200)
            },
            Datapoint {
                average: Some(6.0),
                ..point(300)
            },
        ];
        let selected = select_datapoint(&points, &Statistic::Average);
        assert_eq!(selected.datapoint, Some(4.0));
        assert_eq!(selected.timestamp, Some(Utc.timestamp_opt(300, 0).unwrap()));
    }

    #[test]
    fn maximum_takes_the_newest_set_field() {
        let points = vec![
            Datapoint {
                maximum: Some(9.0),
                ..point(300)
            },
            Datapoint {
                maximum: Some(1.0),
                ..point(100)
            },
            Datapoint {
                ..point(400)
            },
        ];
        let selected = select_datapoint(&points, &Statistic::Maximum);
        assert_eq!(selected.datapoint, Some(9.0));
        assert_eq!(selected.timestamp, Some(Utc.timestamp_opt(300, 0).unwrap()));
    }

    #[test]
    fn percentile_looks_up_extended_statistics() {
        let mut ext = HashMap::new();
        ext.insert("p99".to_string(), 42.0);
        let points = vec![
            Datapoint {
                extended_statistics: ext,
                ..point(100)
            },
            Datapoint {
                ..point(200)
            },
        ];
        let selected = select_datapoint(&points, &Statistic::Percentile("p99".to_string()));
        assert_eq!(selected.datapoint, Some(42.0));
    }

    #[test]
    fn no_qualifying_point_yields_an_empty_result() {
        let selected = select_datapoint(&[point(100)], &Statistic::Sum);
        assert_eq!(selected, MetricDataPoint::default());
    }
}
