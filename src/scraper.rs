use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use regex::Regex;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::aws::{ClientFactory, MetricSource};
use crate::config::{MetricConfig, Role, ScrapeConf};
use crate::errors::{ApiError, JobError, JobErrorKind};
use crate::model::{CloudwatchData, Metric, Tag, TaggedResource};

pub mod associator;
pub mod batcher;
pub mod custom;
pub mod discovery;
pub mod statics;
pub mod window;

#[derive(Clone, Copy, Debug)]
pub struct ScrapeOptions {
    pub metrics_per_query: usize,
}

/// Where a result set came from, so the migrator can label it.
#[derive(Clone, Debug, Default)]
pub struct ScrapeContext {
    pub region: String,
    pub account_id: String,
    pub custom_tags: Vec<Tag>,
}

#[derive(Debug)]
pub struct ResourceResult {
    pub context: ScrapeContext,
    pub resources: Vec<TaggedResource>,
}

#[derive(Debug)]
pub struct MetricResult {
    pub context: ScrapeContext,
    pub data: Vec<CloudwatchData>,
}

#[derive(Debug, Default)]
pub struct ScrapeOutput {
    pub resources: Vec<ResourceResult>,
    pub metrics: Vec<MetricResult>,
    pub errors: Vec<JobError>,
}

/// Walks the configured job tree and fans one task out per
/// (job, region, role). Stateless across scrapes.
pub struct Scraper {
    conf: Arc<ScrapeConf>,
    factory: Arc<dyn ClientFactory>,
    options: ScrapeOptions,
}

impl Scraper {
    pub fn new(
        conf: Arc<ScrapeConf>,
        factory: Arc<dyn ClientFactory>,
        options: ScrapeOptions,
    ) -> Self {
        Scraper {
            conf,
            factory,
            options,
        }
    }

    pub async fn scrape(&self, deadline: Option<Duration>) -> ScrapeOutput {
        let output = Arc::new(Mutex::new(ScrapeOutput::default()));
        let accounts = self.resolve_accounts(&output).await;

        let mut set: JoinSet<()> = JoinSet::new();
        self.spawn_jobs(&mut set, &accounts, &output);

        match deadline {
            None => while set.join_next().await.is_some() {},
            Some(deadline) => {
                let drained =
                    timeout(deadline, async { while set.join_next().await.is_some() {} }).await;
                if drained.is_err() {
                    warn!("scrape deadline reached, returning partial results");
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                }
            }
        }

        let mut output = output.lock().expect("scrape collector poisoned");
        for error in &output.errors {
            match error.kind {
                JobErrorKind::ExpectedResourcesNotFound => info!("{error}"),
                _ => error!("{error}"),
            }
        }
        std::mem::take(&mut *output)
    }

    /// Account ids are resolved once per (region, role) pair and shared
    /// by every job on that pair; a failed pair skips its jobs.
    async fn resolve_accounts(
        &self,
        output: &Arc<Mutex<ScrapeOutput>>,
    ) -> HashMap<(String, Role), String> {
        let mut pairs: HashSet<(String, Role)> = HashSet::new();
        for job in &self.conf.discovery.jobs {
            for region in &job.regions {
                for role in job.roles() {
                    pairs.insert((region.clone(), role));
                }
            }
        }
        for job in &self.conf.custom_namespace {
            for region in &job.regions {
                for role in job.roles() {
                    pairs.insert((region.clone(), role));
                }
            }
        }
        for job in &self.conf.static_jobs {
            for region in &job.regions {
                for role in job.roles() {
                    pairs.insert((region.clone(), role));
                }
            }
        }

        let mut set = JoinSet::new();
        for (region, role) in pairs {
            let factory = self.factory.clone();
            set.spawn(async move {
                let source = factory.account(&region, &role).await;
                let resolved = source.account_id().await;
                (region, role, resolved)
            });
        }

        let mut accounts = HashMap::new();
        while let Some(joined) = set.join_next().await {
            let Ok((region, role, resolved)) = joined else {
                continue;
            };
            match resolved {
                Ok(account_id) => {
                    accounts.insert((region, role), account_id);
                }
                Err(source) => {
                    output.lock().expect("scrape collector poisoned").errors.push(JobError {
                        account_id: None,
                        namespace: "sts".to_string(),
                        region,
                        role_arn: role.role_arn,
                        kind: JobErrorKind::Account,
                        source,
                    });
                }
            }
        }
        accounts
    }

    fn spawn_jobs(
        &self,
        set: &mut JoinSet<()>,
        accounts: &HashMap<(String, Role), String>,
        output: &Arc<Mutex<ScrapeOutput>>,
    ) {
        for job in &self.conf.discovery.jobs {
            let exported_tags = self
                .conf
                .discovery
                .exported_tags_on_metrics
                .get(&job.namespace)
                .cloned()
                .unwrap_or_default();
            for region in &job.regions {
                for role in job.roles() {
                    let Some(account_id) = accounts.get(&(region.clone(), role.clone())) else {
                        continue;
                    };
                    let job = job.clone();
                    let region = region.clone();
                    let account_id = account_id.clone();
                    let exported_tags = exported_tags.clone();
                    let factory = self.factory.clone();
                    let options = self.options;
                    let output = output.clone();
                    set.spawn(async move {
                        let tagging = factory.tagging(&region, &role).await;
                        let api = factory.metrics(&region, &role).await;
                        let context = ScrapeContext {
                            region: region.clone(),
                            account_id: account_id.clone(),
                            custom_tags: job.custom_tags.clone(),
                        };
                        let outcome = discovery::run(
                            &job,
                            &region,
                            &account_id,
                            &exported_tags,
                            tagging,
                            api,
                            options,
                        )
                        .await;
                        let mut output = output.lock().expect("scrape collector poisoned");
                        match outcome {
                            Ok((resources, data)) => {
                                output.resources.push(ResourceResult {
                                    context: context.clone(),
                                    resources,
                                });
                                output.metrics.push(MetricResult { context, data });
                            }
                            Err((kind, source)) => output.errors.push(JobError {
                                account_id: Some(account_id),
                                namespace: job.namespace.clone(),
                                region,
                                role_arn: role.role_arn.clone(),
                                kind,
                                source,
                            }),
                        }
                    });
                }
            }
        }

        for job in &self.conf.custom_namespace {
            for region in &job.regions {
                for role in job.roles() {
                    let Some(account_id) = accounts.get(&(region.clone(), role.clone())) else {
                        continue;
                    };
                    let job = job.clone();
                    let region = region.clone();
                    let account_id = account_id.clone();
                    let factory = self.factory.clone();
                    let options = self.options;
                    let output = output.clone();
                    set.spawn(async move {
                        let api = factory.metrics(&region, &role).await;
                        let context = ScrapeContext {
                            region: region.clone(),
                            account_id: account_id.clone(),
                            custom_tags: job.custom_tags.clone(),
                        };
                        let outcome =
                            custom::run(&job, &region, &account_id, api, options).await;
                        let mut output = output.lock().expect("scrape collector poisoned");
                        match outcome {
                            Ok(data) => output.metrics.push(MetricResult { context, data }),
                            Err((kind, source)) => output.errors.push(JobError {
                                account_id: Some(account_id),
                                namespace: job.namespace.clone(),
                                region,
                                role_arn: role.role_arn.clone(),
                                kind,
                                source,
                            }),
                        }
                    });
                }
            }
        }

        for job in &self.conf.static_jobs {
            for region in &job.regions {
                for role in job.roles() {
                    let Some(account_id) = accounts.get(&(region.clone(), role.clone())) else {
                        continue;
                    };
                    let job = job.clone();
                    let region = region.clone();
                    let account_id = account_id.clone();
                    let factory = self.factory.clone();
                    let output = output.clone();
                    set.spawn(async move {
                        let api = factory.metrics(&region, &role).await;
                        let context = ScrapeContext {
                            region: region.clone(),
                            account_id: account_id.clone(),
                            custom_tags: job.custom_tags.clone(),
                        };
                        let outcome = statics::run(&job, &region, &account_id, api).await;
                        let mut output = output.lock().expect("scrape collector poisoned");
                        match outcome {
                            Ok(data) => output.metrics.push(MetricResult { context, data }),
                            Err((kind, source)) => output.errors.push(JobError {
                                account_id: Some(account_id),
                                namespace: job.namespace.clone(),
                                region,
                                role_arn: role.role_arn.clone(),
                                kind,
                                source,
                            }),
                        }
                    });
                }
            }
        }
    }
}

/// Compile a dimension value filter once per job run.
pub(crate) fn compile_value_filter(
    filter: &HashMap<String, String>,
) -> Vec<(String, Regex)> {
    filter
        .iter()
        .filter_map(|(name, pattern)| {
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(re) => Some((name.clone(), re)),
                Err(e) => {
                    warn!("invalid dimension value filter for {name}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// The two pre-association gates: an exact (order-independent) match on
/// dimension names when requirements are set, and per-dimension value
/// regexes.
pub(crate) fn passes_dimension_gates(
    metric: &Metric,
    requirements: &[String],
    value_filter: &[(String, Regex)],
) -> bool {
    if !requirements.is_empty() {
        let mut have: Vec<&str> = metric.dimensions.iter().map(|d| d.name.as_str()).collect();
        have.sort_unstable();
        let mut want: Vec<&str> = requirements.iter().map(String::as_str).collect();
        want.sort_unstable();
        if have != want {
            return false;
        }
    }
    for (name, re) in value_filter {
        if metric
            .dimensions
            .iter()
            .any(|d| &d.name == name && !re.is_match(&d.value))
        {
            return false;
        }
    }
    true
}

/// One `CloudwatchData` per configured statistic.
pub(crate) fn expand_statistics(
    metric: &Metric,
    config: &MetricConfig,
    resource_name: &str,
    tags: Vec<Tag>,
    custom_tags: &[Tag],
    region: &str,
    account_id: &str,
) -> Vec<CloudwatchData> {
    config
        .statistics
        .iter()
        .map(|statistic| CloudwatchData {
            resource_name: resource_name.to_string(),
            namespace: metric.namespace.clone(),
            metric_name: metric.name.clone(),
            dimensions: metric.dimensions.clone(),
            tags: tags.clone(),
            custom_tags: custom_tags.to_vec(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            statistic: statistic.clone(),
            period: config.period,
            length: config.length,
            delay: config.delay,
            nil_to_zero: config.nil_to_zero,
            add_timestamp: config.add_cloudwatch_timestamp,
            query_id: None,
            result: None,
        })
        .collect()
}

/// Batch the flat query list, fan the batches out, map the answers back
/// and compact entries whose query id never got an answer.
pub(crate) async fn dispatch_metric_data(
    data: Vec<CloudwatchData>,
    namespace: &str,
    rounding_period: Option<i64>,
    options: ScrapeOptions,
    api: Arc<dyn MetricSource>,
) -> Result<Vec<CloudwatchData>, ApiError> {
    let batches =
        batcher::MetricDataBatcher::new(data, options.metrics_per_query, rounding_period, Utc::now());

    let mut set = JoinSet::new();
    for mut batch in batches {
        let api = api.clone();
        let namespace = namespace.to_string();
        set.spawn(async move {
            let outcomes = api
                .metric_data(&batch.entries, &namespace, batch.start, batch.end)
                .await?;
            batcher::apply_outcomes(&mut batch, &outcomes);
            Ok::<Vec<CloudwatchData>, ApiError>(batch.entries)
        });
    }

    let mut filled = Vec::new();
    while let Some(joined) = set.join_next().await {
        let entries = joined.map_err(|e| ApiError::Transport(Box::new(e)))??;
        filled.extend(entries.into_iter().filter(|e| e.result.is_some()));
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dimension;

    fn metric(names: &[&str]) -> Metric {
        Metric {
            namespace: "AWS/ApplicationELB".to_string(),
            name: "RequestCount".to_string(),
            dimensions: names
                .iter()
                .map(|n| Dimension {
                    name: n.to_string(),
                    value: "v".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn requirement_gate_is_an_exact_name_match() {
        let requirements = vec!["LoadBalancer".to_string(), "TargetGroup".to_string()];
        let candidates = [
            metric(&["LoadBalancer", "TargetGroup", "AvailabilityZone"]),
            metric(&["LoadBalancer", "TargetGroup"]),
            metric(&["LoadBalancer", "AvailabilityZone"]),
            metric(&["LoadBalancer"]),
        ];
        let survivors: Vec<&Metric> = candidates
            .iter()
            .filter(|m| passes_dimension_gates(m, &requirements, &[]))
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].dimensions.len(), 2);
    }

    #[test]
    fn requirement_gate_ignores_order() {
        let requirements = vec!["TargetGroup".to_string(), "LoadBalancer".to_string()];
        assert!(passes_dimension_gates(
            &metric(&["LoadBalancer", "TargetGroup"]),
            &requirements,
            &[],
        ));
    }

    #[test]
    fn value_filter_drops_non_matching_dimensions() {
        let mut filter = HashMap::new();
        filter.insert("LoadBalancer".to_string(), "app/prod-.*".to_string());
        let compiled = compile_value_filter(&filter);

        let mut candidate = metric(&["LoadBalancer"]);
        candidate.dimensions[0].value = "app/prod-web/123".to_string();
        assert!(passes_dimension_gates(&candidate, &[], &compiled));

        candidate.dimensions[0].value = "app/dev-web/123".to_string();
        assert!(!passes_dimension_gates(&candidate, &[], &compiled));
    }

    #[test]
    fn expansion_creates_one_record_per_statistic() {
        let config = MetricConfig {
            name: "RequestCount".to_string(),
            statistics: vec![
                crate::model::Statistic::Sum,
                crate::model::Statistic::Average,
            ],
            ..Default::default()
        };
        let data = expand_statistics(
            &metric(&["LoadBalancer"]),
            &config,
            "arn:lb",
            vec![],
            &[],
            "us-east-1",
            "123",
        );
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].statistic, crate::model::Statistic::Sum);
        assert_eq!(data[1].resource_name, "arn:lb");
    }
}
