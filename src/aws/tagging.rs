use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::aws::{transport, TaggingSource};
use crate::config::DiscoveryJob;
use crate::counters::{TAGGING_REQUESTS, TAGGING_REQUEST_ERRORS};
use crate::errors::ApiError;
use crate::model::{Tag, TaggedResource};
use crate::registry;

const RESOURCES_PER_PAGE: i32 = 100;
const MAX_PAGES: usize = 100;

pub struct TaggingClient {
    client: aws_sdk_resourcegroupstagging::Client,
    semaphore: Arc<Semaphore>,
}

impl TaggingClient {
    pub fn new(client: aws_sdk_resourcegroupstagging::Client, semaphore: Arc<Semaphore>) -> Self {
        TaggingClient { client, semaphore }
    }
}

#[async_trait]
impl TaggingSource for TaggingClient {
    async fn resources(
        &self,
        job: &DiscoveryJob,
        region: &str,
    ) -> Result<Vec<TaggedResource>, ApiError> {
        let service = registry::service_for(&job.namespace).ok_or_else(|| {
            ApiError::Transport(format!("unknown namespace {}", job.namespace).into())
        })?;

        let mut resources = Vec::new();
        let mut produced = false;

        if !service.resource_filters.is_empty() {
            produced = true;
            let filters: Vec<String> = service
                .resource_filters
                .iter()
                .map(|f| f.to_string())
                .collect();
            let mut token: Option<String> = None;
            for page in 0.. {
                if page >= MAX_PAGES {
                    warn!("{}: giving up tag pagination after {} pages", job.namespace, page);
                    break;
                }
                let _permit = self.semaphore.acquire().await.expect("semaphore closed");
                TAGGING_REQUESTS.inc();
                let output = self
                    .client
                    .get_resources()
                    .resources_per_page(RESOURCES_PER_PAGE)
                    .set_resource_type_filters(Some(filters.clone()))
                    .set_pagination_token(token.clone())
                    .send()
                    .await
                    .map_err(|e| {
                        TAGGING_REQUEST_ERRORS.inc();
                        transport(e)
                    })?;

                for mapping in output.resource_tag_mapping_list() {
                    let arn = match mapping.resource_arn() {
                        Some(arn) => arn.to_string(),
                        None => {
                            warn!("tag mapping has no arn");
                            continue;
                        }
                    };
                    let tags = mapping
                        .tags()
                        .iter()
                        .map(|t| Tag {
                            key: t.key().to_string(),
                            value: t.value().to_string(),
                        })
                        .collect();
                    let resource = TaggedResource {
                        arn,
                        namespace: job.namespace.clone(),
                        region: region.to_string(),
                        tags,
                    };
                    if resource.filter_through_tags(&job.search_tags) {
                        resources.push(resource);
                    } else {
                        debug!("{} filtered out by search tags", resource.arn);
                    }
                }

                token = output.pagination_token().map(str::to_string);
                if token.as_deref().unwrap_or("").is_empty() {
                    break;
                }
            }
        }

        if let Some(filter_func) = service.filter_func {
            filter_func(&mut resources);
        }

        if produced && resources.is_empty() {
            return Err(ApiError::ExpectedResourcesNotFound {
                namespace: job.namespace.clone(),
            });
        }
        info!(
            "discovered {} {} resources in {}",
            resources.len(),
            job.namespace,
            region
        );
        Ok(resources)
    }
}
