use std::collections::HashMap;

use aws_config::retry::RetryConfig;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use log::debug;
use tokio::sync::Mutex;

use crate::config::Role;
use crate::VERSION;

const MAX_API_ATTEMPTS: u32 = 5;

/// SDK configurations are expensive to build (role assumption is a
/// remote call), so they are cached per (region, role) for the process
/// lifetime and shared across jobs.
pub struct SessionCache {
    sts_region: Option<String>,
    configs: Mutex<HashMap<(String, Option<String>), SdkConfig>>,
}

impl SessionCache {
    pub fn new(sts_region: Option<String>) -> Self {
        SessionCache {
            sts_region,
            configs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn sdk_config(&self, region: &str, role: &Role) -> SdkConfig {
        let key = (region.to_string(), role.role_arn.clone());
        let mut configs = self.configs.lock().await;
        if let Some(config) = configs.get(&key) {
            return config.clone();
        }

        debug!(
            "building sdk config for region={} role={}",
            region,
            role.role_arn.as_deref().unwrap_or("default")
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_API_ATTEMPTS));
        if let Some(role_arn) = &role.role_arn {
            let sts_region = self
                .sts_region
                .clone()
                .unwrap_or_else(|| region.to_string());
            let provider = AssumeRoleProvider::builder(role_arn)
                .region(Region::new(sts_region))
                .session_name(format!("tagwatch-{VERSION}"))
                .build()
                .await;
            loader = loader.credentials_provider(provider);
        }
        let config = loader.load().await;
        configs.insert(key, config.clone());
        config
    }
}
