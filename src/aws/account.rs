use async_trait::async_trait;

use crate::aws::{transport, AccountSource};
use crate::counters::{STS_REQUESTS, STS_REQUEST_ERRORS};
use crate::errors::ApiError;

pub struct StsAccount {
    client: aws_sdk_sts::Client,
}

impl StsAccount {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        StsAccount { client }
    }
}

#[async_trait]
impl AccountSource for StsAccount {
    async fn account_id(&self) -> Result<String, ApiError> {
        STS_REQUESTS.inc();
        let identity = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| {
                STS_REQUEST_ERRORS.inc();
                transport(e)
            })?;
        identity
            .account()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Transport("caller identity carries no account id".into()))
    }
}
