use std::fmt;

use strum_macros::Display;
use thiserror::Error;

/// Failure of one remote API interaction.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A resource-producing step ran but nothing matched the search tags.
    /// Callers treat this as a soft, job-level condition.
    #[error("expected resources for {namespace} but found none")]
    ExpectedResourcesNotFound { namespace: String },
    #[error(transparent)]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum JobErrorKind {
    Account,
    ResourceMetadata,
    CloudwatchCollection,
    ExpectedResourcesNotFound,
}

/// One job's failure, with enough context to log it on its own. A job
/// error never fails the scrape.
#[derive(Debug)]
pub struct JobError {
    pub account_id: Option<String>,
    pub namespace: String,
    pub region: String,
    pub role_arn: Option<String>,
    pub kind: JobErrorKind,
    pub source: ApiError,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} error in {} region={} role={} account={}: {}",
            self.kind,
            self.namespace,
            self.region,
            self.role_arn.as_deref().unwrap_or("default"),
            self.account_id.as_deref().unwrap_or("unknown"),
            self.source,
        )
    }
}
