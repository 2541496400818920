//! Process-wide counters for every remote API call, registered on the
//! default registry so they survive across scrapes.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

lazy_static! {
    pub static ref CLOUDWATCH_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "yace_cloudwatch_requests_total",
        "Number of CloudWatch API calls made",
        &["api_name"]
    )
    .unwrap();
    pub static ref CLOUDWATCH_REQUEST_ERRORS: IntCounterVec = register_int_counter_vec!(
        "yace_cloudwatch_request_errors",
        "Number of CloudWatch API calls that failed",
        &["api_name"]
    )
    .unwrap();
    pub static ref GETMETRICDATA_METRICS_REQUESTED: IntCounter = register_int_counter!(
        "yace_cloudwatch_getmetricdata_metrics_requested_total",
        "Number of metric queries requested through GetMetricData"
    )
    .unwrap();
    pub static ref DUPLICATE_METRICS_FILTERED: IntCounter = register_int_counter!(
        "yace_cloudwatch_duplicate_metrics_filtered",
        "Number of samples dropped because an identical one was already emitted"
    )
    .unwrap();
    pub static ref TAGGING_REQUESTS: IntCounter = register_int_counter!(
        "yace_tagging_requests_total",
        "Number of resource tagging API calls made"
    )
    .unwrap();
    pub static ref TAGGING_REQUEST_ERRORS: IntCounter = register_int_counter!(
        "yace_tagging_request_errors",
        "Number of resource tagging API calls that failed"
    )
    .unwrap();
    pub static ref STS_REQUESTS: IntCounter = register_int_counter!(
        "yace_sts_requests_total",
        "Number of STS API calls made"
    )
    .unwrap();
    pub static ref STS_REQUEST_ERRORS: IntCounter = register_int_counter!(
        "yace_sts_request_errors",
        "Number of STS API calls that failed"
    )
    .unwrap();
}

/// Force registration at startup so the counters show up on /metrics
/// before the first API call touches them.
pub fn touch() {
    lazy_static::initialize(&CLOUDWATCH_REQUESTS);
    lazy_static::initialize(&CLOUDWATCH_REQUEST_ERRORS);
    lazy_static::initialize(&GETMETRICDATA_METRICS_REQUESTED);
    lazy_static::initialize(&DUPLICATE_METRICS_FILTERED);
    lazy_static::initialize(&TAGGING_REQUESTS);
    lazy_static::initialize(&TAGGING_REQUEST_ERRORS);
    lazy_static::initialize(&STS_REQUESTS);
    lazy_static::initialize(&STS_REQUEST_ERRORS);
}
