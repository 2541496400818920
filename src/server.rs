use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use log::info;
use prometheus::{Encoder, TextEncoder};

use tagwatch::output::prometheus::{migrate, to_metric_families, MigrateOptions};
use tagwatch::scraper::Scraper;

#[derive(Clone)]
pub struct AppState {
    pub scraper: Arc<Scraper>,
    pub migrate_options: MigrateOptions,
    pub scrape_deadline: Option<Duration>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<html>
<head><title>tagwatch</title></head>
<body>
<h1>tagwatch</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#,
    )
}

/// One full scrape per request; job failures are logged and counted, so
/// the endpoint itself answers 200 whenever the process is healthy.
async fn metrics(State(state): State<AppState>) -> Result<Response, String> {
    let output = state.scraper.scrape(state.scrape_deadline).await;
    info!(
        "scrape finished: {} resource sets, {} metric sets, {} job errors",
        output.resources.len(),
        output.metrics.len(),
        output.errors.len()
    );

    let samples = migrate(&output, state.migrate_options);
    let mut families = to_metric_families(&samples);
    families.extend(prometheus::gather());

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| format!("cannot encode metrics: {e}"))?;

    Ok((
        [(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buffer,
    )
        .into_response())
}
