use std::path::Path;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, LevelFilter};

use tagwatch::aws::AwsClientFactory;
use tagwatch::config::ScrapeConf;
use tagwatch::output::prometheus::MigrateOptions;
use tagwatch::scraper::{ScrapeOptions, Scraper};
use tagwatch::VERSION;

mod args;
mod server;

#[tokio::main]
async fn main() {
    let Some(args) = args::parse() else {
        exit(1);
    };

    let mut logger = env_logger::Builder::from_default_env();
    if args.debug {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    tagwatch::counters::touch();

    let conf = match ScrapeConf::load(Path::new(&args.config_file)) {
        Ok(conf) => conf,
        Err(e) => {
            error!("cannot load {}: {}", args.config_file, e);
            exit(1);
        }
    };

    let factory = AwsClientFactory::new(
        conf.sts_region.clone(),
        args.cloudwatch_concurrency,
        args.tag_concurrency,
    );
    let scraper = Scraper::new(
        Arc::new(conf),
        Arc::new(factory),
        ScrapeOptions {
            metrics_per_query: args.metrics_per_query,
        },
    );

    let state = server::AppState {
        scraper: Arc::new(scraper),
        migrate_options: MigrateOptions {
            labels_snake_case: args.labels_snake_case,
        },
        scrape_deadline: match args.scrape_timeout {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        },
    };

    let bind = args.bind_address();
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind {bind}: {e}");
            exit(1);
        }
    };
    info!("tagwatch {VERSION} listening on {bind}");
    if let Err(e) = axum::serve(listener, server::router(state)).await {
        error!("server error: {e}");
        exit(1);
    }
}
