use clap::Parser;
use log::error;

pub fn parse() -> Option<Args> {
    Args::parse().validate()
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to expose /metrics on; a bare `:port` binds all interfaces.
    #[arg(long = "listen-address", default_value_t = String::from(":5000"))]
    pub listen_address: String,
    /// Path to the scrape configuration file.
    #[arg(long = "config.file", default_value_t = String::from("config.yml"))]
    pub config_file: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Lowercase and snake-case label keys built from tags and dimensions.
    #[arg(long = "labels-snake-case", default_value_t = false)]
    pub labels_snake_case: bool,
    /// Max in-flight CloudWatch API calls.
    #[arg(long = "cloudwatch-concurrency", default_value_t = 5)]
    pub cloudwatch_concurrency: usize,
    /// Max in-flight resource tagging API calls.
    #[arg(long = "tag-concurrency", default_value_t = 5)]
    pub tag_concurrency: usize,
    /// Max queries per GetMetricData request (provider hard cap is 500).
    #[arg(long = "metrics-per-query", default_value_t = 500)]
    pub metrics_per_query: usize,
    /// Abort a scrape after this many seconds and serve partial results;
    /// 0 disables the deadline.
    #[arg(long = "scrape-timeout", default_value_t = 0)]
    pub scrape_timeout: u64,
}

impl Args {
    fn validate(self) -> Option<Self> {
        let mut err_count = 0;
        if self.cloudwatch_concurrency == 0 {
            error!("cloudwatch-concurrency must be at least 1");
            err_count += 1;
        }
        if self.tag_concurrency == 0 {
            error!("tag-concurrency must be at least 1");
            err_count += 1;
        }
        if self.metrics_per_query == 0 || self.metrics_per_query > 500 {
            error!("metrics-per-query must be between 1 and 500");
            err_count += 1;
        }
        if err_count > 0 {
            return None;
        }
        Some(self)
    }

    pub fn bind_address(&self) -> String {
        match self.listen_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen_address.clone(),
        }
    }
}
