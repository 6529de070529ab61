pub mod config;
pub mod error;
pub mod fetcher;
pub mod latency;
pub mod matcher;
pub mod odds;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod timing;
pub mod types;

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Load configuration and install the log subscriber. A bad environment ends
/// the process with status 1 before anything runs.
pub fn bootstrap() -> Config {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    cfg
}
