use tracing::{error, info};

use closing_line_collector::config::Config;
use closing_line_collector::error::Result;
use closing_line_collector::pipeline::{
    closing_lines_stage, series_markets_stage, sportsbook_odds_stage, RunReport,
};

#[tokio::main]
async fn main() {
    let cfg = closing_line_collector::bootstrap();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // Fail before any network work if the last stage cannot run.
    cfg.require_odds_api_key()?;
    info!(
        sport = %cfg.sport,
        data_dir = %cfg.data_dir.display(),
        minutes_before = cfg.minutes_before,
        "Collector starting"
    );

    let reports: Vec<RunReport> = vec![
        series_markets_stage(&cfg).await?,
        closing_lines_stage(&cfg).await?,
        sportsbook_odds_stage(&cfg).await?,
    ];

    for r in &reports {
        info!(
            stage = r.stage,
            processed = r.processed,
            successful = r.successful,
            failed = r.failed,
            skipped = r.skipped,
            "[SUMMARY] stage finished"
        );
    }
    Ok(())
}
