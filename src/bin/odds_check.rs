use tracing::{error, info};

use closing_line_collector::pipeline::odds_check_stage;

#[tokio::main]
async fn main() {
    let cfg = closing_line_collector::bootstrap();

    match odds_check_stage(&cfg).await {
        Ok(sample) => info!(total_games = sample.total_games, "Odds provider reachable"),
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}
