use tracing::error;

use closing_line_collector::scheduler::live_odds_stage;

#[tokio::main]
async fn main() {
    let cfg = closing_line_collector::bootstrap();

    // Runs until the process is stopped; only startup errors return.
    if let Err(e) = live_odds_stage(&cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}
