use tracing::error;

use closing_line_collector::pipeline::sportsbook_odds_stage;

#[tokio::main]
async fn main() {
    let cfg = closing_line_collector::bootstrap();

    if let Err(e) = sportsbook_odds_stage(&cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}
