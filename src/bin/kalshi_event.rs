use tracing::error;

use closing_line_collector::config::Config;
use closing_line_collector::error::Result;
use closing_line_collector::fetcher::KalshiClient;
use closing_line_collector::pipeline::event_details;

#[tokio::main]
async fn main() {
    let cfg = closing_line_collector::bootstrap();

    if let Err(e) = run(&cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: &Config) -> Result<()> {
    let client = KalshiClient::new(cfg)?;
    let event = event_details(cfg, &client).await?;
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}
