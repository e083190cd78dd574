use std::env;

pub mod chart_response;
pub mod yahoo_client;

pub use chart_response::ChartEnvelope;
pub use yahoo_client::YahooFeed;

pub fn get_chart_base_url() -> String {
    env::var("CHART_BASE_URL")
        .unwrap_or_else(|_| "https://query1.finance.yahoo.com/v8/finance/chart".to_string())
}
