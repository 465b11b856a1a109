mod api_client;
mod cache;
mod collector;

pub use api_client::ApiClient;
pub use cache::ResponseCache;
pub use collector::{ApiCollector, CollectReport};
