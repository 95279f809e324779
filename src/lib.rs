pub mod api;
pub mod client;
pub mod security;
pub mod transport;
pub mod utils;

pub use client::config::Config;
pub use client::error::ClientError;
pub use client::pipeline::{ApiResponse, Pipeline};
pub use client::ApiClient;
pub use transport::{ApiRequest, Transport};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
