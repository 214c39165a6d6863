pub mod http_client;
pub mod http_server;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
