pub mod pool;

pub use pool::create_http_client;
