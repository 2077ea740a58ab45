use reqwest::Client;
use std::time::Duration;
use crate::error::Result;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_USER_AGENT: &str = concat!("twitter-relay/", env!("CARGO_PKG_VERSION"));

pub fn create_http_client(timeout: Duration, user_agent: Option<&str>) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
        .connect_timeout(CONNECTION_TIMEOUT)
        .timeout(timeout)
        .build()?;

    Ok(client)
}
