pub mod list;
pub mod request;
pub mod serve;
pub mod user;

use anyhow::Result;

use crate::config::Config;
use crate::server::{NestClient, NestRequest, NestResponse};

/// Send one request to the server at `addr` (or the configured listen address).
pub fn call(addr: Option<&str>, request: &NestRequest) -> Result<NestResponse> {
    let config = Config::load()?;
    let addr = addr.unwrap_or(config.listen());
    let mut client = NestClient::connect(addr)?;
    client.call(request)
}
