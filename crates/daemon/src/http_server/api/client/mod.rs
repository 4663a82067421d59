//! Typed client for the daemon API
//!
//! Every endpoint module implements [`ApiRequest`] for its request type, so
//! the CLI calls `client.call(request)` and gets the endpoint's response type
//! back.

use reqwest::{Client, RequestBuilder, Url};

mod client;
mod error;

pub use client::ApiClient;
pub use error::ApiError;

pub trait ApiRequest {
    type Response: serde::de::DeserializeOwned;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder;
}

/// `base_url` with its path replaced by `path`.
pub(crate) fn endpoint(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    url.set_path(path);
    url
}
