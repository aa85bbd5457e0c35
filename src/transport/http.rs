//! Discrete transport: one HTTP POST per drained queue item.

use std::future::Future;

use log::warn;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::{DiscreteRequest, DiscreteTransport, TransportError};

/// POSTs serialized envelopes to one URL and returns the response body.
///
/// The body is returned for any HTTP status; decoding and error handling
/// happen in the engine.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn to_header_map(headers: &std::collections::BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(
                target: "wsrpc::transport::http",
                "Skipping invalid header: {}",
                name
            ),
        }
    }
    map
}

impl DiscreteTransport for HttpTransport {
    fn exchange(
        &self,
        request: DiscreteRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send + 'static {
        let pending = self
            .client
            .post(self.url.clone())
            .headers(to_header_map(&request.headers))
            .body(request.body)
            .send();
        async move {
            let response = pending
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))
        }
    }
}
