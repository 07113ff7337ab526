// Thin JSON REST client used by query fetchers.
// Maps transport and status failures into the crate error taxonomy.

use crate::error::{Error, Result};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = concat!("requery/", env!("CARGO_PKG_VERSION"));

/// JSON REST client bound to a base URL.
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Build a client for `base_url` (no trailing slash needed).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Network(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json_with_params<T: Serialize + ?Sized>(
        &self,
        path: &str,
        params: &T,
    ) -> Result<Value> {
        let response = self.client.get(self.url(path)).query(params).send().await?;
        Self::decode(response).await
    }

    /// DELETE `path`; returns the (possibly empty) JSON body.
    pub async fn delete_json(&self, path: &str) -> Result<Value> {
        let response = self.client.delete(self.url(path)).send().await?;
        Self::decode(response).await
    }

    /// PATCH `path` with a JSON body and decode the JSON response.
    pub async fn patch_json(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self.client.patch(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    /// Check status and decode. Empty bodies decode as JSON null so that
    /// DELETE endpoints returning nothing still succeed.
    async fn decode(response: Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let message = match status.canonical_reason() {
                Some(reason) => reason.to_string(),
                None => format!("unexpected status {status}"),
            };
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| Error::Parse(err.to_string()))
    }
}
