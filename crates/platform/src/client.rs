//! HTTP implementation of [`PlatformApi`].

use async_trait::async_trait;
use serde_json::Value;

use crate::{PlatformApi, PlatformError, PlatformResult};

/// One platform connection: base URL + bearer token over a shared
/// `reqwest::Client` pool.
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> PlatformResult<Value> {
        let resp = req
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(PlatformError::from_status(status, body));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn list(&self, resource: &str, params: &Value) -> PlatformResult<Value> {
        let mut req = self.http.get(self.url(resource));
        if let Value::Object(map) = params {
            let query: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect();
            req = req.query(&query);
        }
        self.execute(req).await
    }

    async fn retrieve(&self, resource: &str, id: &str) -> PlatformResult<Value> {
        self.execute(self.http.get(self.url(&format!("{resource}/{id}"))))
            .await
    }

    async fn create(&self, resource: &str, body: &Value) -> PlatformResult<Value> {
        self.execute(self.http.post(self.url(resource)).json(body))
            .await
    }

    async fn patch(&self, resource: &str, id: &str, body: &Value) -> PlatformResult<Value> {
        self.execute(
            self.http
                .patch(self.url(&format!("{resource}/{id}")))
                .json(body),
        )
        .await
    }

    async fn delete(&self, resource: &str, id: &str) -> PlatformResult<()> {
        self.execute(self.http.delete(self.url(&format!("{resource}/{id}"))))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client = PlatformClient::new(
            reqwest::Client::new(),
            "https://api.example.com/v1/",
            "t",
        );
        assert_eq!(client.url("/queues"), "https://api.example.com/v1/queues");
        assert_eq!(client.url("queues/7"), "https://api.example.com/v1/queues/7");
    }
}
