use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ShopifyConfig;
use crate::error::{IpGeoError, Result};

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Value>,
}

/// Minimal Shopify Admin GraphQL client.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    endpoint: Url,
    access_token: String,
}

impl ShopifyClient {
    pub fn new(cfg: &ShopifyConfig) -> Result<Self> {
        let store = cfg.store_domain.as_deref().ok_or_else(|| {
            IpGeoError::AuthMissing("SHOPIFY_STORE_DOMAIN is not configured".to_string())
        })?;
        let access_token = cfg.access_token.clone().ok_or_else(|| {
            IpGeoError::AuthMissing("SHOPIFY_ACCESS_TOKEN is not configured".to_string())
        })?;

        let base = match &cfg.base_url {
            Some(b) => b.clone(),
            None => format!("https://{}", store.trim_end_matches('/')),
        };
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join(&format!("/admin/api/{}/graphql.json", cfg.api_version)))
            .map_err(|e| IpGeoError::Config(format!("invalid shopify endpoint {base}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            endpoint,
            access_token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run a query and return its `data` object. A response carrying `errors` is an error
    /// even when partial data is present.
    pub async fn query(&self, query: &str, variables: Option<&Value>) -> Result<Value> {
        if query.trim().is_empty() {
            return Err(IpGeoError::GraphQl("query must not be empty".to_string()));
        }
        debug!(endpoint = %self.endpoint, "shopify graphql query");

        let resp = self
            .http
            .post(self.endpoint.clone())
            .header("x-shopify-access-token", &self.access_token)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IpGeoError::Api {
                status: Some(status.as_u16()),
                message: body.trim().chars().take(200).collect(),
            });
        }

        let mut body: Value = resp.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array)
            && !errors.is_empty()
        {
            let msg = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IpGeoError::GraphQl(msg));
        }

        Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    async fn start_mock_shopify() -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        async fn graphql(
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            if headers
                .get("x-shopify-access-token")
                .and_then(|h| h.to_str().ok())
                != Some("shpat_test")
            {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "errors": "invalid token" })),
                );
            }
            let query = body["query"].as_str().unwrap_or_default();
            if query.contains("broken") {
                return (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "errors": [{ "message": "Field 'broken' doesn't exist" }]
                    })),
                );
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "data": {
                        "shop": { "name": "Demo", "currency": body["variables"]["currency"] }
                    }
                })),
            )
        }

        let app = Router::new().route("/admin/api/{version}/graphql.json", post(graphql));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((addr, handle))
    }

    fn cfg(addr: SocketAddr, token: &str) -> ShopifyConfig {
        ShopifyConfig {
            store_domain: Some("demo.myshopify.com".to_string()),
            access_token: Some(token.to_string()),
            api_version: "2025-01".to_string(),
            base_url: Some(format!("http://{addr}")),
        }
    }

    #[tokio::test]
    async fn query_returns_data_object() -> anyhow::Result<()> {
        let (addr, task) = start_mock_shopify().await?;
        let client = ShopifyClient::new(&cfg(addr, "shpat_test"))?;
        assert_eq!(client.endpoint().path(), "/admin/api/2025-01/graphql.json");

        let vars = serde_json::json!({ "currency": "CAD" });
        let data = client
            .query("query { shop { name currency } }", Some(&vars))
            .await?;
        assert_eq!(data["shop"]["name"], "Demo");
        assert_eq!(data["shop"]["currency"], "CAD");

        task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn graphql_and_http_errors_surface() -> anyhow::Result<()> {
        let (addr, task) = start_mock_shopify().await?;

        let client = ShopifyClient::new(&cfg(addr, "shpat_test"))?;
        let err = client.query("{ broken }", None).await.expect_err("errors");
        assert!(matches!(err, IpGeoError::GraphQl(m) if m.contains("broken")));

        let client = ShopifyClient::new(&cfg(addr, "wrong"))?;
        let err = client.query("{ shop { name } }", None).await.expect_err("401");
        assert!(matches!(err, IpGeoError::Api { status: Some(401), .. }));

        task.abort();
        Ok(())
    }

    #[test]
    fn missing_credentials_are_auth_errors() {
        let cfg = ShopifyConfig {
            store_domain: None,
            access_token: None,
            api_version: "2025-01".to_string(),
            base_url: None,
        };
        assert!(matches!(
            ShopifyClient::new(&cfg),
            Err(IpGeoError::AuthMissing(_))
        ));
    }

    #[test]
    fn default_endpoint_targets_store_domain() -> anyhow::Result<()> {
        let cfg = ShopifyConfig {
            store_domain: Some("demo.myshopify.com".to_string()),
            access_token: Some("t".to_string()),
            api_version: "2024-10".to_string(),
            base_url: None,
        };
        let client = ShopifyClient::new(&cfg)?;
        assert_eq!(
            client.endpoint().as_str(),
            "https://demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
        Ok(())
    }
}
