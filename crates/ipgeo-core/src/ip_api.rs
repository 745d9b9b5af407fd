use std::net::IpAddr;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::IpApiConfig;
use crate::error::{IpGeoError, Result};

const FREE_BASE_URL: &str = "http://ip-api.com";
const PRO_BASE_URL: &str = "https://pro.ip-api.com";

const BASE_FIELDS: &[&str] = &[
    "status",
    "message",
    "query",
    "country",
    "countryCode",
    "region",
    "regionName",
    "city",
    "zip",
    "lat",
    "lon",
    "timezone",
    "isp",
    "org",
    "as",
];

const EXTENDED_FIELDS: &[&str] = &[
    "continent",
    "continentCode",
    "district",
    "offset",
    "currency",
    "asname",
    "reverse",
    "mobile",
    "proxy",
    "hosting",
];

/// Geolocation record as returned by ip-api.com. Every field but `status` depends on the
/// requested field set, so all of them are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpDetails {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continent_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    pub include_extended_data: bool,
    pub use_https: bool,
}

#[derive(Debug, Clone)]
pub struct IpApiClient {
    http: reqwest::Client,
    cfg: IpApiConfig,
}

impl IpApiClient {
    pub fn new(cfg: IpApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http, cfg })
    }

    /// Look up `ip`, or the caller's own public address when `ip` is `None`.
    pub async fn get_details(&self, ip: Option<&str>, opts: LookupOptions) -> Result<IpDetails> {
        let url = self.lookup_url(ip, opts)?;
        debug!(ip = ip.unwrap_or("current"), extended = opts.include_extended_data, "ip-api lookup");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IpGeoError::Api {
                status: Some(status.as_u16()),
                message: describe_failure(status, &body),
            });
        }

        let details: IpDetails = resp.json().await?;
        if details.status != "success" {
            return Err(IpGeoError::Api {
                status: None,
                message: details
                    .message
                    .unwrap_or_else(|| "lookup failed".to_string()),
            });
        }
        Ok(details)
    }

    fn lookup_url(&self, ip: Option<&str>, opts: LookupOptions) -> Result<Url> {
        let ip = ip.map(str::trim).filter(|s| !s.is_empty());
        if let Some(ip) = ip {
            ip.parse::<IpAddr>()
                .map_err(|_| IpGeoError::InvalidIp(ip.to_string()))?;
        }

        let base = match (&self.cfg.base_url, &self.cfg.token) {
            (Some(base), _) => base.as_str(),
            (None, Some(_)) => PRO_BASE_URL,
            (None, None) if opts.use_https => {
                return Err(IpGeoError::AuthMissing(
                    "IPAPI_API_TOKEN is required for HTTPS lookups (ip-api.com pro)".to_string(),
                ));
            }
            (None, None) => FREE_BASE_URL,
        };

        let mut url = Url::parse(base)
            .map_err(|e| IpGeoError::Config(format!("invalid ip-api base url {base}: {e}")))?;
        url.set_path(&format!("/json/{}", ip.unwrap_or_default()));

        let mut fields = BASE_FIELDS.to_vec();
        if opts.include_extended_data {
            fields.extend_from_slice(EXTENDED_FIELDS);
        }
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("fields", &fields.join(","));
            if let Some(token) = &self.cfg.token {
                q.append_pair("key", token);
            }
        }
        Ok(url)
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return "rate limit exceeded".to_string();
    }
    let body = body.trim();
    if body.is_empty() {
        status.to_string()
    } else {
        body.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::net::SocketAddr;

    use axum::Json;
    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;

    async fn start_mock_ip_api() -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        async fn lookup(
            Path(ip): Path<String>,
            Query(q): Query<HashMap<String, String>>,
        ) -> (AxumStatus, Json<serde_json::Value>) {
            match ip.as_str() {
                "10.0.0.1" => (
                    AxumStatus::OK,
                    Json(serde_json::json!({
                        "status": "fail",
                        "message": "private range",
                        "query": ip
                    })),
                ),
                "9.9.9.9" => (
                    AxumStatus::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({})),
                ),
                _ => {
                    let extended = q
                        .get("fields")
                        .is_some_and(|f| f.split(',').any(|x| x == "hosting"));
                    let mut body = serde_json::json!({
                        "status": "success",
                        "query": ip,
                        "country": "United States",
                        "countryCode": "US",
                        "city": "Mountain View",
                        "lat": 37.4,
                        "lon": -122.07,
                        "as": "AS15169 Google LLC",
                        "isp": q.get("key").cloned().unwrap_or_else(|| "Google LLC".to_string())
                    });
                    if extended {
                        body["hosting"] = serde_json::json!(true);
                    }
                    (AxumStatus::OK, Json(body))
                }
            }
        }

        let app = Router::new().route("/json/{ip}", get(lookup));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((addr, handle))
    }

    fn client_for(addr: SocketAddr, token: Option<&str>) -> IpApiClient {
        IpApiClient::new(IpApiConfig {
            token: token.map(str::to_string),
            base_url: Some(format!("http://{addr}")),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn successful_lookup_decodes_details() -> anyhow::Result<()> {
        let (addr, task) = start_mock_ip_api().await?;
        let client = client_for(addr, None);

        let d = client
            .get_details(Some("8.8.8.8"), LookupOptions::default())
            .await?;
        assert_eq!(d.query.as_deref(), Some("8.8.8.8"));
        assert_eq!(d.country_code.as_deref(), Some("US"));
        assert_eq!(d.as_number.as_deref(), Some("AS15169 Google LLC"));
        assert_eq!(d.hosting, None);

        let d = client
            .get_details(
                Some("8.8.8.8"),
                LookupOptions {
                    include_extended_data: true,
                    use_https: false,
                },
            )
            .await?;
        assert_eq!(d.hosting, Some(true));

        task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn token_is_sent_as_key() -> anyhow::Result<()> {
        let (addr, task) = start_mock_ip_api().await?;
        let client = client_for(addr, Some("secret-key"));
        let d = client
            .get_details(Some("1.1.1.1"), LookupOptions::default())
            .await?;
        assert_eq!(d.isp.as_deref(), Some("secret-key"));
        task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn vendor_failures_become_api_errors() -> anyhow::Result<()> {
        let (addr, task) = start_mock_ip_api().await?;
        let client = client_for(addr, None);

        let err = client
            .get_details(Some("10.0.0.1"), LookupOptions::default())
            .await
            .expect_err("private range");
        assert!(matches!(&err, IpGeoError::Api { status: None, message } if message == "private range"));

        let err = client
            .get_details(Some("9.9.9.9"), LookupOptions::default())
            .await
            .expect_err("rate limited");
        assert!(matches!(err, IpGeoError::Api { status: Some(429), .. }));

        task.abort();
        Ok(())
    }

    #[test]
    fn rejects_malformed_ip_before_any_request() {
        let client = IpApiClient::new(IpApiConfig::default()).expect("client");
        let err = client
            .lookup_url(Some("not-an-ip"), LookupOptions::default())
            .expect_err("invalid");
        assert!(matches!(err, IpGeoError::InvalidIp(_)));
    }

    #[test]
    fn endpoint_selection() {
        let free = IpApiClient::new(IpApiConfig::default()).expect("client");
        let url = free
            .lookup_url(None, LookupOptions::default())
            .expect("url");
        assert_eq!(url.origin().ascii_serialization(), FREE_BASE_URL);
        assert_eq!(url.path(), "/json/");

        let err = free
            .lookup_url(
                Some("8.8.8.8"),
                LookupOptions {
                    include_extended_data: false,
                    use_https: true,
                },
            )
            .expect_err("https needs token");
        assert!(matches!(err, IpGeoError::AuthMissing(_)));

        let pro = IpApiClient::new(IpApiConfig {
            token: Some("k".to_string()),
            base_url: None,
        })
        .expect("client");
        let url = pro
            .lookup_url(Some("2001:4860:4860::8888"), LookupOptions::default())
            .expect("url");
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("pro.ip-api.com"));
        assert!(url.query().unwrap_or_default().contains("key=k"));
    }
}
