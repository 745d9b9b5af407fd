use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpGeoError {
    #[error("invalid ip address: {0}")]
    InvalidIp(String),
    #[error("missing credential: {0}")]
    AuthMissing(String),
    #[error("api error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("filter error: {0}")]
    Filter(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl IpGeoError {
    /// Short category label used when surfacing errors to MCP clients.
    pub fn kind(&self) -> &'static str {
        match self {
            IpGeoError::InvalidIp(_) | IpGeoError::Filter(_) => "invalid_input",
            IpGeoError::AuthMissing(_) => "auth_missing",
            IpGeoError::Api { .. } | IpGeoError::GraphQl(_) => "api_error",
            IpGeoError::Config(_) => "config_error",
            IpGeoError::Http(_) | IpGeoError::Serde(_) => "unexpected_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, IpGeoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_includes_status_when_known() {
        let e = IpGeoError::Api {
            status: Some(429),
            message: "rate limited".to_string(),
        };
        assert_eq!(e.to_string(), "api error (429): rate limited");

        let e = IpGeoError::Api {
            status: None,
            message: "private range".to_string(),
        };
        assert_eq!(e.to_string(), "api error: private range");
        assert_eq!(e.kind(), "api_error");
    }
}
