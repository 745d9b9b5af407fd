use std::collections::BTreeMap;
use std::sync::Arc;

use ipgeo_core::{IpApiClient, IpGeoError, LookupOptions, OutputFormat, ShopifyClient};
use ipgeo_mcp::Tool;
use jsonschema::Validator;
use serde::Deserialize;
use serde_json::Value;

pub const IP_GET_DETAILS: &str = "ip_get_details";
pub const SHOPIFY_GRAPHQL_QUERY: &str = "shopify_graphql_query";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpDetailsArgs {
    ip_address: Option<String>,
    #[serde(default)]
    include_extended_data: bool,
    #[serde(default)]
    use_https: bool,
    jq: Option<String>,
    #[serde(default)]
    output_format: OutputFormat,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShopifyQueryArgs {
    query: String,
    variables: Option<Value>,
    jq: Option<String>,
    #[serde(default)]
    output_format: OutputFormat,
}

/// Result of a successful tool run: the rendered text plus the filtered value it came from.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub value: Value,
}

pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRuntime>,
}

impl ToolRegistry {
    pub fn new(ip_api: Arc<IpApiClient>, shopify: Option<Arc<ShopifyClient>>) -> anyhow::Result<Self> {
        let mut tools = BTreeMap::new();
        tools.insert(
            IP_GET_DETAILS.to_string(),
            ToolRuntime::new(ip_get_details_spec(), ToolImpl::IpDetails { client: ip_api })?,
        );
        tools.insert(
            SHOPIFY_GRAPHQL_QUERY.to_string(),
            ToolRuntime::new(
                shopify_graphql_query_spec(),
                ToolImpl::ShopifyQuery { client: shopify },
            )?,
        );
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&ToolRuntime> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }
}

pub struct ToolRuntime {
    pub spec: Tool,
    validator: Validator,
    imp: ToolImpl,
}

enum ToolImpl {
    IpDetails { client: Arc<IpApiClient> },
    ShopifyQuery { client: Option<Arc<ShopifyClient>> },
}

impl ToolRuntime {
    fn new(spec: Tool, imp: ToolImpl) -> anyhow::Result<Self> {
        let validator = jsonschema::validator_for(&spec.input_schema)
            .map_err(|e| anyhow::anyhow!("schema for {}: {e}", spec.name))?;
        Ok(Self {
            spec,
            validator,
            imp,
        })
    }

    pub fn validate_args(&self, args: &Value) -> anyhow::Result<()> {
        if self.validator.is_valid(args) {
            return Ok(());
        }

        let msg = self
            .validator
            .iter_errors(args)
            .take(5)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        if msg.is_empty() {
            anyhow::bail!("invalid arguments");
        }
        anyhow::bail!("{msg}");
    }

    /// Run the tool. `args` must already have passed [`ToolRuntime::validate_args`].
    pub async fn execute(&self, args: Value) -> Result<ToolOutput, IpGeoError> {
        match &self.imp {
            ToolImpl::IpDetails { client } => {
                let args: IpDetailsArgs = serde_json::from_value(args)?;
                let opts = LookupOptions {
                    include_extended_data: args.include_extended_data,
                    use_https: args.use_https,
                };
                let details = client.get_details(args.ip_address.as_deref(), opts).await?;
                shape(serde_json::to_value(details)?, args.jq.as_deref(), args.output_format)
            }
            ToolImpl::ShopifyQuery { client } => {
                let client = client.as_ref().ok_or_else(|| {
                    IpGeoError::AuthMissing(
                        "SHOPIFY_STORE_DOMAIN and SHOPIFY_ACCESS_TOKEN must be configured"
                            .to_string(),
                    )
                })?;
                let args: ShopifyQueryArgs = serde_json::from_value(args)?;
                let data = client.query(&args.query, args.variables.as_ref()).await?;
                shape(data, args.jq.as_deref(), args.output_format)
            }
        }
    }
}

fn shape(value: Value, jq: Option<&str>, format: OutputFormat) -> Result<ToolOutput, IpGeoError> {
    let value = ipgeo_core::apply_filter(value, jq)?;
    let text = ipgeo_core::render(&value, format)?;
    Ok(ToolOutput { text, value })
}

fn shaping_properties() -> serde_json::Map<String, Value> {
    let mut props = serde_json::Map::new();
    props.insert(
        "jq".to_string(),
        serde_json::json!({
            "type": "string",
            "description": "JMESPath expression applied to the result before formatting, e.g. `{country: country, city: city}`."
        }),
    );
    props.insert(
        "outputFormat".to_string(),
        serde_json::json!({
            "type": "string",
            "enum": ["toon", "json"],
            "default": "toon",
            "description": "TOON is compact and token-efficient; JSON is pretty-printed."
        }),
    );
    props
}

fn ip_get_details_spec() -> Tool {
    let mut props = serde_json::Map::new();
    props.insert(
        "ipAddress".to_string(),
        serde_json::json!({
            "type": "string",
            "description": "IPv4 or IPv6 address to look up. Omit to look up the server's public IP."
        }),
    );
    props.insert(
        "includeExtendedData".to_string(),
        serde_json::json!({
            "type": "boolean",
            "default": false,
            "description": "Also return continent, currency, reverse DNS and proxy/hosting/mobile flags."
        }),
    );
    props.insert(
        "useHttps".to_string(),
        serde_json::json!({
            "type": "boolean",
            "default": false,
            "description": "Use the HTTPS pro endpoint. Requires IPAPI_API_TOKEN."
        }),
    );
    props.extend(shaping_properties());

    Tool {
        name: IP_GET_DETAILS.to_string(),
        title: Some("IP geolocation lookup".to_string()),
        description: Some(
            "Get geolocation and network details for an IP address from ip-api.com.".to_string(),
        ),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": props,
            "additionalProperties": false
        }),
    }
}

fn shopify_graphql_query_spec() -> Tool {
    let mut props = serde_json::Map::new();
    props.insert(
        "query".to_string(),
        serde_json::json!({
            "type": "string",
            "minLength": 1,
            "description": "GraphQL document to run against the Shopify Admin API."
        }),
    );
    props.insert(
        "variables".to_string(),
        serde_json::json!({
            "type": "object",
            "description": "GraphQL variables."
        }),
    );
    props.extend(shaping_properties());

    Tool {
        name: SHOPIFY_GRAPHQL_QUERY.to_string(),
        title: Some("Shopify GraphQL query".to_string()),
        description: Some(
            "Run a GraphQL query against the configured Shopify store's Admin API.".to_string(),
        ),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": props,
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipgeo_core::IpApiConfig;

    fn registry() -> ToolRegistry {
        let ip_api = Arc::new(IpApiClient::new(IpApiConfig::default()).expect("client"));
        ToolRegistry::new(ip_api, None).expect("registry")
    }

    #[test]
    fn specs_are_sorted_and_schemas_compile() {
        let reg = registry();
        let names = reg.specs().into_iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(names, vec![IP_GET_DETAILS, SHOPIFY_GRAPHQL_QUERY]);
    }

    #[test]
    fn validate_args_reports_schema_violations() {
        let reg = registry();
        let ip = reg.get(IP_GET_DETAILS).expect("tool");

        ip.validate_args(&serde_json::json!({})).expect("empty ok");
        ip.validate_args(&serde_json::json!({
            "ipAddress": "8.8.8.8",
            "includeExtendedData": true,
            "outputFormat": "json"
        }))
        .expect("full ok");

        let err = ip
            .validate_args(&serde_json::json!({ "outputFormat": "yaml" }))
            .expect_err("enum");
        assert!(err.to_string().contains("yaml"), "{err}");
        assert!(
            ip.validate_args(&serde_json::json!({ "extra": 1 }))
                .is_err()
        );

        let shop = reg.get(SHOPIFY_GRAPHQL_QUERY).expect("tool");
        assert!(shop.validate_args(&serde_json::json!({})).is_err());
        assert!(shop.validate_args(&serde_json::json!({ "query": "" })).is_err());
    }

    #[tokio::test]
    async fn shopify_without_credentials_is_auth_error() {
        let reg = registry();
        let shop = reg.get(SHOPIFY_GRAPHQL_QUERY).expect("tool");
        let err = shop
            .execute(serde_json::json!({ "query": "{ shop { name } }" }))
            .await
            .expect_err("no creds");
        assert!(matches!(err, IpGeoError::AuthMissing(_)));
    }

    #[tokio::test]
    async fn invalid_ip_fails_before_network() {
        let reg = registry();
        let ip = reg.get(IP_GET_DETAILS).expect("tool");
        let err = ip
            .execute(serde_json::json!({ "ipAddress": "999.1.1.1" }))
            .await
            .expect_err("invalid ip");
        assert!(matches!(err, IpGeoError::InvalidIp(_)));
    }
}
