use std::sync::Arc;

use async_trait::async_trait;
use ipgeo_core::{Config, IpApiClient, IpGeoError, LookupOptions, OutputFormat, ShopifyClient};
use ipgeo_mcp::{
    CallToolParams, CallToolResult, ContentBlock, GetPromptParams, GetPromptResult, InvalidParams,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    McpHandler, PaginatedParams, Prompt, PromptArgument, PromptMessage, ReadResourceParams,
    ReadResourceResult, Resource, ResourceContents, ResourceTemplate, Role,
};
use tracing::{Instrument as _, info_span, warn};

use crate::tools::{IP_GET_DETAILS, ToolRegistry};

const CURRENT_IP_URI: &str = "ip://current";
const IP_URI_SCHEME: &str = "ip://";
const IP_URI_TEMPLATE: &str = "ip://{ipAddress}";
const LOOKUP_PROMPT: &str = "ip_lookup_analysis";

/// Tools, resources and prompts backed by ip-api.com and Shopify.
pub struct GeoHandler {
    tools: ToolRegistry,
    ip_api: Arc<IpApiClient>,
}

impl GeoHandler {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let ip_api = Arc::new(IpApiClient::new(config.ip_api())?);
        let shopify = match ShopifyClient::new(&config.shopify()) {
            Ok(c) => Some(Arc::new(c)),
            Err(IpGeoError::AuthMissing(_)) => None,
            Err(e) => {
                warn!(error = %e, "shopify client disabled");
                None
            }
        };
        let tools = ToolRegistry::new(ip_api.clone(), shopify)?;
        Ok(Self { tools, ip_api })
    }

    async fn lookup_as_toon(&self, ip: Option<&str>) -> Result<String, IpGeoError> {
        let details = self
            .ip_api
            .get_details(ip, LookupOptions::default())
            .await?;
        ipgeo_core::render(&serde_json::to_value(details)?, OutputFormat::Toon)
    }
}

#[async_trait]
impl McpHandler for GeoHandler {
    async fn list_tools(&self, _params: PaginatedParams) -> anyhow::Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: self.tools.specs(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let Some(tool) = self.tools.get(&params.name) else {
            return Err(InvalidParams(format!("unknown tool: {}", params.name)).into());
        };
        let args = params
            .arguments
            .unwrap_or_else(|| serde_json::json!({}));

        if let Err(e) = tool.validate_args(&args) {
            return Ok(CallToolResult::error_text(format!("invalid arguments: {e}")));
        }

        let span = info_span!("tool.call", tool = %params.name);
        match tool.execute(args).instrument(span).await {
            Ok(out) => Ok(CallToolResult {
                content: vec![ContentBlock::text(out.text)],
                structured_content: out.value.is_object().then_some(out.value),
                is_error: Some(false),
            }),
            Err(e) => {
                warn!(tool = %params.name, kind = e.kind(), error = %e, "tool call failed");
                Ok(CallToolResult::error_text(format!("{}: {e}", e.kind())))
            }
        }
    }

    async fn list_resources(&self, _params: PaginatedParams) -> anyhow::Result<ListResourcesResult> {
        Ok(ListResourcesResult {
            resources: vec![Resource {
                uri: CURRENT_IP_URI.to_string(),
                name: "current-ip".to_string(),
                title: Some("Current IP details".to_string()),
                description: Some("Geolocation of this server's public IP address.".to_string()),
                mime_type: Some(OutputFormat::Toon.mime_type().to_string()),
            }],
            next_cursor: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _params: PaginatedParams,
    ) -> anyhow::Result<ListResourceTemplatesResult> {
        Ok(ListResourceTemplatesResult {
            resource_templates: vec![ResourceTemplate {
                uri_template: IP_URI_TEMPLATE.to_string(),
                name: "ip-details".to_string(),
                title: Some("IP details".to_string()),
                description: Some("Geolocation of any IPv4 or IPv6 address.".to_string()),
                mime_type: Some(OutputFormat::Toon.mime_type().to_string()),
            }],
            next_cursor: None,
        })
    }

    async fn read_resource(&self, params: ReadResourceParams) -> anyhow::Result<ReadResourceResult> {
        let Some(target) = params.uri.strip_prefix(IP_URI_SCHEME) else {
            return Err(InvalidParams(format!("unknown resource: {}", params.uri)).into());
        };
        let ip = match target {
            "current" => None,
            "" => return Err(InvalidParams(format!("unknown resource: {}", params.uri)).into()),
            other => Some(other),
        };

        let text = match self.lookup_as_toon(ip).await {
            Ok(t) => t,
            Err(IpGeoError::InvalidIp(ip)) => {
                return Err(InvalidParams(format!("invalid ip address: {ip}")).into());
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("read {}", params.uri))),
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: params.uri,
                mime_type: Some(OutputFormat::Toon.mime_type().to_string()),
                text,
            }],
        })
    }

    async fn list_prompts(&self, _params: PaginatedParams) -> anyhow::Result<ListPromptsResult> {
        Ok(ListPromptsResult {
            prompts: vec![Prompt {
                name: LOOKUP_PROMPT.to_string(),
                title: Some("Analyze an IP address".to_string()),
                description: Some(
                    "Look up an IP address and explain its location and network ownership."
                        .to_string(),
                ),
                arguments: vec![
                    PromptArgument {
                        name: "ipAddress".to_string(),
                        description: Some(
                            "Address to analyze; defaults to the server's public IP.".to_string(),
                        ),
                        required: Some(false),
                    },
                    PromptArgument {
                        name: "focus".to_string(),
                        description: Some(
                            "Aspect to emphasize, e.g. security, network or location.".to_string(),
                        ),
                        required: Some(false),
                    },
                ],
            }],
            next_cursor: None,
        })
    }

    async fn get_prompt(&self, params: GetPromptParams) -> anyhow::Result<GetPromptResult> {
        if params.name != LOOKUP_PROMPT {
            return Err(InvalidParams(format!("unknown prompt: {}", params.name)).into());
        }
        let text = lookup_prompt_text(params.argument("ipAddress"), params.argument("focus"));
        Ok(GetPromptResult {
            description: Some("IP address lookup and analysis".to_string()),
            messages: vec![PromptMessage {
                role: Role::User,
                content: ContentBlock::text(text),
            }],
        })
    }
}

fn lookup_prompt_text(ip: Option<&str>, focus: Option<&str>) -> String {
    let (target, call) = match ip {
        Some(ip) => (
            format!("the IP address {ip}"),
            format!("with ipAddress \"{ip}\" and includeExtendedData true"),
        ),
        None => (
            "this server's public IP address".to_string(),
            "with includeExtendedData true and no ipAddress".to_string(),
        ),
    };
    let mut text = format!(
        "Analyze {target}. Call the {IP_GET_DETAILS} tool {call}, then summarize where the \
         address is located and who operates the network. Point out anything notable in the \
         proxy, hosting and mobile flags."
    );
    if let Some(focus) = focus {
        text.push_str(&format!(" Focus the analysis on {focus}."));
    }
    text
}
