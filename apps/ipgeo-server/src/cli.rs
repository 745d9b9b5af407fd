//! One-shot commands that run a lookup and print the shaped result.

use anyhow::Context as _;
use ipgeo_core::{Config, IpApiClient, LookupOptions, OutputFormat, ShopifyClient};
use serde_json::Value;

#[derive(Debug, clap::Args)]
pub struct GetIpDetailsArgs {
    /// Address to look up. Omit for your own public IP.
    pub ip: Option<String>,

    /// Include continent, currency, reverse DNS and proxy/hosting/mobile flags.
    #[arg(long)]
    pub include_extended_data: bool,

    /// Use the HTTPS pro endpoint (requires IPAPI_API_TOKEN).
    #[arg(long)]
    pub use_https: bool,

    /// JMESPath expression applied before formatting.
    #[arg(long)]
    pub jq: Option<String>,

    #[arg(long, default_value = "toon")]
    pub output_format: OutputFormat,
}

#[derive(Debug, clap::Args)]
pub struct ShopifyQueryArgs {
    /// GraphQL document.
    #[arg(long)]
    pub query: String,

    /// Variables as a JSON object. Example: `{"first":5}`.
    #[arg(long)]
    pub variables_json: Option<String>,

    #[arg(long)]
    pub jq: Option<String>,

    #[arg(long, default_value = "toon")]
    pub output_format: OutputFormat,
}

pub async fn get_ip_details(args: GetIpDetailsArgs, config: &Config) -> anyhow::Result<String> {
    let client = IpApiClient::new(config.ip_api())?;
    let opts = LookupOptions {
        include_extended_data: args.include_extended_data,
        use_https: args.use_https,
    };
    let details = client
        .get_details(args.ip.as_deref(), opts)
        .await
        .context("ip lookup")?;
    let out = ipgeo_core::shape_output(
        serde_json::to_value(details)?,
        args.jq.as_deref(),
        args.output_format,
    )?;
    Ok(out)
}

pub async fn shopify_query(args: ShopifyQueryArgs, config: &Config) -> anyhow::Result<String> {
    let variables = parse_variables(args.variables_json.as_deref())?;
    let client = ShopifyClient::new(&config.shopify())?;
    let data = client
        .query(&args.query, variables.as_ref())
        .await
        .context("shopify query")?;
    let out = ipgeo_core::shape_output(data, args.jq.as_deref(), args.output_format)?;
    Ok(out)
}

fn parse_variables(raw: Option<&str>) -> anyhow::Result<Option<Value>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let v: Value = serde_json::from_str(raw).context("parse --variables-json")?;
    if !v.is_object() {
        anyhow::bail!("--variables-json must be a JSON object");
    }
    Ok(Some(v))
}
