mod cli;
mod handler;
mod http;
mod stdio;
#[cfg(test)]
mod test_support;
mod tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use ipgeo_core::Config;
use ipgeo_mcp::{McpHandler, McpServerConfig};
use ipgeo_otel::TracingInitOptions;
use tracing::info;

use crate::handler::GeoHandler;
use crate::http::HttpOptions;

const INSTRUCTIONS: &str = "Use ip_get_details to geolocate IP addresses (omit ipAddress for the \
server's own IP). Results default to TOON; pass outputFormat=json for JSON and jq for a JMESPath \
projection. shopify_graphql_query runs Admin API queries when Shopify credentials are configured.";

#[derive(Debug, Parser)]
#[command(
    name = "ipgeo-mcp",
    version,
    about = "MCP server and CLI for ip-api.com geolocation"
)]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the MCP server (the default when no command is given).
    Serve(ServeArgs),
    /// Look up an IP address and print the result.
    GetIpDetails(cli::GetIpDetailsArgs),
    /// Run a Shopify Admin GraphQL query and print the result.
    ShopifyQuery(cli::ShopifyQueryArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, env = "TRANSPORT_MODE", value_enum, default_value = "stdio")]
    transport: Transport,

    /// Bind host for the HTTP transport.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// HTTP path for the MCP Streamable HTTP endpoint.
    #[arg(long, env = "MCP_HTTP_PATH", default_value = "/mcp")]
    http_path: String,

    /// Idle time after which an HTTP session is closed.
    #[arg(long, env = "MCP_SESSION_TTL_SECS", default_value_t = 30 * 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    session_ttl_secs: u64,

    /// How often idle sessions are swept.
    #[arg(long, env = "MCP_REAP_INTERVAL_SECS", default_value_t = 5 * 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    reap_interval_secs: u64,

    /// Keep-alive comment interval on server-push streams.
    #[arg(long, env = "MCP_SSE_KEEP_ALIVE_SECS", default_value_t = 15,
          value_parser = clap::value_parser!(u64).range(1..))]
    sse_keep_alive_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ipgeo_otel::init_tracing(TracingInitOptions {
        service_name: "ipgeo-mcp",
        service_version: env!("CARGO_PKG_VERSION"),
        default_env_filter: "info,hyper=warn,reqwest=warn",
    })?;

    let args = Args::parse();
    let config = Config::load();

    let cmd = args
        .cmd
        .unwrap_or_else(|| Command::Serve(ServeArgs::parse_from(["ipgeo-mcp"])));
    match cmd {
        Command::Serve(serve_args) => serve(serve_args, &config).await,
        Command::GetIpDetails(a) => {
            println!("{}", cli::get_ip_details(a, &config).await?);
            Ok(())
        }
        Command::ShopifyQuery(a) => {
            println!("{}", cli::shopify_query(a, &config).await?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs, config: &Config) -> anyhow::Result<()> {
    let handler: Arc<dyn McpHandler> =
        Arc::new(GeoHandler::new(config).context("build MCP handler")?);
    let cfg = Arc::new(
        McpServerConfig::default_for_binary("ipgeo-mcp", env!("CARGO_PKG_VERSION"))
            .with_instructions(INSTRUCTIONS),
    );

    match args.transport {
        Transport::Stdio => stdio::run_stdio(cfg, handler).await,
        Transport::Http => {
            let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
                .await
                .with_context(|| format!("resolve {}:{}", args.host, args.port))?
                .next()
                .with_context(|| format!("no address for {}", args.host))?;
            let opts = HttpOptions {
                addr,
                path: args.http_path,
                session_ttl: Duration::from_secs(args.session_ttl_secs),
                reap_interval: Duration::from_secs(args.reap_interval_secs),
                sse_keep_alive: Duration::from_secs(args.sse_keep_alive_secs),
            };
            http::serve_http(opts, cfg, handler).await?;
            info!("shutdown complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let args = Args::try_parse_from([
            "ipgeo-mcp",
            "serve",
            "--transport",
            "http",
            "--port",
            "8081",
            "--session-ttl-secs",
            "60",
        ])
        .expect("parse");
        let Some(Command::Serve(s)) = args.cmd else {
            panic!("expected serve");
        };
        assert!(matches!(s.transport, Transport::Http));
        assert_eq!(s.port, 8081);
        assert_eq!(s.session_ttl_secs, 60);
        assert_eq!(s.http_path, "/mcp");

        assert!(Args::try_parse_from(["ipgeo-mcp", "serve", "--reap-interval-secs", "0"]).is_err());
    }

    #[test]
    fn lookup_command_parses_format() {
        let args = Args::try_parse_from([
            "ipgeo-mcp",
            "get-ip-details",
            "8.8.8.8",
            "--output-format",
            "json",
            "--jq",
            "country",
        ])
        .expect("parse");
        let Some(Command::GetIpDetails(a)) = args.cmd else {
            panic!("expected get-ip-details");
        };
        assert_eq!(a.ip.as_deref(), Some("8.8.8.8"));
        assert_eq!(a.output_format, ipgeo_core::OutputFormat::Json);
    }
}
