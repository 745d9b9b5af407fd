//! Vendor clients and output shaping shared by the MCP server and the CLI.

pub mod config;
pub mod error;
pub mod format;
pub mod ip_api;
pub mod shopify;
pub mod toon;

pub use config::{Config, IpApiConfig, ShopifyConfig};
pub use error::{IpGeoError, Result};
pub use format::{OutputFormat, apply_filter, render, shape_output};
pub use ip_api::{IpApiClient, IpDetails, LookupOptions};
pub use shopify::ShopifyClient;
