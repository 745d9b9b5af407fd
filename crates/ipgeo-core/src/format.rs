use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IpGeoError, Result};
use crate::toon;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Toon,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Toon => "toon",
            OutputFormat::Json => "json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Toon => "text/plain",
            OutputFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = IpGeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toon" => Ok(OutputFormat::Toon),
            "json" => Ok(OutputFormat::Json),
            other => Err(IpGeoError::Filter(format!(
                "unsupported output format {other:?} (expected toon or json)"
            ))),
        }
    }
}

/// Apply a JMESPath expression to `value`. A missing or blank expression returns the value
/// unchanged.
pub fn apply_filter(value: Value, expr: Option<&str>) -> Result<Value> {
    let Some(expr) = expr.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(value);
    };
    let compiled = jmespath::compile(expr)
        .map_err(|e| IpGeoError::Filter(format!("invalid expression {expr:?}: {e}")))?;
    let found = compiled
        .search(value)
        .map_err(|e| IpGeoError::Filter(format!("evaluating {expr:?}: {e}")))?;
    Ok(serde_json::to_value(&*found)?)
}

pub fn render(value: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Toon => Ok(toon::encode(value)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

/// Filter then render; the pipeline shared by every tool, resource and CLI command.
pub fn shape_output(value: Value, filter: Option<&str>, format: OutputFormat) -> Result<String> {
    let filtered = apply_filter(value, filter)?;
    render(&filtered, format)
}
