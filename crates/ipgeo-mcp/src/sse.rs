use anyhow::Context as _;

/// Encode one SSE event. Multi-line payloads become multiple `data:` lines.
pub fn encode_sse_event(event: Option<&str>, data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 32);
    if let Some(name) = event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line.trim_end_matches('\r'));
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Small SSE decoder for MCP streamable HTTP.
///
/// Only `data:` lines matter; each blank-line-delimited event is one JSON message payload.
pub fn decode_sse_events(buf: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in buf.split('\n') {
        let l = line.trim_end_matches('\r');

        if l.is_empty() {
            if !data_lines.is_empty() {
                out.push(data_lines.join("\n"));
                data_lines.clear();
            }
            continue;
        }

        // Comments (keep-alives) and other fields carry no payload.
        if l.starts_with(':') {
            continue;
        }

        if let Some(rest) = l.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if !data_lines.is_empty() {
        out.push(data_lines.join("\n"));
    }

    out
}

pub fn parse_first_json_message_from_sse(body: &str) -> anyhow::Result<serde_json::Value> {
    let events = decode_sse_events(body);
    let first = events.first().context("no sse events")?;
    serde_json::from_str(first).context("parse sse data as json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_event_decodes_back_to_payload() {
        let payload = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let wire = encode_sse_event(Some("message"), payload);
        assert!(wire.starts_with("event: message\ndata: "));
        assert!(wire.ends_with("\n\n"));
        assert_eq!(decode_sse_events(&wire), vec![payload.to_string()]);
    }

    #[test]
    fn skips_keep_alive_comments_and_joins_multiline_data() {
        let s = ": keep-alive\n\ndata: a\ndata: b\n\n";
        assert_eq!(decode_sse_events(s), vec!["a\nb"]);
    }

    #[test]
    fn empty_stream_has_no_json_message() {
        assert!(parse_first_json_message_from_sse(": ping\n\n").is_err());
    }
}
