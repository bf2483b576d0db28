use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::{json, Value};

/// Build an HTTP client with optional Bearer token default header.
pub fn build_client(token: &Option<String>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(tok) = token {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", tok).parse()?);
        builder = builder.default_headers(headers);
    }
    Ok(builder.build()?)
}

/// Normalize non-2xx responses into errors while returning the response on success.
///
/// The daemon answers errors with `{code, message}`; fall back to the raw body otherwise.
pub async fn handle_error(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .unwrap_or_else(|_| json!({"message": "unknown error"}));
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    match body.get("code").and_then(Value::as_str) {
        Some(code) => Err(anyhow::anyhow!("request failed {} [{}]: {}", status, code, message)),
        None => Err(anyhow::anyhow!("request failed {}: {}", status, message)),
    }
}

/// `http(s)://host` → `ws(s)://host/<path>`
pub fn build_ws_url(base: &str, path: &str) -> String {
    let mut ws_base = base
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    while ws_base.ends_with('/') {
        ws_base.pop();
    }
    format!("{}/{}", ws_base, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::build_ws_url;

    #[test]
    fn ws_url_from_http_base() {
        assert_eq!(
            build_ws_url("http://127.0.0.1:7878/", "/events"),
            "ws://127.0.0.1:7878/events"
        );
        assert_eq!(build_ws_url("https://dev.local", "events"), "wss://dev.local/events");
    }
}
