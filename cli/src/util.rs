use serde_json::{Value, json};

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty_json(&err));
    std::process::exit(4);
}

/// Parse a `--params`/`--data` style JSON argument; must be an object.
pub fn parse_json_object(flag: &str, raw: &str) -> Result<Value, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON in {flag}: {e}"))?;
    if !value.is_object() {
        return Err(format!("{flag} must be a JSON object"));
    }
    Ok(value)
}

pub fn build_url(
    api_url: &str,
    path: &str,
    query: &[(&str, String)],
) -> Result<reqwest::Url, String> {
    let base = api_url.trim_end_matches('/');
    let mut url = reqwest::Url::parse(&format!("{base}{path}"))
        .map_err(|e| format!("Invalid URL: {base}{path}: {e}"))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Map an HTTP status to the CLI exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Execute an API request, print the response and return the exit code.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
    query: &[(&str, String)],
    raw: bool,
) -> i32 {
    let url = match build_url(api_url, path, query) {
        Ok(u) => u,
        Err(message) => {
            eprintln!("{}", to_pretty_json(&json!({ "error": "cli_error", "message": message })));
            return 4;
        }
    };

    tracing::debug!(method = %method, url = %url, "Sending API request");
    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check PERSONA_API_URL."
            });
            eprintln!("{}", to_pretty_json(&err));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);

    // 204 responses carry no body
    let resp_body: Value = if status == 204 {
        json!({ "status": status })
    } else {
        match resp.json().await {
            Ok(v) => v,
            Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
        }
    };

    let formatted = if raw {
        resp_body.to_string()
    } else {
        to_pretty_json(&resp_body)
    };

    if exit_code == 0 {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }

    exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_arguments_must_be_objects() {
        assert_eq!(
            parse_json_object("--params", r#"{"server_name":"desktop"}"#).unwrap(),
            json!({"server_name": "desktop"})
        );
        assert!(parse_json_object("--params", "[1,2]").unwrap_err().contains("JSON object"));
        assert!(parse_json_object("--params", "{").unwrap_err().starts_with("Invalid JSON"));
    }

    #[test]
    fn build_url_joins_path_and_encodes_query() {
        let url = build_url(
            "http://localhost:3000/",
            "/api/messages",
            &[("connection_id", "a b".to_string())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/messages?connection_id=a+b");
    }

    #[test]
    fn status_codes_map_to_exit_codes() {
        assert_eq!(exit_code_for(201), 0);
        assert_eq!(exit_code_for(404), 1);
        assert_eq!(exit_code_for(503), 2);
    }
}
