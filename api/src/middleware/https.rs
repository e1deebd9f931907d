use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Redirects plain-HTTP requests (per `X-Forwarded-Proto`) to HTTPS and adds
/// an HSTS header to every response. Enabled by `PERSONA_REQUIRE_HTTPS=true`.
pub async fn require_https(req: Request, next: Next) -> Response {
    if let Some(uri) = https_redirect_target(&req) {
        let mut response =
            (StatusCode::MOVED_PERMANENTLY, [("location", uri.to_string())]).into_response();
        add_hsts_header(&mut response);
        return response;
    }

    let mut response = next.run(req).await;
    add_hsts_header(&mut response);
    response
}

pub fn enabled_from_env() -> bool {
    std::env::var("PERSONA_REQUIRE_HTTPS")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn https_redirect_target(req: &Request) -> Option<Uri> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
    if header("x-forwarded-proto") != Some("http") {
        return None;
    }
    let host = header("host").unwrap_or("localhost");
    let path_and_query = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    format!("https://{host}{path_and_query}").parse().ok()
}

fn add_hsts_header(response: &mut Response) {
    response.headers_mut().insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
}
