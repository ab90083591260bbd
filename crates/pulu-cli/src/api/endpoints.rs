//! API endpoint URL builders

/// Join a base URL and an endpoint path with exactly one `/` between them
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = endpoint.trim().trim_start_matches('/');
    format!("{}/{}", base, path)
}
