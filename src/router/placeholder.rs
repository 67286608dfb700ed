//! Synthesized responses for requests that neither cache nor network can serve

use super::{Destination, RequestMode, ResourceRequest, ResponseSource, RouterResponse};

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f5f5f5; color: #333; }
main { text-align: center; padding: 2rem; }
button { margin-top: 1rem; padding: 0.5rem 1.5rem; border: 0; border-radius: 4px; background: #333; color: #fff; cursor: pointer; }
</style>
</head>
<body>
<main>
<h1>You're offline</h1>
<p>This page isn't available without a connection. Your progress is saved and will sync when you reconnect.</p>
<button onclick="location.reload()">Try again</button>
</main>
</body>
</html>
"#;

const OFFLINE_IMAGE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150"><rect width="200" height="150" fill="#e0e0e0"/><text x="100" y="80" font-family="sans-serif" font-size="14" fill="#757575" text-anchor="middle">Image unavailable offline</text></svg>"##;

/// Placeholder for `request`: an HTML page for navigations, an SVG for
/// images, a 503 JSON body for everything else.
pub fn for_request(request: &ResourceRequest) -> RouterResponse {
    if request.mode == RequestMode::Navigate {
        offline_page()
    } else if request.destination == Destination::Image {
        offline_image()
    } else {
        unavailable()
    }
}

pub fn offline_page() -> RouterResponse {
    placeholder(200, OFFLINE_PAGE.as_bytes().to_vec(), "text/html; charset=utf-8")
}

pub fn offline_image() -> RouterResponse {
    placeholder(200, OFFLINE_IMAGE.as_bytes().to_vec(), "image/svg+xml")
}

pub fn unavailable() -> RouterResponse {
    let body = serde_json::json!({
        "error": "offline",
        "message": "This resource is not available offline",
    });
    placeholder(503, body.to_string().into_bytes(), "application/json")
}

fn placeholder(status: u16, body: Vec<u8>, content_type: &str) -> RouterResponse {
    RouterResponse {
        status,
        body,
        content_type: Some(content_type.to_string()),
        source: ResponseSource::Placeholder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> ResourceRequest {
        ResourceRequest::get(format!("https://learn.example.com{}", path).parse().unwrap())
    }

    #[test]
    fn test_navigation_gets_html() {
        let resp = for_request(&request("/training/1").navigate());
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(String::from_utf8_lossy(&resp.body).contains("offline"));
    }

    #[test]
    fn test_image_gets_svg() {
        let resp = for_request(&request("/img/a.png").with_destination(Destination::Image));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("image/svg+xml"));
        assert!(resp.body.starts_with(b"<svg"));
    }

    #[test]
    fn test_other_gets_503_json() {
        let resp = for_request(&request("/api/data"));
        assert_eq!(resp.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], "offline");
        assert_eq!(resp.source, ResponseSource::Placeholder);
    }
}
