//! Page fixtures shared by the unit tests.

/// Build a page whose frame sits exactly at `path` (an absolute
/// `/html/body/...` child path), padding earlier siblings so that positional
/// steps line up.
pub fn nested_page(path: &str, iframe_src: &str) -> String {
    let steps: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .skip(2) // html, body
        .collect();

    let mut open = String::new();
    let mut close = String::new();
    for (i, step) in steps.iter().enumerate() {
        let (tag, position) = match step.split_once('[') {
            Some((tag, pos)) => (tag, pos.trim_end_matches(']').parse::<usize>().unwrap()),
            None => (*step, 1),
        };
        for _ in 1..position {
            open.push_str(&format!("<{tag}></{tag}>"));
        }
        if i + 1 == steps.len() {
            open.push_str(&format!(
                r#"<{tag} src="{}"></{tag}>"#,
                iframe_src.replace('&', "&amp;")
            ));
        } else {
            open.push_str(&format!("<{tag}>"));
            close.insert_str(0, &format!("</{tag}>"));
        }
    }

    format!("<!DOCTYPE html><html><head><title>detail</title></head><body>{open}{close}</body></html>")
}

/// A material-detail page carrying a viewer frame at the default position.
pub fn viewer_page(iframe_src: &str) -> String {
    nested_page(crate::extract::DEFAULT_FRAME_PATH, iframe_src)
}

pub const EXAMPLE_VIEWER: &str = "https://basic.smartedu.cn/pdfjs/2.15/web/viewer.html?file=https%3A%2F%2Fcdn.example%2Fbooks%2Fmath.pdf&headers=%7B%22Authorization%22%3A%22Bearer%20abc%22%7D";

pub const DETAIL_PAGE: &str = "https://basic.smartedu.cn/tchMaterial/detail?contentId=42";

pub const PDF_BODY: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

/// Serve `/books/math.pdf` on a local port, answering 401 unless the
/// request carries `Authorization: Bearer abc`, and `/books/walled.pdf` as
/// an HTML login page. Returns the base URL.
pub async fn spawn_cdn() -> String {
    use axum::{
        Router,
        http::{HeaderMap, StatusCode, header},
        response::IntoResponse,
        routing::get,
    };

    async fn math_pdf(headers: HeaderMap) -> axum::response::Response {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer abc");
        if authorized {
            ([(header::CONTENT_TYPE, "application/pdf")], PDF_BODY).into_response()
        } else {
            StatusCode::UNAUTHORIZED.into_response()
        }
    }

    async fn login_wall() -> axum::response::Response {
        (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<html>login required</html>",
        )
            .into_response()
    }

    let app = Router::new()
        .route("/books/math.pdf", get(math_pdf))
        .route("/books/walled.pdf", get(login_wall));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Saver that records what it was asked to save.
#[derive(Debug, Clone, Default)]
pub struct RecordingSaver {
    calls: std::sync::Arc<std::sync::Mutex<Vec<(Vec<u8>, String)>>>,
}

impl RecordingSaver {
    pub fn calls(&self) -> Vec<(Vec<u8>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl crate::retrieve::FileSaver for RecordingSaver {
    async fn save(
        &self,
        blobs: &crate::retrieve::BlobRegistry,
        url: &crate::retrieve::ObjectUrl,
        file_name: &str,
    ) -> crate::error::Result<crate::retrieve::SaveTicket> {
        let blob = blobs
            .resolve(url)
            .ok_or_else(|| crate::error::Error::Save("revoked".to_string()))?;
        self.calls
            .lock()
            .unwrap()
            .push((blob.data.to_vec(), file_name.to_string()));
        Ok(crate::retrieve::SaveTicket::completed(file_name.into()))
    }
}
