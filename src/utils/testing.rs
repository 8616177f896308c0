//! In-process HTTP server for fetcher and crawler tests.
//!
//! Serves canned text bodies per path and honors `If-Modified-Since` on
//! `HEAD` requests the way a static file server would.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) const LAST_MODIFIED: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

#[derive(Debug, Clone)]
pub(crate) struct MockRoute {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub last_modified: Option<String>,
}

impl MockRoute {
    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8".into(),
            body: body.into(),
            last_modified: Some(LAST_MODIFIED.into()),
        }
    }
}

#[derive(Clone)]
pub(crate) struct MockServer {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, MockRoute>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Self {
            addr: listener.local_addr().unwrap(),
            routes: Arc::default(),
            requests: Arc::default(),
        };

        let handle = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handle = handle.clone();
                tokio::spawn(async move { handle.serve(stream).await });
            }
        });
        server
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Serve `body` as text/plain at `path`, returning the full URL.
    pub fn feed(&self, path: &str, body: &str) -> String {
        self.route(path, MockRoute::text(body))
    }

    pub fn route(&self, path: &str, route: MockRoute) -> String {
        self.routes.lock().insert(path.to_string(), route);
        self.url(path)
    }

    /// Replace a feed body and bump its Last-Modified value.
    pub fn update(&self, path: &str, body: &str, last_modified: &str) {
        let mut routes = self.routes.lock();
        let route = routes
            .entry(path.to_string())
            .or_insert_with(|| MockRoute::text(body));
        route.body = body.to_string();
        route.last_modified = Some(last_modified.to_string());
    }

    /// Requests seen so far as "METHOD /path".
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    async fn serve(&self, mut stream: TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        let head = String::from_utf8_lossy(&buf).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let if_modified_since = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("if-modified-since"))
            .map(|(_, value)| value.trim().to_string());

        self.requests.lock().push(format!("{method} {path}"));
        let route = self.routes.lock().get(&path).cloned();

        let response = match route {
            None => render(404, "text/plain", "not found", None, &method),
            Some(route) => {
                let unchanged = method == "HEAD"
                    && route.last_modified.is_some()
                    && route.last_modified == if_modified_since;
                if unchanged {
                    render(304, &route.content_type, "", None, "HEAD")
                } else {
                    render(
                        route.status,
                        &route.content_type,
                        &route.body,
                        route.last_modified.as_deref(),
                        &method,
                    )
                }
            }
        };

        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

fn render(
    status: u16,
    content_type: &str,
    body: &str,
    last_modified: Option<&str>,
    method: &str,
) -> String {
    let reason = match status {
        200 => "OK",
        304 => "Not Modified",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    if status != 304 {
        response.push_str(&format!("Content-Type: {content_type}\r\n"));
        response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    if let Some(lm) = last_modified {
        response.push_str(&format!("Last-Modified: {lm}\r\n"));
    }
    response.push_str("Connection: close\r\n\r\n");
    if method != "HEAD" && status != 304 {
        response.push_str(body);
    }
    response
}
