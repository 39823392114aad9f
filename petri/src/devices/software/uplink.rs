use reqwest::{header::CONTENT_TYPE, Client, StatusCode};

/// Uplink to the analysis workstation that segments the culture images.
/// The workstation exposes one endpoint that accepts a raw JPEG body and
/// files it by arrival order, so there is no request framing beyond the
/// content type.
pub struct ImageUplink {
    /// Shared connection pool for the lifetime of the capture loop.
    client: Client,
    /// Fixed POST target, e.g. `http://192.168.4.2:8000/upload`.
    endpoint: String,
}

impl ImageUplink {
    /// Create an uplink bound to a fixed endpoint.
    ///
    /// * `endpoint`: full URL of the workstation upload route.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// The configured POST target.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one encoded frame as an `image/jpeg` POST body and hand the
    /// response status back to the caller. There are no retries; the
    /// capture loop treats a failed upload as a skipped delivery and
    /// still files the frame locally.
    pub async fn send_jpeg(&self, jpeg: &[u8]) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(jpeg.to_vec())
            .send()
            .await?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_uplink_posts_jpeg_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            // Collect until the header block and the four body bytes
            // have both arrived.
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let body_start = request
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map(|p| p + 4);
                if n == 0 || body_start.map_or(false, |start| request.len() >= start + 4) {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        let uplink = ImageUplink::new(format!("http://{addr}/upload"));
        let status = uplink.send_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]).await.unwrap();
        assert!(status.is_success());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload"));
        assert!(request
            .to_ascii_lowercase()
            .contains("content-type: image/jpeg"));
    }
}
