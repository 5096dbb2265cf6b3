//! reqwest-backed implementation of [`RemoteProcessingService`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use docpipe_shared::{
    Artifacts, ClientConfig, DocpipeError, FetchOutput, MergeOutput, RemoteFailure, Result,
    TransformOutput,
};

use crate::RemoteProcessingService;

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("docpipe/", env!("CARGO_PKG_VERSION"));

const STAGE1_ROUTE: &str = "api/stage1";
const STAGE2_ROUTE: &str = "api/stage2";
const STAGE3_ROUTE: &str = "api/stage3";
const STATUS_ROUTE: &str = "api/status";
const RESET_ROUTE: &str = "api/reset";
const MERGED_DATASET_ROUTE: &str = "api/download/complete.yaml";
const DOCUMENTS_ARCHIVE_ROUTE: &str = "api/download/docs.zip";

/// Snapshot of the service's own task bookkeeping (`GET /api/status`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(default)]
    pub stage: u8,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub error: Option<String>,
    /// Per-stage results as reported by the service, passed through untouched.
    #[serde(default)]
    pub results: serde_json::Value,
}

/// Error body shape used by the service for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the processing service.
#[derive(Debug, Clone)]
pub struct HttpProcessingService {
    client: Client,
    base_url: Url,
    artifacts: Artifacts,
}

impl HttpProcessingService {
    /// Build a client from runtime config.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| DocpipeError::Network(format!("failed to build HTTP client: {e}")))?;

        let base_url = with_trailing_slash(&config.base_url);
        let artifacts = Artifacts {
            merged_dataset: join_route(&base_url, MERGED_DATASET_ROUTE)?,
            documents_archive: join_route(&base_url, DOCUMENTS_ARCHIVE_ROUTE)?,
        };

        Ok(Self {
            client,
            base_url,
            artifacts,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch the service's current task status.
    #[instrument(skip_all)]
    pub async fn status(&self) -> Result<RemoteStatus> {
        let url = join_route(&self.base_url, STATUS_ROUTE)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DocpipeError::Network(format!("{url}: {e}")))?;

        decode(response)
            .await
            .map_err(|e| DocpipeError::Network(format!("{url}: {e}")))
    }

    /// Ask the service to drop its task bookkeeping.
    #[instrument(skip_all)]
    pub async fn reset(&self) -> Result<()> {
        let url = join_route(&self.base_url, RESET_ROUTE)?;
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|e| DocpipeError::Network(format!("{url}: {e}")))?;

        ensure_success(response)
            .await
            .map(|_| ())
            .map_err(|e| DocpipeError::Network(format!("{url}: {e}")))?;
        info!("service task state reset");
        Ok(())
    }

    /// Stream an artifact into `dest_dir`, returning the written file path.
    ///
    /// The file name comes from `Content-Disposition` when the service sends
    /// one, otherwise from the last segment of the artifact URL.
    #[instrument(skip(self, dest_dir), fields(url = %artifact))]
    pub async fn download(&self, artifact: &Url, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(artifact.clone())
            .send()
            .await
            .map_err(|e| DocpipeError::Network(format!("{artifact}: {e}")))?;

        let response = ensure_success(response)
            .await
            .map_err(|e| DocpipeError::Network(format!("{artifact}: {e}")))?;

        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .or_else(|| url_filename(artifact))
            .ok_or_else(|| {
                DocpipeError::validation(format!("cannot derive a file name for {artifact}"))
            })?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| DocpipeError::io(dest_dir, e))?;

        // A failed transfer must not leave a truncated file under the final name.
        let path = dest_dir.join(&file_name);
        let partial = dest_dir.join(format!(".{file_name}.part"));
        let written = match stream_to_file(response, &partial, artifact).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| DocpipeError::io(&path, e))?;

        info!(path = %path.display(), bytes = written, "artifact downloaded");
        Ok(path)
    }

    async fn post_stage<T: DeserializeOwned>(
        &self,
        route: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<T, RemoteFailure> {
        let url = self
            .base_url
            .join(route)
            .map_err(|e| RemoteFailure::Other(format!("bad stage route {route}: {e}")))?;

        debug!(%url, "calling stage");
        let request = self.client.post(url.clone());
        let request = match body {
            Some(json) => request.json(&json),
            None => request.json(&serde_json::json!({})),
        };

        let response = request
            .send()
            .await
            .map_err(|e| RemoteFailure::Transport(format!("{url}: {e}")))?;

        decode(response).await
    }
}

#[async_trait]
impl RemoteProcessingService for HttpProcessingService {
    #[instrument(skip_all, fields(source = %source))]
    async fn fetch_sources(&self, source: &Url) -> std::result::Result<FetchOutput, RemoteFailure> {
        self.post_stage(STAGE1_ROUTE, Some(serde_json::json!({ "url": source.as_str() })))
            .await
    }

    #[instrument(skip_all)]
    async fn transform(&self) -> std::result::Result<TransformOutput, RemoteFailure> {
        self.post_stage(STAGE2_ROUTE, None).await
    }

    #[instrument(skip_all)]
    async fn merge(&self) -> std::result::Result<MergeOutput, RemoteFailure> {
        self.post_stage(STAGE3_ROUTE, None).await
    }

    fn artifacts(&self) -> Artifacts {
        self.artifacts.clone()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return the response unchanged if it is 2xx, otherwise a `Status` failure.
async fn ensure_success(response: Response) -> std::result::Result<Response, RemoteFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // The body is best-effort context; a read failure just drops the detail.
    let detail = response
        .text()
        .await
        .ok()
        .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
        .map(|body| body.error);

    Err(RemoteFailure::Status {
        code: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
        detail,
    })
}

async fn stream_to_file(response: Response, path: &Path, artifact: &Url) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| DocpipeError::io(path, e))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DocpipeError::Network(format!("{artifact}: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DocpipeError::io(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| DocpipeError::io(path, e))?;
    Ok(written)
}

async fn decode<T: DeserializeOwned>(response: Response) -> std::result::Result<T, RemoteFailure> {
    let response = ensure_success(response).await?;
    let bytes = response
        .bytes()
        .await
        // Headers already arrived: a broken body is a malformed response.
        .map_err(|e| RemoteFailure::Decode(format!("failed to read body: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| RemoteFailure::Decode(e.to_string()))
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn join_route(base: &Url, route: &str) -> Result<Url> {
    base.join(route)
        .map_err(|e| DocpipeError::config(format!("cannot join {route} onto {base}: {e}")))
}

/// Extract `filename="..."` from a `Content-Disposition` header value.
fn disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
        .and_then(sanitize_filename)
}

fn url_filename(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .and_then(sanitize_filename)
}

fn sanitize_filename(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn service_for(base: &str) -> HttpProcessingService {
        let config = ClientConfig {
            base_url: Url::parse(base).unwrap(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        };
        HttpProcessingService::new(&config).expect("build service")
    }

    /// Answers every request with a 200 that promises 1000 body bytes, sends
    /// five and closes the connection.
    async fn truncated_body_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                drain_request(&mut socket).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                          content-length: 1000\r\nconnection: close\r\n\r\n{\"mer",
                    )
                    .await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    /// Read one request (headers plus `content-length` body) off the socket.
    async fn drain_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let body_len = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + body_len {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    #[test]
    fn artifact_urls_hang_off_base() {
        let service = service_for("http://localhost:5000");
        let artifacts = service.artifacts();
        assert_eq!(
            artifacts.merged_dataset.as_str(),
            "http://localhost:5000/api/download/complete.yaml"
        );
        assert_eq!(
            artifacts.documents_archive.as_str(),
            "http://localhost:5000/api/download/docs.zip"
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let service = service_for("https://tools.example.com/harvester");
        assert_eq!(
            service.artifacts().merged_dataset.as_str(),
            "https://tools.example.com/harvester/api/download/complete.yaml"
        );
    }

    #[test]
    fn filename_helpers() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="apifox_docs.zip""#).as_deref(),
            Some("apifox_docs.zip")
        );
        assert_eq!(
            disposition_filename("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(disposition_filename("inline"), None);

        let url = Url::parse("http://h/api/download/docs.zip").unwrap();
        assert_eq!(url_filename(&url).as_deref(), Some("docs.zip"));
    }

    #[tokio::test]
    async fn stage1_posts_source_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/stage1"))
            .and(body_json(serde_json::json!({ "url": "https://docs.example.com/llms.txt" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "downloaded_files": 12,
                "api_links": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let source = Url::parse("https://docs.example.com/llms.txt").unwrap();
        let out = service.fetch_sources(&source).await.expect("stage1");
        assert_eq!(out.downloaded_files, 12);
        assert_eq!(out.api_links, Some(12));
    }

    #[tokio::test]
    async fn stage2_and_stage3_decode() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/stage2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "processed_files": 12,
                "valid_files": 9
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/stage3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "merged_files": 4,
                "final_file": "data/final/merged_apis.yml"
            })))
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let transform = service.transform().await.expect("stage2");
        assert_eq!((transform.processed_files, transform.valid_files), (12, 9));

        let merge = service.merge().await.expect("stage3");
        assert_eq!(merge.merged_files, 4);
    }

    #[tokio::test]
    async fn non_success_status_carries_error_detail() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/stage2"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({ "error": "stage 2 processing failed" })),
            )
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let failure = service.transform().await.unwrap_err();
        assert_eq!(
            failure,
            RemoteFailure::Status {
                code: 500,
                reason: "Internal Server Error".into(),
                detail: Some("stage 2 processing failed".into()),
            }
        );
    }

    #[tokio::test]
    async fn non_json_error_body_has_no_detail() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/stage3"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        match service.merge().await.unwrap_err() {
            RemoteFailure::Status { code, detail, .. } => {
                assert_eq!(code, 502);
                assert!(detail.is_none());
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_success_body_is_decode_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/stage3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        assert!(matches!(
            service.merge().await.unwrap_err(),
            RemoteFailure::Decode(_)
        ));
    }

    #[tokio::test]
    async fn truncated_success_body_is_decode_failure() {
        let service = service_for(&truncated_body_server().await);
        match service.merge().await.unwrap_err() {
            RemoteFailure::Decode(message) => assert!(message.contains("failed to read body")),
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let service = service_for(&format!("http://{addr}"));
        assert!(matches!(
            service.transform().await.unwrap_err(),
            RemoteFailure::Transport(_)
        ));
    }

    #[tokio::test]
    async fn status_and_reset() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stage": 2,
                "status": "running",
                "message": "processing Markdown files",
                "progress": 20,
                "error": null,
                "results": { "stage1": { "downloaded_files": 12 } }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/reset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let status = service.status().await.expect("status");
        assert_eq!(status.stage, 2);
        assert_eq!(status.status, "running");
        assert_eq!(status.results["stage1"]["downloaded_files"], 12);

        service.reset().await.expect("reset");
    }

    #[tokio::test]
    async fn download_uses_content_disposition_name() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/download/complete.yaml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "content-disposition",
                        r#"attachment; filename="apifox_complete_api.yaml""#,
                    )
                    .set_body_string("openapi: 3.0.0\n"),
            )
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = service.artifacts().merged_dataset;
        let written = service.download(&artifact, dir.path()).await.expect("download");

        assert_eq!(written, dir.path().join("apifox_complete_api.yaml"));
        let content = std::fs::read_to_string(&written).expect("read artifact");
        assert_eq!(content, "openapi: 3.0.0\n");
    }

    #[tokio::test]
    async fn download_missing_artifact_fails() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/download/docs.zip"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "archive not found"
            })))
            .mount(&server)
            .await;

        let service = service_for(&server.uri());
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = service.artifacts().documents_archive;
        let err = service.download(&artifact, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("archive not found"));
        assert!(!dir.path().join("docs.zip").exists());
    }

    #[tokio::test]
    async fn interrupted_download_leaves_no_file() {
        let service = service_for(&truncated_body_server().await);
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = service.artifacts().documents_archive;

        assert!(service.download(&artifact, dir.path()).await.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind {leftovers:?}");
    }
}
