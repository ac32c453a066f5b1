//! Engine artifact sources.
//!
//! - [`HttpArtifactSource`]: Fetches from a content-delivery base URL
//! - [`DirArtifactSource`]: Reads from a local directory
//!
//! Both resolve file names through an [`ArtifactLayout`], so the
//! multi-threaded build is looked up in its own sub-directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use toolkit_media_common::{LoaderConfig, MediaError, ToolkitConfig};
use toolkit_media_core::{
    ArtifactKind, ArtifactLayout, ArtifactSource, EngineBuild, EnvironmentProbe, LoaderOptions,
    MediaEngineLoader,
};

use crate::linker::register_all;

/// Default timeout for a whole artifact download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection timeout for artifact downloads.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest artifact accepted, in bytes.
pub const MAX_ARTIFACT_BYTES: usize = 256 * 1024 * 1024;

/// User-Agent header for artifact requests.
const USER_AGENT: &str = concat!("toolkit-media/", env!("CARGO_PKG_VERSION"));

/// Fetches artifacts over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: Client,
    base: Url,
    layout: ArtifactLayout,
}

impl HttpArtifactSource {
    /// Create a source rooted at `base_url`.
    ///
    /// A trailing slash is added if missing, so relative artifact paths
    /// resolve beneath the base rather than replacing its last segment.
    pub fn new(base_url: &str, layout: ArtifactLayout) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MediaError::invalid_config(format!("Failed to build HTTP client: {e}")))?;

        Self::with_client(client, base_url, layout)
    }

    /// Create a source with a caller-supplied client.
    pub fn with_client(client: Client, base_url: &str, layout: ArtifactLayout) -> Result<Self, MediaError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| MediaError::invalid_config(format!("Invalid artifact base URL '{base_url}': {e}")))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(MediaError::invalid_config(format!(
                "Unsupported artifact URL scheme: {}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base, layout })
    }

    /// Full URL of one artifact.
    pub fn url_for(&self, build: EngineBuild, kind: ArtifactKind) -> Result<Url, MediaError> {
        let relative = self.layout.relative_path(build, kind);
        self.base
            .join(&relative)
            .map_err(|e| MediaError::invalid_config(format!("Invalid artifact path '{relative}': {e}")))
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    fn describe(&self) -> String {
        self.base.to_string()
    }

    #[instrument(skip(self), fields(base = %self.base))]
    async fn fetch(&self, build: EngineBuild, kind: ArtifactKind) -> Result<Bytes, MediaError> {
        let url = self.url_for(build, kind)?;
        let fetch_error = |status: u16| MediaError::ArtifactFetch {
            url: url.to_string(),
            status,
        };

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            debug!(error = %e, "Artifact request failed");
            fetch_error(0)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_ARTIFACT_BYTES as u64)
        {
            return Err(MediaError::load_failed(format!("Artifact {url} exceeds size limit")));
        }

        let body = response.bytes().await.map_err(|e| {
            debug!(error = %e, "Artifact body read failed");
            fetch_error(status.as_u16())
        })?;
        if body.len() > MAX_ARTIFACT_BYTES {
            return Err(MediaError::load_failed(format!("Artifact {url} exceeds size limit")));
        }

        debug!(url = %url, bytes = body.len(), "Artifact fetched");
        Ok(body)
    }
}

/// Reads artifacts from a local directory.
#[derive(Debug, Clone)]
pub struct DirArtifactSource {
    root: PathBuf,
    layout: ArtifactLayout,
}

impl DirArtifactSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, layout: ArtifactLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    /// Path of one artifact.
    pub fn path_for(&self, build: EngineBuild, kind: ArtifactKind) -> PathBuf {
        self.root.join(self.layout.relative_path(build, kind))
    }
}

#[async_trait]
impl ArtifactSource for DirArtifactSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn fetch(&self, build: EngineBuild, kind: ArtifactKind) -> Result<Bytes, MediaError> {
        let path = self.path_for(build, kind);

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MediaError::ArtifactFetch {
                url: path.display().to_string(),
                status: 404,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the artifact source named by the configuration, if any.
///
/// A local directory takes precedence over a base URL.
pub fn artifact_source_from_config(
    config: &LoaderConfig,
) -> Result<Option<Arc<dyn ArtifactSource>>, MediaError> {
    let layout = ArtifactLayout::from_config(config);

    if let Some(dir) = &config.artifact_dir {
        return Ok(Some(Arc::new(DirArtifactSource::new(dir, layout))));
    }
    if let Some(base_url) = &config.artifact_base_url {
        return Ok(Some(Arc::new(HttpArtifactSource::new(base_url, layout)?)));
    }
    Ok(None)
}

/// Build a loader wired with this crate's host functions.
pub fn loader_from_config(
    config: &ToolkitConfig,
    probe: Arc<dyn EnvironmentProbe>,
) -> Result<MediaEngineLoader, MediaError> {
    let mut builder = MediaEngineLoader::builder(probe)
        .options(LoaderOptions::from(&config.loader))
        .engine_config(config.engine.clone())
        .cpu_fallback(config.loader.cpu_fallback);

    match artifact_source_from_config(&config.loader)? {
        Some(source) => {
            info!(source = %source.describe(), "Engine artifact source configured");
            builder = builder.artifact_source(source, register_all);
        }
        None => info!("No engine artifact source configured"),
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use toolkit_media_core::{LoadState, ReportedEnvironment};

    use super::*;

    /// Serve one canned HTTP response per connection, recording request paths.
    async fn serve(status: &'static str, body: &'static [u8]) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut paths = Vec::new();
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            if let Some(path) = request.split_whitespace().nth(1) {
                paths.push(path.to_string());
            }

            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
            paths
        });

        (format!("http://{addr}/engine"), task)
    }

    #[test]
    fn test_url_for_layout() {
        let source =
            HttpArtifactSource::new("https://cdn.example.com/ffmpeg", ArtifactLayout::default()).unwrap();

        let st = source.url_for(EngineBuild::SingleThreaded, ArtifactKind::Wasm).unwrap();
        assert_eq!(st.as_str(), "https://cdn.example.com/ffmpeg/ffmpeg-core.wasm");

        let mt = source.url_for(EngineBuild::MultiThreaded, ArtifactKind::Worker).unwrap();
        assert_eq!(mt.as_str(), "https://cdn.example.com/ffmpeg/mt/ffmpeg-core.worker.wasm");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(HttpArtifactSource::new("not a url", ArtifactLayout::default()).is_err());
        assert!(HttpArtifactSource::new("file:///tmp/engine", ArtifactLayout::default()).is_err());
    }

    #[tokio::test]
    async fn test_http_fetch_success() {
        let (base, server) = serve("200 OK", b"{\"abi\":1}").await;
        let source = HttpArtifactSource::new(&base, ArtifactLayout::default()).unwrap();

        let bytes = source
            .fetch(EngineBuild::SingleThreaded, ArtifactKind::Core)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"{\"abi\":1}");

        let paths = server.await.unwrap();
        assert_eq!(paths, vec!["/engine/ffmpeg-core.json".to_string()]);
    }

    #[tokio::test]
    async fn test_http_fetch_status_error() {
        let (base, server) = serve("404 Not Found", b"").await;
        let source = HttpArtifactSource::new(&base, ArtifactLayout::default()).unwrap();

        let err = source
            .fetch(EngineBuild::SingleThreaded, ArtifactKind::Wasm)
            .await
            .unwrap_err();
        match err {
            MediaError::ArtifactFetch { url, status } => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/engine/ffmpeg-core.wasm"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dir_source() {
        let root = std::env::temp_dir().join(format!("toolkit-media-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(root.join("mt")).await.unwrap();
        tokio::fs::write(root.join("mt/ffmpeg-core.wasm"), b"\0asm").await.unwrap();

        let source = DirArtifactSource::new(&root, ArtifactLayout::default());
        let bytes = source
            .fetch(EngineBuild::MultiThreaded, ArtifactKind::Wasm)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"\0asm");

        let err = source
            .fetch(EngineBuild::SingleThreaded, ArtifactKind::Wasm)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ArtifactFetch { status: 404, .. }));

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[test]
    fn test_source_precedence() {
        let mut config = LoaderConfig::default();
        assert!(artifact_source_from_config(&config).unwrap().is_none());

        config.artifact_base_url = Some("https://cdn.example.com/ffmpeg".into());
        let source = artifact_source_from_config(&config).unwrap().unwrap();
        assert!(source.describe().starts_with("https://"));

        config.artifact_dir = Some("/srv/ffmpeg".into());
        let source = artifact_source_from_config(&config).unwrap().unwrap();
        assert_eq!(source.describe(), "/srv/ffmpeg");
    }

    #[tokio::test]
    async fn test_loader_from_config_starts_idle() {
        let loader = loader_from_config(
            &ToolkitConfig::default(),
            Arc::new(ReportedEnvironment::default()),
        )
        .unwrap();
        assert_eq!(loader.state(), LoadState::Idle);
    }
}
