//! Fetching export files and replication responses
//!
//! Both collaborators are traits so runners can be driven by in-process
//! fakes in tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{MirrorError, MirrorResult};

/// A file made available locally
///
/// Downloaded or decompressed files live in a temporary path that is
/// removed by [`RetrievedFile::cleanup`] or on drop.
#[derive(Debug)]
pub struct RetrievedFile {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl RetrievedFile {
    /// A file that already existed and must not be deleted
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    pub fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is deleted after use
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Contents as text; bytes that are not UTF-8 are replaced
    pub fn read_to_string(&self) -> MirrorResult<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Delete a temporary file now
    pub fn cleanup(self) -> MirrorResult<()> {
        if let Some(temp) = self.temp {
            temp.close()?;
        }
        Ok(())
    }
}

/// Retrieval of export, serial and ROA files by URL
#[async_trait]
pub trait FileRetriever: Send + Sync {
    /// Make the file at `url` available locally, decompressing `.gz`
    async fn retrieve_file(&self, url: &str) -> MirrorResult<RetrievedFile>;

    /// The file's contents; any temporary file is removed before returning
    async fn retrieve_contents(&self, url: &str) -> MirrorResult<String> {
        let file = self.retrieve_file(url).await?;
        let contents = file.read_to_string()?;
        file.cleanup()?;
        Ok(contents)
    }
}

/// Sends a query to a whois-style server and reads the response
#[async_trait]
pub trait ReplicationClient: Send + Sync {
    async fn replication_query(
        &self,
        host: &str,
        port: u16,
        query: &str,
        end_markers: &[&str],
    ) -> MirrorResult<String>;
}

fn write_temp(bytes: &[u8], decompress: bool) -> MirrorResult<TempPath> {
    let mut file = NamedTempFile::new()?;
    if decompress {
        let mut decoder = GzDecoder::new(bytes);
        std::io::copy(&mut decoder, &mut file)?;
    } else {
        file.write_all(bytes)?;
    }
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Local paths, `file://` and `http(s)://` URLs
#[derive(Debug, Clone)]
pub struct DefaultRetriever {
    client: reqwest::Client,
}

impl DefaultRetriever {
    pub fn new(timeout: Duration) -> MirrorResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> MirrorResult<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FileRetriever for DefaultRetriever {
    #[instrument(skip(self))]
    async fn retrieve_file(&self, url: &str) -> MirrorResult<RetrievedFile> {
        let compressed = url.ends_with(".gz");

        if url.starts_with("http://") || url.starts_with("https://") {
            let bytes = self.download(url).await?;
            debug!(bytes = bytes.len(), compressed, "Downloaded file");
            return Ok(RetrievedFile::temporary(write_temp(&bytes, compressed)?));
        }

        let path = match url.strip_prefix("file://") {
            Some(path) => path,
            None if url.contains("://") => {
                return Err(MirrorError::Config(format!("unsupported URL scheme in {url}")));
            }
            None => url,
        };
        if !compressed {
            if !tokio::fs::try_exists(path).await? {
                return Err(MirrorError::Io(format!("file not found: {path}")));
            }
            return Ok(RetrievedFile::local(path));
        }
        let bytes = tokio::fs::read(path).await?;
        Ok(RetrievedFile::temporary(write_temp(&bytes, true)?))
    }
}

/// Incremental search for end markers in a growing response
///
/// Each call only looks at bytes added since the previous call, plus enough
/// overlap to catch a marker split across reads.
struct MarkerScanner<'a> {
    markers: &'a [&'a str],
    overlap: usize,
    scanned: usize,
}

impl<'a> MarkerScanner<'a> {
    fn new(markers: &'a [&'a str]) -> Self {
        let overlap = markers.iter().map(|m| m.len()).max().unwrap_or(0);
        Self {
            markers,
            overlap,
            scanned: 0,
        }
    }

    fn found(&mut self, buffer: &[u8]) -> bool {
        let window = &buffer[self.scanned.saturating_sub(self.overlap)..];
        self.scanned = buffer.len();
        self.markers.iter().any(|marker| {
            let marker = marker.as_bytes();
            !marker.is_empty() && window.windows(marker.len()).any(|w| w == marker)
        })
    }
}

/// Plain TCP whois client
#[derive(Debug, Clone)]
pub struct WhoisClient {
    timeout: Duration,
}

impl WhoisClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn query(&self, host: &str, port: u16, query: &str, end_markers: &[&str]) -> MirrorResult<String> {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(format!("{query}\n").as_bytes()).await?;

        // Leading newline so markers on the first line match too
        let mut buffer = vec![b'\n'];
        let mut chunk = [0u8; 8192];
        let mut scanner = MarkerScanner::new(end_markers);
        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if buffer.ends_with(b"\n") && scanner.found(&buffer) {
                break;
            }
        }
        let text = String::from_utf8_lossy(&buffer[1..]).into_owned();
        Ok(text)
    }
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl ReplicationClient for WhoisClient {
    #[instrument(skip(self, end_markers))]
    async fn replication_query(
        &self,
        host: &str,
        port: u16,
        query: &str,
        end_markers: &[&str],
    ) -> MirrorResult<String> {
        match tokio::time::timeout(self.timeout, self.query(host, port, query, end_markers)).await {
            Ok(result) => result,
            Err(_) => Err(MirrorError::Io(format!(
                "query to {host}:{port} timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_local_file_is_not_temporary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("TEST.CURRENTSERIAL");
        std::fs::write(&path, "1234\n").unwrap();

        let retriever = DefaultRetriever::new(Duration::from_secs(5)).unwrap();
        let url = path.to_string_lossy().into_owned();
        let file = retriever.retrieve_file(&url).await.unwrap();
        assert!(!file.is_temporary());
        assert_eq!(retriever.retrieve_contents(&url).await.unwrap(), "1234\n");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_gz_file_is_decompressed_to_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db.gz");
        std::fs::write(&path, gzip("mntner: TEST-MNT\n")).unwrap();

        let retriever = DefaultRetriever::new(Duration::from_secs(5)).unwrap();
        let file = retriever
            .retrieve_file(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert!(file.is_temporary());
        let temp_path = file.path().to_path_buf();
        assert_eq!(file.read_to_string().unwrap(), "mntner: TEST-MNT\n");
        file.cleanup().unwrap();
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_missing_and_unsupported() {
        let retriever = DefaultRetriever::new(Duration::from_secs(5)).unwrap();
        assert!(retriever.retrieve_file("/nonexistent/file").await.unwrap_err().is_io());
        assert!(matches!(
            retriever.retrieve_file("ftp://example.net/file").await,
            Err(MirrorError::Config(_))
        ));
    }

    #[test]
    fn test_non_utf8_export_is_read_lossily() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");
        std::fs::write(&path, b"person: Jos\xe9\nsource: TEST\n").unwrap();

        let file = RetrievedFile::local(&path);
        let text = file.read_to_string().unwrap();
        assert_eq!(text, "person: Jos\u{fffd}\nsource: TEST\n");
    }

    #[test]
    fn test_marker_found_across_chunks() {
        let mut scanner = MarkerScanner::new(&["\n%END"]);
        let mut buffer = b"\n% START Version: 3 TEST 1-1\n\nADD 1\n\nmntner: A\n\n%E".to_vec();
        assert!(!scanner.found(&buffer));
        buffer.extend_from_slice(b"ND TEST\n");
        assert!(scanner.found(&buffer));
    }

    #[tokio::test]
    async fn test_whois_client_stops_at_marker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut query = [0u8; 64];
            let read = socket.read(&mut query).await.unwrap();
            assert_eq!(&query[..read], b"-g TEST:3:1-LAST\n");
            socket
                .write_all(b"% START Version: 3 TEST 1-1\n\nADD 1\n\nmntner: A\n\n%END TEST\n")
                .await
                .unwrap();
            // Keep the connection open; the client must stop on the marker
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = WhoisClient::new(Duration::from_secs(2));
        let response = client
            .replication_query("127.0.0.1", port, "-g TEST:3:1-LAST", &["\n%END"])
            .await
            .unwrap();
        assert!(response.starts_with("% START"));
        assert!(response.ends_with("%END TEST\n"));
        server.abort();
    }
}
