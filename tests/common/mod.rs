//! Shared fixtures for integration tests: filestore file pairs in both
//! layouts, a counting analyzer, and a minimal S3 endpoint stub.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use nightwatch::analyzers::{Analysis, Analyzer, FileSample};
use nightwatch::error::Result;

/// Minimal ELF64 executable header; enough for the content sniffer to
/// classify the file as an allowed executable.
pub fn elf_executable_bytes(tail: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf[..4].copy_from_slice(b"\x7fELF");
    buf[4] = 2; // 64-bit
    buf[5] = 1; // LSB
    buf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    buf[18..20].copy_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
    buf.extend_from_slice(tail);
    buf
}

/// Create a V1 payload `file.<n>` and its `file.<n>.meta` sidecar.
pub fn create_file_pair(number: u32, contents: &[u8], dir: &Path) -> PathBuf {
    let payload = dir.join(format!("file.{number}"));
    std::fs::write(&payload, contents).unwrap();
    std::fs::write(dir.join(format!("file.{number}.meta")), b"foo").unwrap();
    payload
}

/// Like `create_file_pair`, but with an explicit mtime on the payload.
pub fn create_file_pair_with_time(
    number: u32,
    contents: &[u8],
    dir: &Path,
    mtime: SystemTime,
) -> PathBuf {
    let payload = create_file_pair(number, contents, dir);
    std::fs::File::options()
        .append(true)
        .open(&payload)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
    payload
}

/// Create a V2 payload `<xx>/<sha256>` and one JSON sidecar, returning the
/// payload path.
pub fn create_file_pair_v2(contents: &[u8], dir: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let hash = format!("{:x}", hasher.finalize());

    let sub = dir.join(&hash[..2]);
    std::fs::create_dir_all(&sub).unwrap();
    let payload = sub.join(&hash);
    std::fs::write(&payload, contents).unwrap();

    let sidecar = sub.join(format!("{hash}.1.json"));
    let meta = serde_json::json!({"foo": "bar", "filename": payload.to_string_lossy()});
    std::fs::write(&sidecar, serde_json::to_vec(&meta).unwrap()).unwrap();
    payload
}

/// Analyzer that counts how often each path was processed.
#[derive(Default)]
pub struct CountingAnalyzer {
    pub counts: Mutex<HashMap<PathBuf, u32>>,
}

impl CountingAnalyzer {
    pub fn count(&self, path: &Path) -> u32 {
        self.counts.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn reinitialize(&self) -> Result<()> {
        Ok(())
    }

    async fn process_file(&self, sample: FileSample<'_>) -> Result<Analysis> {
        *self
            .counts
            .lock()
            .entry(sample.path.to_path_buf())
            .or_insert(0) += 1;
        Ok(Analysis::default())
    }
}

/// Analyzer that flags every sample as suspicious with a fixed reason.
pub struct AlwaysSuspicious;

#[async_trait]
impl Analyzer for AlwaysSuspicious {
    fn name(&self) -> &str {
        "always"
    }

    async fn reinitialize(&self) -> Result<()> {
        Ok(())
    }

    async fn process_file(&self, _sample: FileSample<'_>) -> Result<Analysis> {
        Ok(Analysis {
            reason: Some(serde_json::json!({"MatchedRules": ["always"]})),
            suspicious: true,
        })
    }
}

/// A request captured by the S3 stub.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Minimal HTTP endpoint standing in for an S3 service: it records every
/// request and answers with a fixed status code.
pub struct StubS3 {
    pub endpoint: String,
    pub requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubS3 {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let requests: Arc<Mutex<Vec<StubRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let log = log.clone();
                tokio::spawn(async move {
                    serve_connection(stream, status, log).await;
                });
            }
        });

        Self { endpoint, requests }
    }

    pub fn request_for(&self, path: &str) -> Option<StubRequest> {
        self.requests
            .lock()
            .iter()
            .find(|r| r.path == path)
            .cloned()
    }

    /// Wait until a request for the given path arrives, or time out.
    pub async fn wait_for(&self, path: &str) -> Option<StubRequest> {
        for _ in 0..100 {
            if let Some(request) = self.request_for(path) {
                return Some(request);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        None
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    status: u16,
    log: Arc<Mutex<Vec<StubRequest>>>,
) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // read until the end of the request headers
        let header_end = loop {
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let headers = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let mut lines = headers.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        let content_length = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body: Vec<u8> = buf[header_end..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
            }
        }
        let leftover = body.split_off(content_length.min(body.len()));

        log.lock().push(StubRequest { method, path, body });

        let response = format!("HTTP/1.1 {status} STATUS\r\nContent-Length: 0\r\n\r\n");
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }

        buf = leftover;
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
