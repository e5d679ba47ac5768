//! End-to-end transfers against a local HTTP server.

use std::sync::Arc;

use futures::StreamExt;
use partfetch::download::{DownloadOutcome, DownloadRequest, Downloader};
use partfetch::state::naming;
use partfetch::transport::{RangeTransport, ReqwestTransport, TransportConfig, TransportError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const FILE_PATH: &str = "/files/data.bin";

fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves `Range: bytes=a-b` requests from a fixed buffer.
struct RangeResponder {
    data: Vec<u8>,
    honor_ranges: bool,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

        match range {
            Some((start, end)) if self.honor_ranges => {
                let end = end.min(self.data.len() - 1);
                ResponseTemplate::new(206).set_body_bytes(self.data[start..=end].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.data.clone()),
        }
    }
}

async fn serve(data: &[u8], honor_ranges: bool) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.to_vec()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(RangeResponder {
            data: data.to_vec(),
            honor_ranges,
        })
        .mount(&server)
        .await;

    server
}

fn transport() -> Arc<ReqwestTransport> {
    Arc::new(ReqwestTransport::new(&TransportConfig::default()).unwrap())
}

#[tokio::test]
async fn test_probe_reads_content_length() {
    let data = test_data(2500);
    let server = serve(&data, true).await;
    let url = format!("{}{}", server.uri(), FILE_PATH);

    let size = transport().content_length(&url).await.unwrap();

    assert_eq!(size, 2500);
}

#[tokio::test]
async fn test_probe_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let url = format!("{}/missing", server.uri());

    let err = transport().content_length(&url).await.unwrap_err();

    assert!(matches!(err, TransportError::ProbeStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_get_range_streams_requested_bytes() {
    let data = test_data(2500);
    let server = serve(&data, true).await;
    let url = format!("{}{}", server.uri(), FILE_PATH);

    let response = transport().get_range(&url, 1000, 1999).await.unwrap();
    assert_eq!(response.status, 206);

    let mut body = Vec::new();
    let mut stream = response.body;
    while let Some(piece) = stream.next().await {
        body.extend_from_slice(&piece.unwrap());
    }
    assert_eq!(body, data[1000..2000].to_vec());
}

#[tokio::test]
async fn test_download_and_merge() {
    let data = test_data(2500);
    let server = serve(&data, true).await;
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new(format!("{}{}", server.uri(), FILE_PATH));
    request.chunk_size = 1000;
    request.concurrency = 3;
    request.output_dir = dir.path().to_path_buf();
    request.merge_after = true;

    let outcome = Downloader::new(transport())
        .download(&request, &CancellationToken::new())
        .await
        .unwrap();

    let report = match outcome {
        DownloadOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(report.prefix, "data.bin");
    assert_eq!(report.chunks, 3);
    assert_eq!(report.transfer.fetched, 3);
    assert!(report.merged.unwrap().is_success());

    assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), data);
    assert!(!naming::state_file_path(dir.path(), "data.bin").exists());
}

#[tokio::test]
async fn test_download_from_server_without_range_support() {
    let data = test_data(2500);
    let server = serve(&data, false).await;
    let dir = TempDir::new().unwrap();

    let mut request = DownloadRequest::new(format!("{}{}", server.uri(), FILE_PATH));
    request.chunk_size = 1000;
    request.concurrency = 2;
    request.output_dir = dir.path().to_path_buf();

    let outcome = Downloader::new(transport())
        .download(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, DownloadOutcome::Completed(_)));

    for index in 0..3 {
        let start = index * 1000;
        let end = (start + 1000).min(data.len());
        let part = dir.path().join(naming::complete_name("data.bin", index));
        assert_eq!(std::fs::read(part).unwrap(), data[start..end].to_vec());
    }
}
