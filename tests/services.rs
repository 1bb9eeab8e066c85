//! Retry client and service steps against a scripted local HTTP server.
//!
//! The stub answers each connection with the next scripted response (the last
//! one repeats) and closes it, recording every request it saw.

use edgequake_pipelines::pipeline::api::ApiStep;
use edgequake_pipelines::pipeline::grobid::GrobidStep;
use edgequake_pipelines::{
    run_pipeline, Counters, Item, LocalFileStore, NetworkError, Pipeline, RetryClient,
    RetryPolicy, RunConfig, RunnerKind, SharedStep, Step, StepContext, StepError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};

// ── Stub server ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Recorded {
    request_line: String,
    body: Vec<u8>,
}

struct Stub {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let request_line = String::from_utf8_lossy(&buf[..header_end])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    let mut body = buf[header_end..].to_vec();

    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    if let Some(len) = content_length {
        while body.len() < len {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    } else if head.contains("transfer-encoding: chunked") {
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Ok(Recorded { request_line, body })
}

async fn spawn_stub(script: Vec<(u16, &'static str)>) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);

    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(request) = read_request(&mut stream).await else {
                continue;
            };
            recorded.lock().unwrap().push(request);

            let (status, body) = script[served.min(script.len() - 1)];
            served += 1;
            let reason = match status {
                200 => "OK",
                400 => "Bad Request",
                503 => "Service Unavailable",
                _ => "Error",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/xml\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    Stub {
        base_url: format!("http://{addr}"),
        requests,
    }
}

fn client(max_retries: u32) -> RetryClient {
    RetryClient::new(RetryPolicy::new(max_retries, 0.0), Duration::from_secs(10)).unwrap()
}

fn pdf_item() -> Item {
    Item::new("/data/1/file.pdf", b"%PDF-1.4 pdf content 1".as_slice())
        .with_type(Some("application/pdf"))
}

// ── Retry client ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_retries_transient_status_then_succeeds() {
    let stub = spawn_stub(vec![(503, ""), (503, ""), (200, "converted")]).await;

    let response = client(5)
        .post_bytes(&format!("{}/convert", stub.base_url), b"doc".to_vec(), None)
        .await;

    let response = assert_ok!(response);
    assert_eq!(response.text(), "converted");
    assert_eq!(stub.requests().len(), 3);
    assert!(stub.requests().iter().all(|r| r.body == b"doc"));
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let stub = spawn_stub(vec![(503, "")]).await;

    let err = assert_err!(
        client(2)
            .post_bytes(&format!("{}/convert", stub.base_url), b"doc".to_vec(), None)
            .await
    );

    assert!(
        matches!(err, NetworkError::Status { status: 503, attempts: 3, .. }),
        "got: {err:?}"
    );
    assert_eq!(stub.requests().len(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let stub = spawn_stub(vec![(400, "bad input")]).await;

    let err = assert_err!(
        client(5)
            .post_bytes(&format!("{}/convert", stub.base_url), b"doc".to_vec(), None)
            .await
    );

    assert!(matches!(err, NetworkError::Status { status: 400, attempts: 1, .. }));
    assert_eq!(stub.requests().len(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = assert_err!(
        client(1)
            .post_bytes(&format!("http://{addr}/convert"), b"doc".to_vec(), None)
            .await
    );

    assert!(matches!(err, NetworkError::Transport { attempts: 2, .. }), "got: {err:?}");
}

// ── Service steps ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_grobid_step_uploads_pdf_and_returns_tei() {
    let stub = spawn_stub(vec![(200, "<TEI>tei content 1</TEI>")]).await;
    let step = GrobidStep::new(format!("{}/api", stub.base_url));
    let item = pdf_item().with_includes(Some(vec!["title".into(), "abstract".into()]));
    let ctx = StepContext::new()
        .with_client(client(0))
        .with_request_args(vec![("consolidateHeader".into(), "1".into())]);

    let update = assert_ok!(step.process(&item, &ctx).await);

    assert_eq!(
        update.content.map(|c| c.into_bytes()),
        Some(b"<TEI>tei content 1</TEI>".to_vec())
    );
    assert_eq!(update.mime_type.as_deref(), Some("application/tei+xml"));

    let requests = stub.requests();
    assert_eq!(
        requests[0].request_line,
        "POST /api/processHeaderDocument?consolidateHeader=1 HTTP/1.1"
    );
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"input\""), "body: {body}");
    assert!(body.contains("filename=\"file.pdf\""), "body: {body}");
    assert!(body.contains("%PDF-1.4 pdf content 1"), "body: {body}");
}

#[tokio::test]
async fn test_api_step_failure_surfaces_as_network_error() {
    let stub = spawn_stub(vec![(503, "")]).await;
    let step = ApiStep::new(format!("{}/api/convert", stub.base_url));
    let ctx = StepContext::new().with_client(client(1));

    let err = assert_err!(step.process(&pdf_item(), &ctx).await);

    assert!(matches!(err, StepError::Network(NetworkError::Status { status: 503, .. })));
    assert_eq!(stub.requests().len(), 2);
}

#[tokio::test]
async fn test_grobid_pipeline_run_converts_pdfs_only() {
    let stub = spawn_stub(vec![(200, "<TEI>converted</TEI>")]).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data/1")).unwrap();
    std::fs::write(dir.path().join("data/1/file.pdf"), b"%PDF").unwrap();
    std::fs::write(dir.path().join("data/1/notes.xml"), b"<notes/>").unwrap();

    for kind in [RunnerKind::Local, RunnerKind::Distributed] {
        let config = RunConfig::builder()
            .data_path(dir.path().join("data"))
            .source_path("*/*")
            .output_path(dir.path().join(format!("out-{kind}")))
            .output_suffix(".tei.xml")
            .max_retries(0)
            .build()
            .unwrap();
        let step: SharedStep = Arc::new(GrobidStep::new(format!("{}/api", stub.base_url)));
        let pipeline = Pipeline::new(vec![step], Counters::shared());

        let summary = assert_ok!(
            run_pipeline(kind, pipeline.clone(), config, Arc::new(LocalFileStore::new())).await
        );

        assert_eq!(summary.success, 2, "{kind}");
        let out = dir.path().join(format!("out-{kind}/1"));
        assert_eq!(
            std::fs::read_to_string(out.join("file.tei.xml")).unwrap(),
            "<TEI>converted</TEI>"
        );
        assert_eq!(std::fs::read_to_string(out.join("notes.tei.xml")).unwrap(), "<notes/>");
        let counts = &pipeline.step_counts()[0];
        assert_eq!((counts.processed, counts.ignored, counts.error), (1, 1, 0), "{kind}");
    }

    assert!(stub
        .requests()
        .iter()
        .all(|r| r.request_line.starts_with("POST /api/processFulltextDocument ")));
}
