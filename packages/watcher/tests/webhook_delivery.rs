//! Webhook Delivery Integration Tests
//!
//! Runs the HTTP notifier against a one-shot local listener and checks what
//! goes over the wire and how responses are classified.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use txnscope_watcher::config::{ExplorerConfig, SinkConfig};
use txnscope_watcher::decoder::TransactionRecord;
use txnscope_watcher::notifier::{Notify, NotifyError, WebhookNotifier};

/// Captured HTTP request
struct Request {
    head: String,
    body: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Accept one connection, capture the request and answer with `status`
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("http://{}/services/hook", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
        request
    });

    (uri, handle)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Request {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let head = text[..end].to_string();
            let partial = Request {
                head: head.clone(),
                body: String::new(),
            };
            let length: usize = partial
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                let body = String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).to_string();
                return Request { head, body };
            }
        }
    }

    panic!("connection closed before a full request arrived");
}

fn explorer() -> ExplorerConfig {
    ExplorerConfig {
        tx_base_uri: "https://explorer.test/transaction".to_string(),
        bundle_base_uri: "https://explorer.test/bundle".to_string(),
        address_base_uri: "https://explorer.test/address/".to_string(),
    }
}

fn notifier(uri: String) -> WebhookNotifier {
    let sink = SinkConfig {
        webhook_uri: uri,
        timeout: Duration::from_secs(5),
    };
    WebhookNotifier::new(&sink, explorer()).unwrap()
}

fn record() -> TransactionRecord {
    TransactionRecord {
        hash: "HASH999".to_string(),
        address: "ADDRXYZ".to_string(),
        value: 1_000_000,
        bundle: "BUNDLEA".to_string(),
        tag: String::new(),
        timestamp: 1_600_000_000,
        current_index: 0,
        last_index: 1,
    }
}

// ==================== Success Tests ====================

#[tokio::test]
async fn test_webhook_posts_json_text_message() {
    let (uri, server) = serve_once("200 OK", "ok").await;

    notifier(uri).notify(&record()).await.unwrap();
    let request = server.await.unwrap();

    assert!(request.head.starts_with("POST /services/hook "));
    assert_eq!(request.header("content-type").as_deref(), Some("application/json"));

    let json: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(
        json["text"],
        "monitoring:\n\
         - saw tx <https://explorer.test/transaction/HASH999|HASH999>\n\
         - address <https://explorer.test/address/ADDRXYZ|ADDRXYZ>\n\
         - bundle <https://explorer.test/bundle/BUNDLEA|BUNDLEA>\n"
    );
}

#[tokio::test]
async fn test_webhook_accepts_any_2xx() {
    let (uri, server) = serve_once("204 No Content", "").await;

    tokio_test::assert_ok!(notifier(uri).notify(&record()).await);
    server.await.unwrap();
}

// ==================== Failure Tests ====================

#[tokio::test]
async fn test_webhook_non_success_status_carries_body() {
    let (uri, server) = serve_once("500 Internal Server Error", "invalid_payload").await;

    let err = notifier(uri).notify(&record()).await.unwrap_err();
    server.await.unwrap();

    match err {
        NotifyError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "invalid_payload");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_webhook_not_found_is_failure() {
    let (uri, server) = serve_once("404 Not Found", "no_service").await;

    let err = notifier(uri).notify(&record()).await.unwrap_err();
    server.await.unwrap();

    assert_eq!(err.reason(), "non-success-status");
    assert!(err.to_string().contains("no_service"));
}
