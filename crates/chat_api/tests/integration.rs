use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_api::{
    extract_completion, pump_events, AdminAccess, AuthObserver, ChatApiClient, ChatApiConfig,
    ChatApiError, ChatCompletionRequest, ChatResponse, CredentialProvider, FrameDecoder,
    MemoryCredentials, ProtocolEvent, RetryPolicy, StreamEnd,
};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    content_type: &'static str,
    chunks: Vec<ResponseChunk>,
}

struct ScriptedServer {
    base_url: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let requests = Arc::clone(&requests);

            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, requests).await;
                    });
                }
            }
        });

        Self {
            base_url,
            request_count,
            requests,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    /// Lower-cased request heads in arrival order.
    fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log lock").clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct CountingObserver {
    calls: AtomicUsize,
}

impl AuthObserver for CountingObserver {
    fn on_auth_lost(&self, _status: StatusCode) {
        self.calls.fetch_add(1, Ordering::AcqRel);
    }
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn response_stream(chunks: &[&str]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/event-stream",
        chunks: chunks
            .iter()
            .map(|chunk| ResponseChunk {
                delay_ms: 5,
                bytes: chunk.as_bytes().to_vec(),
            })
            .collect(),
    }
}

fn client_for(
    server: &ScriptedServer,
    credentials: Arc<MemoryCredentials>,
) -> ChatApiClient {
    let config = ChatApiConfig::new(&server.base_url).with_retry(RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    });
    ChatApiClient::new(config, credentials).expect("client")
}

#[tokio::test]
async fn streamed_chat_is_decoded_across_chunk_boundaries() {
    let server = ScriptedServer::new(vec![response_stream(&[
        "event: status\ndata: {\"state\":\"thin",
        "king\"}\n\ndata: {\"text\":\"Hej\"}\n",
        "\ndata: {\"text\":\" med dig\"}\n\ndata: [DO",
        "NE]\n\n",
    ])])
    .await;
    let client = client_for(&server, Arc::new(MemoryCredentials::default()));

    let response = client
        .open_chat(
            &ChatCompletionRequest::streaming("hej"),
            Some("session-1"),
            Some("req-1"),
            None,
        )
        .await
        .expect("chat request should open");
    let ChatResponse::Stream(body) = response else {
        panic!("expected a streamed body");
    };

    let mut decoder = FrameDecoder::with_correlation_id("req-1");
    let mut events = Vec::new();
    let end = pump_events(body, &mut decoder, None, None, |event| events.push(event))
        .await
        .expect("stream should complete");

    assert_eq!(end, StreamEnd::Terminal(ProtocolEvent::Done));
    assert_eq!(
        events,
        vec![
            ProtocolEvent::Status {
                text: "thinking".to_string()
            },
            ProtocolEvent::Delta {
                text: "Hej".to_string()
            },
            ProtocolEvent::Delta {
                text: " med dig".to_string()
            },
            ProtocolEvent::Done,
        ]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let head = &requests[0];
    assert!(head.starts_with("post /v1/chat/completions "));
    assert!(head.contains("authorization: bearer devkey"));
    assert!(head.contains("x-session-id: session-1"));
    assert!(head.contains("x-request-id: req-1"));
    assert!(head.contains("accept: text/event-stream, application/json"));
}

#[tokio::test]
async fn json_completion_falls_back_to_single_document() {
    let server = ScriptedServer::new(vec![response_json(
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
    )])
    .await;
    let client = client_for(&server, Arc::new(MemoryCredentials::default()));

    let response = client
        .open_chat(&ChatCompletionRequest::streaming("hi"), Some("s"), None, None)
        .await
        .expect("chat request");
    let ChatResponse::Completion(value) = response else {
        panic!("expected a JSON completion");
    };

    assert_eq!(
        extract_completion(&value),
        Some(ProtocolEvent::Delta {
            text: "hello".to_string()
        })
    );
}

#[tokio::test]
async fn unauthorized_response_clears_credentials_and_notifies() {
    let server = ScriptedServer::new(vec![response_json(401, r#"{"detail":"bad token"}"#)]).await;
    let credentials = Arc::new(MemoryCredentials::new(
        Some("stored".to_string()),
        Some("cookie".to_string()),
    ));
    let observer = Arc::new(CountingObserver::default());
    let client = client_for(&server, Arc::clone(&credentials))
        .with_auth_observer(Arc::clone(&observer) as Arc<dyn AuthObserver>);

    let error = client
        .list_sessions()
        .await
        .expect_err("401 must fail the request");

    assert!(matches!(error, ChatApiError::Unauthorized { .. }));
    assert_eq!(credentials.stored_token(), None);
    assert_eq!(credentials.cookie_token(), None);
    assert_eq!(observer.calls.load(Ordering::Acquire), 1);
    assert_eq!(server.request_count(), 1);

    let head = &server.requests()[0];
    assert!(head.contains("authorization: bearer stored"));
    assert!(head.contains("x-user-token: cookie"));
}

#[tokio::test]
async fn admin_denial_keeps_credentials() {
    let server = ScriptedServer::new(vec![response_json(403, r#"{"detail":"forbidden"}"#)]).await;
    let credentials = Arc::new(MemoryCredentials::new(Some("stored".to_string()), None));
    let observer = Arc::new(CountingObserver::default());
    let client = client_for(&server, Arc::clone(&credentials))
        .with_auth_observer(Arc::clone(&observer) as Arc<dyn AuthObserver>);

    let access = client
        .probe_admin_access()
        .await
        .expect("admin probe resolves");

    assert_eq!(access, AdminAccess::Denied);
    assert_eq!(credentials.stored_token().as_deref(), Some("stored"));
    assert_eq!(observer.calls.load(Ordering::Acquire), 0);
    assert!(server.requests()[0].starts_with("get /admin/tickets?limit=1 "));
}

#[tokio::test]
async fn idempotent_reads_retry_transient_failures() {
    let server = ScriptedServer::new(vec![
        response_json(503, r#"{"detail":"warming up"}"#),
        response_json(
            200,
            r#"{"sessions":[{"id":"s1","name":"Ny chat"},{"id":"s2"}]}"#,
        ),
    ])
    .await;
    let client = client_for(&server, Arc::new(MemoryCredentials::default()));

    let sessions = client.list_sessions().await.expect("retry should succeed");

    assert_eq!(server.request_count(), 2);
    assert_eq!(
        sessions.iter().map(|session| session.id.as_str()).collect::<Vec<_>>(),
        vec!["s1", "s2"]
    );
    assert_eq!(sessions[0].name.as_deref(), Some("Ny chat"));
}

#[tokio::test]
async fn chat_requests_are_never_retried() {
    let server = ScriptedServer::new(vec![
        response_json(503, r#"{"error":{"message":"overloaded"}}"#),
        response_json(200, r#"{"text":"should not be reached"}"#),
    ])
    .await;
    let client = client_for(&server, Arc::new(MemoryCredentials::default()));

    let error = client
        .open_chat(&ChatCompletionRequest::streaming("hi"), Some("s"), None, None)
        .await
        .err()
        .expect("503 must fail the chat request");

    match error {
        ChatApiError::Status(status, message) => {
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn session_creation_and_history_round_trip() {
    let server = ScriptedServer::new(vec![
        response_json(200, r#"{"sessionId":"new-1"}"#),
        response_json(
            200,
            r#"{"messages":[{"role":"user","content":"hej"},{"role":"assistant","content":"davs"}]}"#,
        ),
        response_json(200, r#"{"online":true}"#),
    ])
    .await;
    let client = client_for(&server, Arc::new(MemoryCredentials::default()));

    let id = client.create_session("Ny chat").await.expect("create");
    let messages = client.session_messages(&id).await.expect("history");
    let online = client.status().await.expect("status");

    assert_eq!(id, "new-1");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "davs");
    assert!(online);

    let requests = server.requests();
    assert!(requests[0].starts_with("post /sessions "));
    assert!(requests[1].starts_with("get /share/new-1 "));
    assert!(requests[2].starts_with("get /status "));
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let Ok(head) = read_request(&mut socket).await else {
        return;
    };

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    requests
        .lock()
        .expect("request log lock")
        .push(head.to_ascii_lowercase());

    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_json(500, r#"{"error":"unexpected request"}"#));

    let headers = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status,
        status_reason(response.status),
        response.content_type,
    );
    if socket.write_all(headers.as_bytes()).await.is_err() {
        return;
    }

    for chunk in response.chunks {
        if chunk.delay_ms > 0 {
            sleep(Duration::from_millis(chunk.delay_ms)).await;
        }
        let prefix = format!("{:X}\r\n", chunk.bytes.len());
        if socket.write_all(prefix.as_bytes()).await.is_err()
            || socket.write_all(&chunk.bytes).await.is_err()
            || socket.write_all(b"\r\n").await.is_err()
        {
            return;
        }
    }

    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

/// Reads the request head and drains a `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 2048];

    let head_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&request).into_owned());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(position) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = request.len() - head_end;
    while body_read < content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Ok(head)
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
