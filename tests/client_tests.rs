//! HttpChatBackend against a throwaway local server standing in for the
//! chat-completions API.

use persona_lab::web::{read_request, Request};
use persona_lab::{ChatBackend, ChatMessage, HttpChatBackend, LabConfig, SessionState};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one canned response and hand back the request that was received.
async fn fake_api(status_line: &'static str, body: &'static str, delay: Duration) -> (String, JoinHandle<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await.unwrap().unwrap();
        tokio::time::sleep(delay).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        request
    });
    (format!("http://{}/v1/chat/completions", addr), handle)
}

fn backend(endpoint: String, timeout_secs: u64) -> HttpChatBackend {
    let config = LabConfig { endpoint, timeout_secs, ..LabConfig::default() };
    HttpChatBackend::new(&config, Some("test-key".to_string())).unwrap()
}

const OK_BODY: &str = r#"{"id":"c1","choices":[{"index":0,"message":{"role":"assistant","content":"您好。"},"finish_reason":"stop"}]}"#;

#[tokio::test]
async fn test_success_returns_reply_and_sends_expected_request() {
    let (url, server) = fake_api("200 OK", OK_BODY, Duration::ZERO).await;
    let reply = backend(url, 10)
        .complete(vec![ChatMessage::system("persona"), ChatMessage::user("你好")])
        .await
        .unwrap();
    assert_eq!(reply, "您好。");

    let request = server.await.unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/v1/chat/completions");
    assert_eq!(request.header("authorization"), Some("Bearer test-key"));
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "你好");
    assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_non_success_status_is_failure() {
    let (url, _server) = fake_api("500 Internal Server Error", r#"{"error":"overloaded"}"#, Duration::ZERO).await;
    let err = backend(url, 10).complete(vec![ChatMessage::user("hi")]).await.unwrap_err();
    assert_eq!(err.kind(), "external_call");
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn test_malformed_json_is_failure() {
    let (url, _server) = fake_api("200 OK", "not json", Duration::ZERO).await;
    let err = backend(url, 10).complete(vec![ChatMessage::user("hi")]).await.unwrap_err();
    assert!(err.to_string().contains("malformed"));
}

#[tokio::test]
async fn test_missing_reply_path_is_failure() {
    let (url, _server) = fake_api("200 OK", r#"{"choices":[]}"#, Duration::ZERO).await;
    let err = backend(url, 10).complete(vec![ChatMessage::user("hi")]).await.unwrap_err();
    assert!(err.to_string().contains("no reply"));
}

#[tokio::test]
async fn test_timeout_is_failure() {
    let (url, _server) = fake_api("200 OK", OK_BODY, Duration::from_secs(3)).await;
    let err = backend(url, 1).complete(vec![ChatMessage::user("hi")]).await.unwrap_err();
    assert_eq!(err.kind(), "external_call");
}

#[tokio::test]
async fn test_failed_turn_keeps_latency_total() {
    let (url, _server) = fake_api("503 Service Unavailable", "{}", Duration::ZERO).await;
    let backend = backend(url, 10);
    let mut state = SessionState::new();
    state.confirm_identity(1).unwrap();
    let outcome = state.submit_user_message("hi", &backend, 5).await.unwrap().unwrap();
    assert!(outcome.failed);
    assert_eq!(state.transcript.len(), 2);
    assert!(state.transcript[1].content.contains("503"));
    assert_eq!(state.total_api_latency_secs, 0.0);
}

#[tokio::test]
async fn test_successful_turn_counts_latency() {
    let (url, _server) = fake_api("200 OK", OK_BODY, Duration::from_millis(50)).await;
    let backend = backend(url, 10);
    let mut state = SessionState::new();
    state.confirm_identity(2).unwrap();
    let outcome = state.submit_user_message("hi", &backend, 5).await.unwrap().unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.reply, "您好。");
    assert!(state.total_api_latency_secs >= 0.05);
}
