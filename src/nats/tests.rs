use super::client::{missing_subjects, subject_matches};
use super::*;
use crate::config::SenderConfig;
use crate::delivery::{Ack, BrokerClient, DeliveryConfig, DeliveryFailure, DeliveryPipeline};
use crate::event::{normalize, ChannelType};
use crate::error::SenderError;
use crate::runner::{run, RunMode};
use async_nats::jetstream::stream;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const SERVER_INFO: &str = "INFO {\"server_id\":\"fake\",\"server_name\":\"fake\",\
\"version\":\"2.10.0\",\"proto\":1,\"headers\":true,\"max_payload\":1048576,\
\"jetstream\":true}\r\n";

const MAIL_TOPIC: &str = "support.mail.raw";
const WHATSAPP_TOPIC: &str = "support.whatsapp.raw";

/// Whether the fake server acknowledges plain publishes
#[derive(Clone, Copy, PartialEq, Eq)]
enum AckMode {
    Ack,
    Silent,
}

struct Published {
    subject: String,
    headers: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    published: Vec<Published>,
    /// Current stream config as the client sent it
    stream: Option<Value>,
    creates: usize,
    updates: usize,
    reject_updates: bool,
    closed_connections: usize,
}

impl ServerState {
    fn stream_subjects(&self) -> Vec<String> {
        self.stream
            .as_ref()
            .and_then(|config| config["subjects"].as_array())
            .map(|subjects| {
                subjects
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Speaks just enough of the NATS protocol for core requests and the
/// JetStream stream API, over a loopback socket
struct FakeServer {
    url: String,
    state: Arc<Mutex<ServerState>>,
    closed: Arc<Notify>,
}

impl FakeServer {
    async fn start(ack: AckMode) -> Self {
        Self::start_with(ack, ServerState::default()).await
    }

    async fn with_stream(ack: AckMode, subjects: &[&str]) -> Self {
        let config = stream::Config {
            name: "SUPPORT_RAW".to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let state = ServerState {
            stream: Some(serde_json::to_value(config).unwrap()),
            ..Default::default()
        };
        Self::start_with(ack, state).await
    }

    async fn start_with(ack: AckMode, state: ServerState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("nats://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(state));
        let closed = Arc::new(Notify::new());

        let (accept_state, accept_closed) = (state.clone(), closed.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    ack,
                    accept_state.clone(),
                    accept_closed.clone(),
                ));
            }
        });

        Self { url, state, closed }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    fn nats_config(&self, ensure_stream: bool) -> NatsConfig {
        NatsConfig {
            url: self.url.clone(),
            ensure_stream,
            ..NatsConfig::default()
        }
    }

    async fn connect(&self, ensure_stream: bool) -> Result<NatsClient, SenderError> {
        let subjects = vec![MAIL_TOPIC.to_string(), WHATSAPP_TOPIC.to_string()];
        NatsClient::connect(self.nats_config(ensure_stream), subjects).await
    }

    /// Wait until a client connection has been closed
    async fn wait_closed(&self) -> bool {
        if self.state().closed_connections > 0 {
            return true;
        }
        tokio::time::timeout(Duration::from_secs(5), self.closed.notified())
            .await
            .is_ok()
    }
}

async fn serve(
    socket: TcpStream,
    ack: AckMode,
    state: Arc<Mutex<ServerState>>,
    closed: Arc<Notify>,
) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    let mut reply_sid = "0".to_string();

    if write.write_all(SERVER_INFO.as_bytes()).await.is_err() {
        return;
    }

    loop {
        let mut buf = String::new();
        match reader.read_line(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let args: Vec<&str> = buf.split_whitespace().collect();
        let (subject, reply, header_len, total_len) = match args.as_slice() {
            ["PING"] => {
                if write.write_all(b"PONG\r\n").await.is_err() {
                    break;
                }
                continue;
            }
            ["SUB", .., sid] => {
                reply_sid = sid.to_string();
                continue;
            }
            ["PUB", subject, reply, len] => (*subject, Some(*reply), "0", *len),
            ["PUB", subject, len] => (*subject, None, "0", *len),
            ["HPUB", subject, reply, hdr, total] => (*subject, Some(*reply), *hdr, *total),
            ["HPUB", subject, hdr, total] => (*subject, None, *hdr, *total),
            _ => continue,
        };

        let header_len: usize = header_len.parse().unwrap();
        let total_len: usize = total_len.parse().unwrap();
        let mut body = vec![0; total_len + 2];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        body.truncate(total_len);
        let payload = body.split_off(header_len);
        let headers = String::from_utf8_lossy(&body).to_string();

        let response = respond(&state, ack, subject, headers, payload);
        if let (Some(reply), Some(response)) = (reply, response) {
            let mut frame =
                format!("MSG {} {} {}\r\n", reply, reply_sid, response.len()).into_bytes();
            frame.extend_from_slice(&response);
            frame.extend_from_slice(b"\r\n");
            if write.write_all(&frame).await.is_err() {
                break;
            }
        }
    }

    state.lock().unwrap().closed_connections += 1;
    closed.notify_one();
}

fn respond(
    state: &Mutex<ServerState>,
    ack: AckMode,
    subject: &str,
    headers: String,
    payload: Vec<u8>,
) -> Option<Vec<u8>> {
    let mut state = state.lock().unwrap();

    if subject.starts_with("$JS.API.STREAM.INFO.") {
        let body = match &state.stream {
            Some(config) => stream_info(config),
            None => api_error(404, 10059, "stream not found"),
        };
        return Some(body.to_string().into_bytes());
    }

    if subject.starts_with("$JS.API.STREAM.UPDATE.") && state.reject_updates {
        state.updates += 1;
        return Some(api_error(500, 10052, "subjects overlap").to_string().into_bytes());
    }

    let create = subject.starts_with("$JS.API.STREAM.CREATE.");
    if create || subject.starts_with("$JS.API.STREAM.UPDATE.") {
        if create {
            state.creates += 1;
        } else {
            state.updates += 1;
        }
        let config: Value = serde_json::from_slice(&payload).unwrap();
        let body = stream_info(&config);
        state.stream = Some(config);
        return Some(body.to_string().into_bytes());
    }

    state.published.push(Published {
        subject: subject.to_string(),
        headers,
        payload,
    });

    match ack {
        AckMode::Ack => {
            let body = json!({ "stream": "SUPPORT_RAW", "seq": state.published.len() });
            Some(body.to_string().into_bytes())
        }
        AckMode::Silent => None,
    }
}

fn stream_info(config: &Value) -> Value {
    json!({
        "config": config,
        "created": "2024-01-01T00:00:00Z",
        "state": {
            "messages": 0,
            "bytes": 0,
            "first_seq": 0,
            "first_ts": "2024-01-01T00:00:00Z",
            "last_seq": 0,
            "last_ts": "2024-01-01T00:00:00Z",
            "consumer_count": 0
        }
    })
}

fn api_error(code: u64, err_code: u64, description: &str) -> Value {
    json!({ "error": { "code": code, "err_code": err_code, "description": description } })
}

#[test]
fn test_subject_matches() {
    assert!(subject_matches("support.mail.raw", "support.mail.raw"));
    assert!(subject_matches("support.*.raw", "support.whatsapp.raw"));
    assert!(subject_matches("support.>", "support.mail.raw"));
    assert!(subject_matches(">", "support"));

    assert!(!subject_matches("support.mail.raw", "support.whatsapp.raw"));
    assert!(!subject_matches("support.*", "support.mail.raw"));
    assert!(!subject_matches("support.mail.raw.>", "support.mail.raw"));
    assert!(!subject_matches("support.mail", "support.mail.raw"));
}

#[test]
fn test_missing_subjects() {
    let wanted = vec![MAIL_TOPIC.to_string(), WHATSAPP_TOPIC.to_string()];

    assert!(missing_subjects(&["support.>".to_string()], &wanted).is_empty());
    assert_eq!(
        missing_subjects(&[MAIL_TOPIC.to_string()], &wanted),
        vec![WHATSAPP_TOPIC.to_string()]
    );
    assert_eq!(missing_subjects(&[], &wanted), wanted);
}

#[tokio::test]
async fn test_publish_returns_stream_sequence() {
    let server = FakeServer::start(AckMode::Ack).await;
    let client = server.connect(false).await.unwrap();
    let publisher = EventPublisher::new(client.jetstream().clone(), Duration::from_secs(2));

    let first = publisher
        .publish(MAIL_TOPIC, None, br#"{"body":"one"}"#.to_vec())
        .await
        .unwrap();
    let second = publisher
        .publish(MAIL_TOPIC, None, br#"{"body":"two"}"#.to_vec())
        .await
        .unwrap();

    assert_eq!(
        first,
        Ack {
            stream: "SUPPORT_RAW".to_string(),
            sequence: 1
        }
    );
    assert_eq!(second.sequence, 2);

    let state = server.state();
    assert_eq!(state.published.len(), 2);
    assert_eq!(state.published[0].subject, MAIL_TOPIC);
    assert_eq!(state.published[0].payload, br#"{"body":"one"}"#.to_vec());
    assert!(state.published[0].headers.is_empty());
}

#[tokio::test]
async fn test_partition_key_sent_as_header() {
    let server = FakeServer::start(AckMode::Ack).await;
    let client = server.connect(false).await.unwrap();
    let publisher = EventPublisher::new(client.jetstream().clone(), Duration::from_secs(2));

    publisher
        .publish(WHATSAPP_TOPIC, Some("a@b.com"), b"{}".to_vec())
        .await
        .unwrap();

    let state = server.state();
    let headers = state.published[0].headers.to_lowercase();
    let expected = format!("{}: a@b.com", PARTITION_KEY_HEADER.to_lowercase());
    assert!(headers.contains(&expected), "headers: {:?}", headers);
    assert_eq!(state.published[0].payload, b"{}".to_vec());
}

#[tokio::test]
async fn test_missing_ack_is_reported_as_ack_timeout() {
    let server = FakeServer::start(AckMode::Silent).await;
    let client = server.connect(false).await.unwrap();
    let timeout = Duration::from_millis(200);
    let publisher = EventPublisher::new(client.jetstream().clone(), timeout);

    let result = publisher.publish(MAIL_TOPIC, None, b"{}".to_vec()).await;

    assert_eq!(result, Err(DeliveryFailure::AckTimeout(timeout)));
    assert_eq!(server.state().published.len(), 1);
}

#[tokio::test]
async fn test_ack_wait_longer_than_client_default() {
    // async-nats gives up after 5 s unless told otherwise
    let server = FakeServer::start(AckMode::Silent).await;
    let client = server.connect(false).await.unwrap();
    let config = DeliveryConfig {
        ack_timeout_ms: 5_600,
        send_interval_ms: 0,
        ..DeliveryConfig::default()
    };
    let publisher = EventPublisher::new(client.jetstream().clone(), config.ack_timeout());
    let pipeline = DeliveryPipeline::new(&publisher, config);

    let started = Instant::now();
    let report = pipeline
        .send_batch(MAIL_TOPIC, &["slow"], |index, body: &&str| {
            normalize(
                ChannelType::Mail,
                format!("mail-{}-00000000", index),
                "a@b.com".to_string(),
                body.to_string(),
                "2024-01-01T00:00:00Z",
                None,
            )
        })
        .await
        .unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(5_400),
        "gave up after {:?}",
        started.elapsed()
    );
    assert_eq!(
        report.outcomes[0].result,
        Err(DeliveryFailure::AckTimeout(Duration::from_millis(5_600)))
    );
}

#[tokio::test]
async fn test_connect_creates_missing_stream() {
    let server = FakeServer::start(AckMode::Ack).await;
    let _client = server.connect(true).await.unwrap();

    let state = server.state();
    assert_eq!(state.creates, 1);
    assert_eq!(state.updates, 0);
    assert_eq!(state.stream_subjects(), vec![MAIL_TOPIC, WHATSAPP_TOPIC]);
}

#[tokio::test]
async fn test_connect_keeps_covering_stream() {
    let server = FakeServer::with_stream(AckMode::Ack, &["support.>"]).await;
    let _client = server.connect(true).await.unwrap();

    let state = server.state();
    assert_eq!(state.creates, 0);
    assert_eq!(state.updates, 0);
    assert_eq!(state.stream_subjects(), vec!["support.>"]);
}

#[tokio::test]
async fn test_connect_adds_uncovered_subjects_to_stream() {
    let server = FakeServer::with_stream(AckMode::Ack, &[MAIL_TOPIC, "audit.>"]).await;
    let _client = server.connect(true).await.unwrap();

    let state = server.state();
    assert_eq!(state.creates, 0);
    assert_eq!(state.updates, 1);
    assert_eq!(
        state.stream_subjects(),
        vec![MAIL_TOPIC, "audit.>", WHATSAPP_TOPIC]
    );
}

#[tokio::test]
async fn test_rejected_stream_update_is_setup_error() {
    let server = FakeServer::with_stream(AckMode::Ack, &[MAIL_TOPIC]).await;
    server.state().reject_updates = true;

    match server.connect(true).await {
        Err(SenderError::StreamSetup { stream, reason }) => {
            assert_eq!(stream, "SUPPORT_RAW");
            assert!(!reason.is_empty());
        }
        Err(other) => panic!("Expected stream setup error, got {}", other),
        Ok(_) => panic!("Expected stream setup error, got a connection"),
    }
    assert_eq!(server.state().updates, 1);
}

#[tokio::test]
async fn test_dropped_client_closes_connection() {
    let server = FakeServer::start(AckMode::Ack).await;
    let client = server.connect(false).await.unwrap();
    let publisher = EventPublisher::new(client.jetstream().clone(), Duration::from_secs(2));

    drop(publisher);
    drop(client);

    assert!(server.wait_closed().await, "connection left open");
}

#[tokio::test]
async fn test_run_closes_connection_after_missing_fixture() {
    let server = FakeServer::start(AckMode::Ack).await;
    let dir = TempDir::new().unwrap();

    let mut config = SenderConfig::default();
    config.nats = server.nats_config(false);
    config.fixtures.directory = dir.path().to_path_buf();

    let result = run(&config, RunMode::Primary).await;

    assert!(matches!(result, Err(SenderError::SourceFileMissing { .. })));
    assert!(server.wait_closed().await, "connection left open");
    assert!(server.state().published.is_empty());
}

#[tokio::test]
async fn test_run_publishes_over_nats() {
    let server = FakeServer::start(AckMode::Ack).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("mail.json"),
        r#"[{"mail":"a@b.com","message":"hi","date":"2024-01-01T00:00:00"}]"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("whatsapp.json"), "[]").unwrap();

    let mut config = SenderConfig::default();
    config.nats = server.nats_config(true);
    config.fixtures.directory = dir.path().to_path_buf();
    config.delivery.send_interval_ms = 0;

    let summary = run(&config, RunMode::Primary).await.unwrap();

    assert_eq!(summary.successful(), 1);
    assert_eq!(summary.mail.outcomes[0].result.as_ref().unwrap().sequence, 1);
    assert!(server.wait_closed().await, "connection left open");

    let state = server.state();
    assert_eq!(state.creates, 1);
    assert_eq!(state.published.len(), 1);
    assert_eq!(state.published[0].subject, MAIL_TOPIC);
    let event: Value = serde_json::from_slice(&state.published[0].payload).unwrap();
    assert_eq!(event["channelType"], "MAIL");
    assert_eq!(event["contact"], "a@b.com");
}
