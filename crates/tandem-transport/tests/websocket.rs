use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tandem_protocol::{decode, encode, Init, Message, Permissions};
use tandem_transport::{
    ConnectionError, ConnectionState, Transport, TransportHandler, WebSocketConfig,
    WebSocketTransport,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

#[derive(Debug)]
enum Event {
    Open,
    Receive(Message),
    Close(Option<ConnectionError>),
}

struct Recorder(mpsc::UnboundedSender<Event>);

impl TransportHandler for Recorder {
    fn on_receive(&self, message: Message) {
        let _ = self.0.send(Event::Receive(message));
    }

    fn on_open(&self) {
        let _ = self.0.send(Event::Open);
    }

    fn on_close(&self, error: Option<&ConnectionError>) {
        let _ = self.0.send(Event::Close(error.cloned()));
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder(tx)), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

fn init_frame() -> WsMessage {
    let init = Message::Init(Init {
        version: 1,
        client_id: "c1".into(),
        data: json!({"title": "abc"}),
        clients: vec![],
        permissions: Permissions::read_write(),
        comments: vec![],
    });
    WsMessage::Text(encode(&init).unwrap())
}

async fn serve<F, Fut>(session: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        session(ws).await;
    });
    format!("ws://{}", addr)
}

async fn drain(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(frame)) = ws.next().await {
        if frame.is_close() {
            break;
        }
    }
}

#[tokio::test]
async fn test_connect_send_receive() {
    let url = serve(|mut ws| async move {
        ws.send(init_frame()).await.unwrap();
        let frame = ws.next().await.unwrap().unwrap();
        let received = decode(frame.to_text().unwrap()).unwrap();
        assert_eq!(received, Message::delete("a.b"));

        let mut reply = Message::update_key("a", json!(1), false);
        if let Message::UpdateKey(update) = &mut reply {
            update.version = Some(2);
        }
        ws.send(WsMessage::Text(encode(&reply).unwrap())).await.unwrap();
        drain(ws).await;
    })
    .await;

    let (handler, mut events) = recorder();
    let transport = WebSocketTransport::new(url, handler);
    transport.connect().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Open);

    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert!(matches!(next_event(&mut events).await, Event::Receive(Message::Init(_))));

    transport.send(Message::delete("a.b"));
    match next_event(&mut events).await {
        Event::Receive(message) => assert_eq!(message.version(), Some(2)),
        other => panic!("unexpected event {:?}", other),
    }

    transport.disconnect(false).await;
    assert!(matches!(next_event(&mut events).await, Event::Close(None)));
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(transport.error(), None);
}

#[tokio::test]
async fn test_permission_denied_close() {
    let url = serve(|mut ws| async move {
        ws.send(init_frame()).await.unwrap();
        let frame = CloseFrame {
            code: CloseCode::from(4403),
            reason: "forbidden".into(),
        };
        ws.send(WsMessage::Close(Some(frame))).await.unwrap();
        drain(ws).await;
    })
    .await;

    let (handler, mut events) = recorder();
    let transport = WebSocketTransport::new(url, handler);
    transport.connect().await.unwrap();

    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert!(matches!(next_event(&mut events).await, Event::Receive(_)));
    match next_event(&mut events).await {
        Event::Close(Some(ConnectionError::PermissionDenied)) => {}
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(transport.error(), Some(ConnectionError::PermissionDenied));
}

#[tokio::test]
async fn test_close_before_init_fails_to_establish() {
    let url = serve(|mut ws| async move {
        ws.close(None).await.unwrap();
        drain(ws).await;
    })
    .await;

    let (handler, _events) = recorder();
    let transport = WebSocketTransport::new(url, handler);
    match transport.connect().await {
        Err(ConnectionError::FailedToEstablish(_)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_handshake_forbidden() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            let mut response = ErrorResponse::new(Some("forbidden".into()));
            *response.status_mut() = StatusCode::FORBIDDEN;
            Err(response)
        };
        let _ = accept_hdr_async(stream, reject).await;
    });

    let (handler, mut events) = recorder();
    let transport = WebSocketTransport::new(url, handler);
    assert_eq!(transport.connect().await, Err(ConnectionError::PermissionDenied));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_liveness_timeout() {
    let url = serve(|mut ws| async move {
        ws.send(init_frame()).await.unwrap();
        // Never answer
        drain(ws).await;
    })
    .await;

    let (handler, mut events) = recorder();
    let config = WebSocketConfig {
        heartbeat_interval: Duration::from_secs(60),
        liveness_timeout: Duration::from_millis(200),
    };
    let transport = WebSocketTransport::new(url, handler).with_config(config);
    transport.connect().await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert!(matches!(next_event(&mut events).await, Event::Receive(_)));

    transport.send(Message::ping());
    match next_event(&mut events).await {
        Event::Close(Some(ConnectionError::LivenessTimeout)) => {}
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_disconnect_flushes_queued_messages() {
    let (seen_tx, seen_rx) = oneshot::channel();
    let url = serve(|mut ws| async move {
        ws.send(init_frame()).await.unwrap();
        let mut paths = Vec::new();
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                WsMessage::Text(text) => {
                    let message = decode(&text).unwrap();
                    paths.push(message.path().unwrap_or_default().to_string());
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        let _ = seen_tx.send(paths);
    })
    .await;

    let (handler, _events) = recorder();
    let transport = WebSocketTransport::new(url, handler);
    transport.connect().await.unwrap();

    transport.send(Message::delete("a"));
    transport.send(Message::delete("b"));
    transport.disconnect(true).await;

    let paths = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paths, vec!["a", "b"]);

    // Closed transports drop messages
    transport.send(Message::delete("c"));
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_silent_server_times_out_before_init() {
    // Accepts the socket but never sends the initial state
    let url = serve(drain).await;

    let (handler, mut events) = recorder();
    let config = WebSocketConfig {
        heartbeat_interval: Duration::from_secs(30),
        liveness_timeout: Duration::from_millis(200),
    };
    let transport = WebSocketTransport::new(url, handler).with_config(config);
    let result = tokio::time::timeout(Duration::from_secs(3), transport.connect())
        .await
        .expect("connect should not hang on a silent server");
    assert_eq!(result, Err(ConnectionError::LivenessTimeout));
    assert_eq!(transport.state(), ConnectionState::Closed);

    assert!(matches!(next_event(&mut events).await, Event::Open));
    match next_event(&mut events).await {
        Event::Close(Some(ConnectionError::LivenessTimeout)) => {}
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_heartbeat_pings_without_sends() {
    let (pings_tx, pings_rx) = oneshot::channel();
    let url = serve(|mut ws| async move {
        ws.send(init_frame()).await.unwrap();
        let mut pings = Vec::new();
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                WsMessage::Text(text) => {
                    pings.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
                    if pings.len() == 2 {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        let _ = pings_tx.send(pings);
        drain(ws).await;
    })
    .await;

    let (handler, _events) = recorder();
    let config = WebSocketConfig {
        heartbeat_interval: Duration::from_millis(100),
        liveness_timeout: Duration::from_secs(5),
    };
    let transport = WebSocketTransport::new(url, handler).with_config(config);
    transport.connect().await.unwrap();

    let pings = tokio::time::timeout(Duration::from_secs(3), pings_rx)
        .await
        .expect("no heartbeat within 3s")
        .unwrap();
    assert_eq!(pings, vec![json!({"type": "ping"}), json!({"type": "ping"})]);
    assert_eq!(transport.state(), ConnectionState::Open);

    transport.disconnect(false).await;
}
