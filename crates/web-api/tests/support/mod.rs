use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatService, ChatServiceDependencies, ChatSettings, LocalEventBroadcaster, MemoryEventLogStore,
    MemoryPresenceRegistry, MemoryTypingRegistry, SystemClock,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 使用内存实现在随机端口上启动服务，`drop` 时关闭
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let chat_service = ChatService::new(ChatServiceDependencies {
            registry: Arc::new(MemoryPresenceRegistry::new()),
            typing: Arc::new(MemoryTypingRegistry::new()),
            event_log: Arc::new(MemoryEventLogStore::new()),
            broadcaster: Arc::new(LocalEventBroadcaster::new(256)),
            clock: Arc::new(SystemClock::default()),
            settings: ChatSettings::default(),
        });
        let app = router(AppState::new(Arc::new(chat_service)));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            shutdown: Some(shutdown_tx),
        }
    }

    #[allow(dead_code)]
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self) -> Socket {
        self.connect_with_replay().await.0
    }

    /// 建立连接并等到服务端开始处理客户端事件，返回期间收到的回放事件。
    ///
    /// 服务端先回放再读取客户端帧，因此一个无法识别的标记帧换回的
    /// `error` 事件之前的所有事件就是完整的回放。
    pub async fn connect_with_replay(&self) -> (Socket, Vec<Value>) {
        let (mut socket, _) = connect_async(format!("ws://{}/api/v1/ws", self.addr))
            .await
            .expect("websocket connect");
        send(&mut socket, serde_json::json!({"event": "replay-marker"})).await;

        let mut replay = Vec::new();
        loop {
            let event = next_event(&mut socket).await;
            if event["event"] == "error" {
                return (socket, replay);
            }
            replay.push(event);
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(TungsteniteMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个 JSON 事件，超时视为失败
pub async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("event within timeout")
            .expect("socket open")
            .expect("frame");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json event");
        }
    }
}

/// 读取事件直到遇到指定名称的事件
pub async fn next_named(socket: &mut Socket, name: &str) -> Value {
    loop {
        let event = next_event(socket).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// 在短时间内没有任何事件到达
#[allow(dead_code)]
pub async fn assert_silent(socket: &mut Socket) {
    let result = timeout(Duration::from_millis(200), socket.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

pub async fn login(socket: &mut Socket, name: &str) -> bool {
    send(
        socket,
        serde_json::json!({"event": "user-login", "data": {"username": name}}),
    )
    .await;
    let result = next_named(socket, "login-result").await;
    result["data"]["accepted"].as_bool().expect("accepted flag")
}
