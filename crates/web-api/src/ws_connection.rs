use application::{ApplicationError, EventStream, OpenedSession, ReplayWatermark, Session};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ServerEvent};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::error_event;
use crate::state::AppState;

/// WebSocket 连接
///
/// 每个连接拆成两个任务：
/// - 发送任务：合并会话私有事件、广播事件与心跳回应，写入 socket；
///   回放完成之前不写广播，回放完成后跳过已经回放过的广播
/// - 接收任务：先回放历史，再逐帧解析客户端事件并交给 `ChatService`
///
/// 接收任务结束（包括 panic）之后统一执行一次登出清理。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    opened: OpenedSession,
}

/// 发送任务的控制命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// 读取循环是否继续
enum Flow {
    Continue,
    Close,
}

impl WebSocketConnection {
    /// 会话在此刻订阅广播，之后的广播不会因为回放而丢失
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        let opened = state.chat_service.open_session();
        Self {
            socket,
            state,
            opened,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            opened,
        } = self;
        let OpenedSession {
            session,
            private,
            broadcasts,
        } = opened;
        let session_id = session.id();
        tracing::info!(%session_id, "websocket connected");

        let (sender, incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);
        let (replayed_tx, replayed_rx) = oneshot::channel::<ReplayWatermark>();

        let send_task = tokio::spawn(write_loop(sender, private, broadcasts, cmd_rx, replayed_rx));

        let recv_task = tokio::spawn({
            let state = state.clone();
            let session = session.clone();
            async move {
                match state.chat_service.on_connect(&session).await {
                    Ok(watermark) => {
                        let _ = replayed_tx.send(watermark);
                    }
                    Err(err) => {
                        tracing::warn!(session_id = %session.id(), error = %err, "history replay aborted");
                        return;
                    }
                }
                read_loop(incoming, &state, &session, &cmd_tx).await;
            }
        });

        if let Err(err) = recv_task.await {
            tracing::error!(%session_id, error = %err, "websocket receive task failed");
        }

        state.chat_service.disconnect(&session).await;
        send_task.abort();
        tracing::info!(%session_id, "websocket disconnected");
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut private: mpsc::Receiver<ServerEvent>,
    mut broadcasts: EventStream,
    mut commands: mpsc::Receiver<WsCommand>,
    mut replayed: oneshot::Receiver<ReplayWatermark>,
) {
    // 回放结束前只写私有事件，广播留在订阅里等待去重
    let mut replay_done = false;
    loop {
        let message = tokio::select! {
            // 私有事件优先，回放内容先于之后的广播写出
            biased;
            Some(command) = commands.recv() => match command {
                WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
            },
            Some(event) = private.recv() => match encode(&event) {
                Some(message) => message,
                None => continue,
            },
            watermark = &mut replayed, if !replay_done => {
                replay_done = true;
                if let Ok(watermark) = watermark {
                    broadcasts.skip_replayed(watermark);
                }
                continue;
            }
            Some(event) = broadcasts.recv(), if replay_done => match encode(&event) {
                Some(message) => message,
                None => continue,
            },
            else => break,
        };
        if sender.send(message).await.is_err() {
            tracing::debug!("websocket send failed");
            break;
        }
    }
}

fn encode(event: &ServerEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(err) => {
            tracing::warn!(event = event.name(), error = %err, "failed to serialize websocket payload");
            None
        }
    }
}

async fn read_loop(
    mut incoming: futures_util::stream::SplitStream<WebSocket>,
    state: &AppState,
    session: &Session,
    cmd_tx: &mpsc::Sender<WsCommand>,
) {
    while let Some(frame) = incoming.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(session_id = %session.id(), error = %err, "websocket read failed");
                break;
            }
        };
        let flow = match message {
            WsMessage::Close(_) => Flow::Close,
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
            WsMessage::Pong(_) => Flow::Continue,
            WsMessage::Text(text) => handle_text(text.as_str(), state, session).await,
            WsMessage::Binary(_) => {
                reply(session, ServerEvent::error("BAD_REQUEST", "binary frames are not supported", false)).await
            }
        };
        if let Flow::Close = flow {
            break;
        }
    }
}

async fn handle_text(text: &str, state: &AppState, session: &Session) -> Flow {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(session_id = %session.id(), error = %err, "malformed client event");
            let event = ServerEvent::error("BAD_REQUEST", format!("malformed event: {err}"), false);
            return reply(session, event).await;
        }
    };

    let chat = &state.chat_service;
    match event {
        ClientEvent::UserLogin(request) => {
            let accepted = match chat.login(session, request.username).await {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(session_id = %session.id(), error = %err, "login rejected");
                    if err.is_retryable() {
                        if let Flow::Close = reply(session, error_event(&err)).await {
                            return Flow::Close;
                        }
                    }
                    false
                }
            };
            reply(session, ServerEvent::login_result(accepted)).await
        }
        ClientEvent::ChatMessage(request) => {
            let result = chat.post_chat_message(session, request.text).await;
            report(session, result).await
        }
        ClientEvent::StartTyping => report(session, chat.start_typing(session).await).await,
        ClientEvent::StopTyping => report(session, chat.stop_typing(session).await).await,
    }
}

async fn report(session: &Session, result: Result<(), ApplicationError>) -> Flow {
    match result {
        Ok(()) => Flow::Continue,
        Err(ApplicationError::Transport(_)) => Flow::Close,
        Err(err) => {
            tracing::warn!(session_id = %session.id(), error = %err, "client event rejected");
            reply(session, error_event(&err)).await
        }
    }
}

async fn reply(session: &Session, event: ServerEvent) -> Flow {
    match session.emit(event).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Close,
    }
}
