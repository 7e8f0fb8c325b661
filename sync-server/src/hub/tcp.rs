//! TCP 同步服务器实现
//!
//! 负责处理 TCP 客户端连接，包括：
//! - 监听连接
//! - 协议握手验证（版本检查）
//! - 订阅/重连回放请求处理
//! - 出站队列到套接字的转发
//! - 静默连接的存活超时清理
//!
//! 帧格式：u32 小端长度前缀 + JSON 载荷。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::message::{ClientMessage, PROTOCOL_VERSION, ServerMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::ConnectionHub;
use crate::core::{SyncError, SyncResult};

/// 单帧载荷上限
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Delay before closing after a handshake error (client gets the frame)
const HANDSHAKE_ERROR_DELAY_MS: u64 = 100;

/// TCP front end over the connection hub
pub struct TcpSyncServer {
    hub: Arc<ConnectionHub>,
    listen_addr: String,
    liveness_timeout: Duration,
    shutdown: CancellationToken,
}

impl TcpSyncServer {
    pub fn new(
        hub: Arc<ConnectionHub>,
        listen_addr: String,
        liveness_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hub,
            listen_addr,
            liveness_timeout,
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> SyncResult<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| SyncError::internal(format!("Failed to bind: {e}")))?;
        tracing::info!("Sync TCP server listening on {}", self.listen_addr);
        self.accept_loop(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves)
    pub async fn run_with_listener(self, listener: TcpListener) -> SyncResult<()> {
        self.accept_loop(listener).await
    }

    async fn accept_loop(self, listener: TcpListener) -> SyncResult<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Sync TCP server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Client connected: {}", addr);
                            self.spawn_client_handler(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_client_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = Arc::clone(&self.hub);
        let liveness = self.liveness_timeout;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client_connection(stream, addr, hub, liveness, shutdown).await {
                tracing::debug!("Client {} handler finished: {}", addr, e);
            }
        });
    }
}

/// Handle a single client connection end to end
async fn handle_client_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<ConnectionHub>,
    liveness: Duration,
    shutdown: CancellationToken,
) -> SyncResult<()> {
    let (mut reader, mut writer) = stream.into_split();

    // Protocol handshake
    let identity = match perform_handshake(&mut reader, &mut writer, addr, liveness).await {
        Ok(identity) => identity,
        Err(e) => {
            tokio::time::sleep(Duration::from_millis(HANDSHAKE_ERROR_DELAY_MS)).await;
            return Err(e);
        }
    };

    let (conn, rx) = hub.register(identity);
    let connection_id = conn.id().to_string();

    write_frame(
        &mut writer,
        &ServerMessage::HelloAck {
            connection_id: connection_id.clone(),
            server_epoch: hub.epoch().to_string(),
        },
    )
    .await?;

    // 创建共享的断开检测 token
    let disconnect_token = CancellationToken::new();

    // Writer task drains the hub queue to the socket
    let writer_handle = spawn_queue_forwarder(
        writer,
        rx,
        shutdown.clone(),
        disconnect_token.clone(),
        connection_id.clone(),
    );

    // Read loop: subscriptions, resync requests, liveness pings
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = disconnect_token.cancelled() => break,

            read_result = timeout(liveness, read_frame::<_, ClientMessage>(&mut reader)) => {
                match read_result {
                    Err(_) => {
                        // 静默超时：视为断开
                        tracing::debug!(connection_id = %connection_id, "Liveness timeout, disconnecting {}", addr);
                        break;
                    }
                    Ok(Err(SyncError::ConnectionClosed)) => {
                        tracing::debug!(connection_id = %connection_id, "Client {} disconnected", addr);
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, "Client {} read error: {}", addr, e);
                        break;
                    }
                    Ok(Ok(msg)) => handle_client_message(&hub, &conn, msg),
                }
            }
        }
    }

    // Cleanup
    disconnect_token.cancel();
    let _ = writer_handle.await;
    hub.on_disconnect(&connection_id);

    Ok(())
}

/// Read and validate the Hello frame
async fn perform_handshake(
    reader: &mut (impl AsyncReadExt + Unpin),
    writer: &mut (impl AsyncWriteExt + Unpin),
    addr: SocketAddr,
    liveness: Duration,
) -> SyncResult<shared::message::ClientIdentity> {
    let hello = timeout(liveness, read_frame::<_, ClientMessage>(reader))
        .await
        .map_err(|_| SyncError::ConnectionClosed)??;

    let ClientMessage::Hello {
        protocol_version,
        identity,
    } = hello
    else {
        tracing::warn!("Client {} failed to handshake: expected Hello", addr);
        let _ = write_frame(
            writer,
            &ServerMessage::error(
                shared::message::ProtocolErrorCode::Internal,
                "Expected Hello message",
            ),
        )
        .await;
        return Err(SyncError::internal("Expected Hello message"));
    };

    if protocol_version != PROTOCOL_VERSION {
        let err = SyncError::ProtocolMismatch {
            server: PROTOCOL_VERSION,
            client: protocol_version,
        };
        tracing::warn!(
            "Client {} protocol version mismatch: expected {}, got {}",
            addr,
            PROTOCOL_VERSION,
            protocol_version
        );
        let _ = write_frame(
            writer,
            &ServerMessage::error(err.protocol_code(), err.to_string()),
        )
        .await;
        return Err(err);
    }

    tracing::debug!("Client {} handshake success (v{})", addr, protocol_version);
    Ok(identity)
}

/// Dispatch one post-handshake client message
fn handle_client_message(
    hub: &ConnectionHub,
    conn: &Arc<super::ClientConnection>,
    msg: ClientMessage,
) {
    let outcome = match msg {
        ClientMessage::Subscribe { topic, last_known } => {
            hub.subscribe(conn.id(), topic, last_known)
        }
        ClientMessage::Unsubscribe { topic } => {
            hub.unsubscribe(conn.id(), &topic);
            Ok(())
        }
        ClientMessage::Resync { sync_point } => hub.replay(conn, &sync_point),
        ClientMessage::Ping => {
            let _ = conn.try_send(ServerMessage::Pong);
            Ok(())
        }
        ClientMessage::Hello { .. } => {
            tracing::debug!(connection_id = %conn.id(), "Duplicate Hello ignored");
            Ok(())
        }
    };

    // Request-level failures go back as error frames; the connection stays up
    if let Err(e) = outcome {
        tracing::debug!(connection_id = %conn.id(), error = %e, "Client request rejected");
        let _ = conn.try_send(ServerMessage::error(e.protocol_code(), e.to_string()));
    }
}

/// Spawn the task forwarding the hub queue to the client socket
fn spawn_queue_forwarder(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    shutdown: CancellationToken,
    disconnect_token: CancellationToken,
    connection_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = disconnect_token.cancelled() => break,

                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = write_frame(&mut writer, &msg).await {
                                tracing::debug!(connection_id = %connection_id, "Client write failed: {}", e);
                                // 通知读循环客户端已断开
                                disconnect_token.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(connection_id = %connection_id, "Queue forwarder stopped");
    })
}

// ========== 帧读写辅助函数 ==========

/// 从异步流中读取一帧（u32 小端长度 + JSON）
pub(crate) async fn read_frame<R, T>(reader: &mut R) -> SyncResult<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SyncError::ConnectionClosed);
        }
        Err(e) => return Err(SyncError::internal(format!("Read length failed: {e}"))),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SyncError::internal(format!("Frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SyncError::ConnectionClosed);
        }
        Err(e) => return Err(SyncError::internal(format!("Read payload failed: {e}"))),
    }

    serde_json::from_slice(&payload).map_err(|e| SyncError::internal(format!("Invalid frame: {e}")))
}

/// 向异步流写入一帧
pub(crate) async fn write_frame<W, T>(writer: &mut W, msg: &T) -> SyncResult<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload =
        serde_json::to_vec(msg).map_err(|e| SyncError::internal(format!("Serialize failed: {e}")))?;

    let mut data = Vec::with_capacity(4 + payload.len());
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&payload);

    writer
        .write_all(&data)
        .await
        .map_err(|e| SyncError::internal(format!("Write failed: {e}")))?;
    Ok(())
}
