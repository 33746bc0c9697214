use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fabric_errors::{FabricError, FabricResult};

/// 单帧上限，防止异常对端耗尽内存
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// ROUTER 模式的路由 socket
///
/// 每个接入连接在 accept 时由传输层分配一个不透明 identity，
/// 入站消息以 `(identity, 载荷)` 对的形式按接收顺序交付，
/// 出站通过 identity 路由到对应连接。线上帧格式为
/// 4 字节大端长度前缀 + JSON 字节。
pub struct RouterSocket {
    routing_id: String,
    local_addr: SocketAddr,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
    peers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
    accept_handle: JoinHandle<()>,
}

impl RouterSocket {
    /// 绑定监听地址并启动 accept 循环
    pub async fn bind(addr: &str) -> FabricResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let routing_id = Uuid::new_v4().to_string();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let accept_peers = peers.clone();
        let accept_handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let identity = Uuid::new_v4().to_string();
                        debug!(
                            "Accepted connection from {} with identity {}",
                            remote, identity
                        );
                        Self::register_peer(stream, identity, &accept_peers, &inbound_tx).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        });

        info!("Router socket bound to {} (id: {})", local_addr, routing_id);

        Ok(Self {
            routing_id,
            local_addr,
            inbound_rx: Mutex::new(inbound_rx),
            peers,
            accept_handle,
        })
    }

    async fn register_peer(
        stream: TcpStream,
        identity: String,
        peers: &Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
        inbound_tx: &mpsc::UnboundedSender<(String, Vec<u8>)>,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        peers.write().await.insert(identity.clone(), outbound_tx);

        tokio::spawn(write_loop(identity.clone(), write_half, outbound_rx));

        let reader_peers = peers.clone();
        let reader_tx = inbound_tx.clone();
        tokio::spawn(async move {
            let mut read_half = read_half;
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(payload)) => {
                        if reader_tx.send((identity.clone(), payload)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Peer {} disconnected", identity);
                        break;
                    }
                    Err(e) => {
                        warn!("Read error for peer {}: {}", identity, e);
                        break;
                    }
                }
            }
            // 断开后撤销出站路由，存活记录由心跳驱逐负责清理
            reader_peers.write().await.remove(&identity);
        });
    }

    /// 接收下一条入站消息，同一对端内保持接收顺序
    pub async fn recv(&self) -> Option<(String, Vec<u8>)> {
        self.inbound_rx.lock().await.recv().await
    }

    /// 发送载荷到指定 identity 的连接
    pub async fn send(&self, identity: &str, payload: &[u8]) -> FabricResult<()> {
        let peers = self.peers.read().await;
        let sender = peers
            .get(identity)
            .ok_or_else(|| FabricError::send_failure(identity, "unknown identity"))?;

        sender
            .send(payload.to_vec())
            .map_err(|_| FabricError::send_failure(identity, "connection closed"))
    }

    /// 当前持有出站路由的全部 identity
    pub async fn connected_identities(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub fn routing_id(&self) -> &str {
        &self.routing_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.accept_handle.abort();
    }
}

/// DEALER 侧：对端发起的单条连接
pub struct DealerSocket {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
}

impl DealerSocket {
    pub async fn connect(addr: &str) -> FabricResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        debug!("Dealer connected to {}", addr);
        Ok(Self {
            read_half,
            write_half,
        })
    }

    pub async fn send(&mut self, payload: &[u8]) -> FabricResult<()> {
        write_frame(&mut self.write_half, payload).await
    }

    /// 读取下一帧，连接关闭时返回 None
    pub async fn recv(&mut self) -> FabricResult<Option<Vec<u8>>> {
        read_frame(&mut self.read_half).await
    }
}

async fn write_loop(
    identity: String,
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(payload) = outbound_rx.recv().await {
        if let Err(e) = write_frame(&mut write_half, &payload).await {
            warn!("Write error for peer {}: {}", identity, e);
            break;
        }
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> FabricResult<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FabricError::network_error(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> FabricResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FabricError::network_error(format!(
            "inbound frame of {len} bytes exceeds limit"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
