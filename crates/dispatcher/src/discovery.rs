use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use fabric_domain::{DiscoveryHello, Liveliness, MachineMapData, MachineStatus};
use fabric_errors::{FabricError, FabricResult};
use fabric_infrastructure::DealerSocket;

use crate::router::{InboundHandler, SocketRouter};

/// 成员映射服务端
///
/// 对任何入站的心跳型消息，把当前完整的存活映射序列化后
/// 直接回给发送者。加入集群的节点以此完成首次成员同步。
pub struct MachineMapServer {
    router: Arc<SocketRouter>,
}

struct MachineMapHandler {
    router: Arc<SocketRouter>,
}

#[async_trait]
impl InboundHandler for MachineMapHandler {
    async fn handle(&self, identity: &str, _body: &Value) {
        let mapping = self.router.machine_map().await;
        match serde_json::to_vec(&mapping) {
            Ok(payload) => {
                if let Err(e) = self.router.send(identity, &payload).await {
                    error!("failed to reply machine map to {}: {}", identity, e);
                }
            }
            Err(e) => error!("failed to serialize machine map: {}", e),
        }
    }
}

impl MachineMapServer {
    pub fn new(router: Arc<SocketRouter>) -> Self {
        Self { router }
    }

    pub async fn run(&self) -> FabricResult<()> {
        let handler = Arc::new(MachineMapHandler {
            router: self.router.clone(),
        });
        self.router.start(Some(handler)).await
    }
}

/// 一次性成员发现客户端
///
/// 连接既定端点，发送一条自我通告心跳，等待恰好一条回复并
/// 解析为节点映射。一次发送一次接收，不是常驻循环。
pub struct MachineDiscovery {
    endpoint: String,
    routing_id: String,
}

impl MachineDiscovery {
    /// `endpoint` 形如 `host[:port]`
    pub fn new<E: Into<String>, R: Into<String>>(endpoint: E, routing_id: R) -> Self {
        Self {
            endpoint: endpoint.into(),
            routing_id: routing_id.into(),
        }
    }

    pub async fn get_known_machines(&self) -> FabricResult<MachineMapData> {
        let mut sock = DealerSocket::connect(&self.endpoint).await?;
        info!("socket connected to machine discovery service");

        let hello = DiscoveryHello {
            router_id: self.routing_id.clone(),
            healthy: Liveliness::Alive,
            status: MachineStatus::Ready,
        };
        sock.send(&serde_json::to_vec(&hello)?).await?;
        info!("heartbeat sent");

        match sock.recv().await? {
            Some(payload) => {
                let mapping: MachineMapData = serde_json::from_slice(&payload)?;
                info!("returning machine mapping to host");
                Ok(mapping)
            }
            None => Err(FabricError::network_error(
                "discovery endpoint closed before replying",
            )),
        }
    }
}
