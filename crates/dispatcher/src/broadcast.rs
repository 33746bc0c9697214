use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use fabric_domain::RouterConfig;
use fabric_errors::FabricResult;
use fabric_infrastructure::SimpleQueue;

use crate::router::{DispatchMode, MessageFormatter, SocketRouter};

const NAME: &str = "Broadcast Provider";
const BROADCAST_EVENT: &str = "broadcastEvent";

/// 广播器：分发模式固定为扇出的 socket 路由器
///
/// 入队的每个条目都会发给当前全部已知节点。
pub struct Broadcaster {
    pub router: Arc<SocketRouter>,
}

impl Broadcaster {
    pub async fn bind(port: u16, config: RouterConfig) -> FabricResult<Self> {
        let router =
            SocketRouter::bind(NAME, &format!("0.0.0.0:{port}"), BROADCAST_EVENT, config).await?;
        Ok(Self {
            router: Arc::new(router),
        })
    }

    pub fn queue(&self) -> Arc<SimpleQueue> {
        self.router.queue()
    }

    /// 挂载广播分发循环并进入接收循环
    pub async fn run(&self) -> FabricResult<()> {
        self.broadcast_queue_on();
        info!("broadcaster running on {}", self.router.local_addr());
        self.router.start(None).await
    }

    fn broadcast_queue_on(&self) {
        let formatter: MessageFormatter = Arc::new(|msg: &Value| msg.to_string());
        self.router
            .register_dispatch(formatter, DispatchMode::Broadcast);
    }
}
