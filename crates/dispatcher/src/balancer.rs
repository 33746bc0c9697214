use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use fabric_domain::{
    BalancerConfig, JobEnvelope, LifeCycle, LivelinessResponse, MachineStatus,
};
use fabric_errors::FabricResult;
use fabric_infrastructure::SimpleQueue;

use crate::router::{DispatchMode, InboundHandler, MessageFormatter, SocketRouter};

const NAME: &str = "Load Balancer";
const CLIENT_EVENT: &str = "clientEvent";
const WORKER_EVENT: &str = "workerEvent";

/// 自定义负载均衡器
///
/// 前后端各一个路由 socket：前端面向客户端收取任务请求，
/// 后端面向 worker 分发。客户端请求入队后立即回执一条
/// In Queue 状态，worker 的响应经客户端队列随机路由回去。
/// 两侧队列均为单点随机分发模式。
pub struct LoadBalancer {
    address: String,
    pub client: Arc<SocketRouter>,
    pub worker: Arc<SocketRouter>,
}

struct ClientInboundHandler {
    address: String,
    client_queue: Arc<SimpleQueue>,
    worker_queue: Arc<SimpleQueue>,
}

#[async_trait]
impl InboundHandler for ClientInboundHandler {
    async fn handle(&self, identity: &str, body: &Value) {
        // 任务标识取载荷的 message 字段，兼容直接给出 jobId 的客户端
        let job_id = body
            .get("message")
            .or_else(|| body.get("jobId"))
            .and_then(|v| v.as_str());
        let Some(job_id) = job_id else {
            debug!("client message from {} carries no job id, ignored", identity);
            return;
        };

        let envelope = JobEnvelope {
            job_id: job_id.to_string(),
            header: identity.to_string(),
            body: body.clone(),
        };

        let ack = LivelinessResponse {
            node: self.address.clone(),
            job: job_id.to_string(),
            message: body.clone(),
            status: MachineStatus::Ready,
            life_cycle: Some(LifeCycle::InQueue),
        };

        match serde_json::to_value(&envelope) {
            Ok(envelope_value) => {
                self.client_queue.enqueue(json!({ "body": ack })).await;
                self.worker_queue.enqueue(envelope_value).await;
                info!("job {} accepted from client {}", job_id, identity);
            }
            Err(e) => error!("failed to encode job envelope for {}: {}", job_id, e),
        }
    }
}

struct WorkerInboundHandler {
    client_queue: Arc<SimpleQueue>,
}

#[async_trait]
impl InboundHandler for WorkerInboundHandler {
    async fn handle(&self, identity: &str, body: &Value) {
        if body.get("job").is_none() {
            debug!("worker message from {} carries no job field, ignored", identity);
            return;
        }

        self.client_queue.enqueue(json!({ "body": body })).await;
    }
}

impl LoadBalancer {
    pub async fn bind(config: BalancerConfig) -> FabricResult<Self> {
        let client = SocketRouter::bind(
            NAME,
            &format!("0.0.0.0:{}", config.client_port),
            CLIENT_EVENT,
            config.router.clone(),
        )
        .await?;
        let worker = SocketRouter::bind(
            NAME,
            &format!("0.0.0.0:{}", config.worker_port),
            WORKER_EVENT,
            config.router,
        )
        .await?;

        Ok(Self {
            address: config.address,
            client: Arc::new(client),
            worker: Arc::new(worker),
        })
    }

    /// 挂载两侧队列的分发循环并启动前后端路由
    pub async fn run(&self) -> FabricResult<()> {
        self.worker_queue_on();
        self.client_queue_on();

        let client = self.client.clone();
        let client_handler = self.client_handler();
        tokio::spawn(async move {
            if let Err(e) = client.start(Some(client_handler)).await {
                error!("client router stopped: {}", e);
            }
        });

        let worker = self.worker.clone();
        let worker_handler = self.worker_handler();
        tokio::spawn(async move {
            if let Err(e) = worker.start(Some(worker_handler)).await {
                error!("worker router stopped: {}", e);
            }
        });

        info!(
            "load balancer running, client on {}, worker on {}",
            self.client.local_addr(),
            self.worker.local_addr()
        );
        Ok(())
    }

    /// 前端路由：收取客户端请求，回执入队并转入工作管线
    pub async fn start_client_router(&self) -> FabricResult<()> {
        self.client.start(Some(self.client_handler())).await
    }

    /// 后端路由：收取 worker 响应并路由回客户端队列
    pub async fn start_worker_router(&self) -> FabricResult<()> {
        self.worker.start(Some(self.worker_handler())).await
    }

    /// 工作队列分发：随机分给一个可用 worker，发送 envelope 的 body
    pub fn worker_queue_on(&self) {
        let formatter: MessageFormatter = Arc::new(|msg: &Value| match msg.get("body") {
            Some(body) => body.to_string(),
            None => msg.to_string(),
        });
        self.worker.register_dispatch(formatter, DispatchMode::Single);
    }

    /// 客户端队列分发：随机分给一个可用客户端，发送整个条目
    pub fn client_queue_on(&self) {
        let formatter: MessageFormatter = Arc::new(|msg: &Value| msg.to_string());
        self.client.register_dispatch(formatter, DispatchMode::Single);
    }

    fn client_handler(&self) -> Arc<dyn InboundHandler> {
        Arc::new(ClientInboundHandler {
            address: self.address.clone(),
            client_queue: self.client.queue(),
            worker_queue: self.worker.queue(),
        })
    }

    fn worker_handler(&self) -> Arc<dyn InboundHandler> {
        Arc::new(WorkerInboundHandler {
            client_queue: self.client.queue(),
        })
    }
}
