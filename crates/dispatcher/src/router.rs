use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use fabric_domain::{
    HeartbeatProbe, MachineMapData, MachineRecord, MachineStatus, RouterConfig,
};
use fabric_errors::FabricResult;
use fabric_infrastructure::{RouterSocket, SimpleQueue};

/// 出队条目发送前的格式化回调
pub type MessageFormatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// 发送给从可选池中均匀随机挑出的一个节点
    Single,
    /// 扇出给全部已知节点
    Broadcast,
}

/// 入站消息处理回调，在存活记录更新之后调用
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, identity: &str, body: &Value);
}

/// socket 路由器
///
/// 持有一个网络端点、已知节点的存活映射、一个出站队列，
/// 以及心跳与分发逻辑。存活映射由本路由器独占，
/// 仅被其自身的协作任务修改。
pub struct SocketRouter {
    name: String,
    socket: Arc<RouterSocket>,
    queue: Arc<SimpleQueue>,
    machines: Arc<RwLock<MachineMapData>>,
    heartbeat_tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    heartbeat_enabled: Arc<AtomicBool>,
    config: RouterConfig,
}

impl SocketRouter {
    /// 绑定端点并初始化路由器状态，接收循环由 `start` 驱动
    pub async fn bind(
        name: &str,
        addr: &str,
        queue_name: &str,
        config: RouterConfig,
    ) -> FabricResult<Self> {
        let socket = RouterSocket::bind(addr).await?;
        info!("{}: router listening on {}", name, socket.local_addr());

        Ok(Self {
            name: name.to_string(),
            socket: Arc::new(socket),
            queue: Arc::new(SimpleQueue::new(queue_name)),
            machines: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_tasks: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_enabled: Arc::new(AtomicBool::new(true)),
            config,
        })
    }

    pub fn queue(&self) -> Arc<SimpleQueue> {
        self.queue.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn routing_id(&self) -> &str {
        self.socket.routing_id()
    }

    /// 暂停或恢复全部心跳循环
    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.heartbeat_enabled.store(enabled, Ordering::Relaxed);
    }

    /// 以发现服务返回的映射为起点填充存活记录
    pub async fn set_machine_map(&self, mapping: MachineMapData) {
        let mut machines = self.machines.write().await;
        *machines = mapping;
    }

    /// 存活映射的只读快照
    pub async fn machine_map(&self) -> MachineMapData {
        self.machines.read().await.clone()
    }

    /// 仍在运行的心跳任务对应的 identity
    pub async fn active_heartbeats(&self) -> Vec<String> {
        self.heartbeat_tasks.read().await.keys().cloned().collect()
    }

    /// 直接发送载荷到指定节点
    pub async fn send(&self, identity: &str, payload: &[u8]) -> FabricResult<()> {
        self.socket.send(identity, payload).await
    }

    /// 接收循环：更新存活记录、为新节点拉起心跳任务、调用处理回调
    ///
    /// 载荷解析失败只记录并跳过，循环永不因坏消息终止。
    pub async fn start(&self, handler: Option<Arc<dyn InboundHandler>>) -> FabricResult<()> {
        info!("{}: receive loop started", self.name);

        while let Some((identity, payload)) = self.socket.recv().await {
            let body: Value = match serde_json::from_slice(&payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!("{}: dropping undecodable frame from {}: {}", self.name, identity, e);
                    continue;
                }
            };
            debug!("{}: inbound from {}: {}", self.name, identity, body);

            let is_new = self.upsert_machine(&identity, &body).await;
            if is_new {
                self.spawn_heartbeat(identity.clone()).await;
            }

            if let Some(handler) = &handler {
                handler.handle(&identity, &body).await;
            }
        }

        warn!("{}: receive loop ended, transport closed", self.name);
        Ok(())
    }

    /// 订阅队列变更通知并附加周期定时器兜底积压，二者唤醒同一分发循环
    ///
    /// 每次唤醒处理一个条目：条目先出队、再构建目标池；池为空时
    /// 条目已被消费，仅告警（有损行为，沿用既有设计）。
    pub fn register_dispatch(&self, formatter: MessageFormatter, mode: DispatchMode) -> JoinHandle<()> {
        let name = self.name.clone();
        let queue = self.queue.clone();
        let socket = self.socket.clone();
        let machines = self.machines.clone();
        let freshness = self.config.freshness_window_secs;
        let poll = Duration::from_millis(self.config.dispatch_poll_interval_ms);

        tokio::spawn(async move {
            let mut ticker = interval(poll);
            loop {
                tokio::select! {
                    _ = queue.changed() => {}
                    _ = ticker.tick() => {}
                }

                if queue.is_empty().await {
                    continue;
                }

                dispatch_one(&name, &socket, &machines, &queue, &formatter, mode, freshness)
                    .await;
            }
        })
    }

    async fn upsert_machine(&self, identity: &str, body: &Value) -> bool {
        let mut machines = self.machines.write().await;
        match machines.entry(identity.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(MachineRecord::new());
                info!("{}: discovered machine {}", self.name, identity);
                true
            }
            Entry::Occupied(mut occupied) => {
                let status = body
                    .get("status")
                    .and_then(|s| serde_json::from_value::<MachineStatus>(s.clone()).ok());
                occupied.get_mut().refresh(status);
                false
            }
        }
    }

    async fn spawn_heartbeat(&self, identity: String) {
        let name = self.name.clone();
        let socket = self.socket.clone();
        let machines = self.machines.clone();
        let heartbeat_tasks = self.heartbeat_tasks.clone();
        let enabled = self.heartbeat_enabled.clone();
        let config = self.config.clone();

        // 先持锁再 spawn：任务退出时的句柄清理一定发生在登记之后
        let mut tasks = self.heartbeat_tasks.write().await;
        let task_identity = identity.clone();
        let handle = tokio::spawn(async move {
            heartbeat_loop(
                name,
                task_identity,
                socket,
                machines,
                heartbeat_tasks,
                enabled,
                config,
            )
            .await;
        });
        tasks.insert(identity, handle);
    }
}

impl Drop for SocketRouter {
    fn drop(&mut self) {
        // 路由器销毁时一并收掉仍在休眠的心跳任务
        if let Ok(mut tasks) = self.heartbeat_tasks.try_write() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

/// 单个节点的心跳循环
///
/// 固定的启动延迟之后反复探测；收不到回应时尝试次数按指数
/// 退避递增，超过上限即从存活映射中驱逐并自行终止。
/// 尝试次数在收到该节点任何入站消息时由接收循环清零。
async fn heartbeat_loop(
    name: String,
    identity: String,
    socket: Arc<RouterSocket>,
    machines: Arc<RwLock<MachineMapData>>,
    heartbeat_tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    enabled: Arc<AtomicBool>,
    config: RouterConfig,
) {
    info!("{}: sleep on startup for {}s", name, config.startup_delay_secs);
    sleep(Duration::from_secs(config.startup_delay_secs)).await;
    info!("{}: begin heartbeating for machine {}", name, identity);

    enum Step {
        Gone,
        Evict,
        Probe { prev_attempts: u32 },
    }

    let probe = match serde_json::to_vec(&HeartbeatProbe::new()) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("{}: failed to encode heartbeat probe: {}", name, e);
            return;
        }
    };

    loop {
        if !enabled.load(Ordering::Relaxed) {
            sleep(Duration::from_millis(config.base_timeout_ms)).await;
            continue;
        }

        // 读取-判定-递增在同一把写锁内完成，避免与接收循环的清零交错
        let step = {
            let mut map = machines.write().await;
            match map.get_mut(&identity) {
                None => Step::Gone,
                Some(record) if record.conn_attempts > config.max_retries => {
                    map.remove(&identity);
                    Step::Evict
                }
                Some(record) => {
                    let prev_attempts = record.conn_attempts;
                    record.conn_attempts = prev_attempts + 1;
                    Step::Probe { prev_attempts }
                }
            }
        };

        match step {
            Step::Gone => {
                debug!("{}: machine {} already removed, stopping heartbeat", name, identity);
                heartbeat_tasks.write().await.remove(&identity);
                break;
            }
            Step::Evict => {
                info!("{}: removing machine with id {}", name, identity);
                heartbeat_tasks.write().await.remove(&identity);
                break;
            }
            Step::Probe { prev_attempts } => {
                if let Err(e) = socket.send(&identity, &probe).await {
                    warn!("{}: heartbeat send to {} failed: {}", name, identity, e);
                }

                let delay = if prev_attempts == 0 {
                    Duration::from_secs(config.base_interval_secs)
                } else {
                    Duration::from_millis(2u64.pow(prev_attempts) * config.base_timeout_ms)
                };
                sleep(delay).await;
            }
        }
    }
}

async fn dispatch_one(
    name: &str,
    socket: &Arc<RouterSocket>,
    machines: &Arc<RwLock<MachineMapData>>,
    queue: &Arc<SimpleQueue>,
    formatter: &MessageFormatter,
    mode: DispatchMode,
    freshness_window_secs: i64,
) {
    // 先出队再选目标：找不到目标时条目已经被消费
    let Some(item) = queue.dequeue().await else {
        return;
    };
    let payload = formatter(&item);

    match mode {
        DispatchMode::Broadcast => {
            let targets: Vec<String> = machines.read().await.keys().cloned().collect();
            if targets.is_empty() {
                warn!("{}: waiting for available machines, dropped queued item", name);
                return;
            }

            for target in &targets {
                if let Err(e) = socket.send(target, payload.as_bytes()).await {
                    warn!("{}: broadcast to {} failed: {}", name, target, e);
                }
            }
            debug!("{}: broadcast item to {} machines", name, targets.len());
        }
        DispatchMode::Single => {
            // 选择时现场构建可选池，再均匀随机取下标
            let now = Utc::now();
            let pool: Vec<String> = machines
                .read()
                .await
                .iter()
                .filter(|(_, record)| record.is_dispatch_eligible(now, freshness_window_secs))
                .map(|(identity, _)| identity.clone())
                .collect();

            if pool.is_empty() {
                warn!("{}: waiting for available machines, dropped queued item", name);
                return;
            }

            let index = rand::random_range(0..pool.len());
            let target = &pool[index];
            debug!("{}: dispatching to {} ({} eligible)", name, target, pool.len());

            if let Err(e) = socket.send(target, payload.as_bytes()).await {
                warn!("{}: dispatch to {} failed: {}", name, target, e);
            }
        }
    }
}
