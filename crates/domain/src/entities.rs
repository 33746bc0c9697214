use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 节点忙闲状态，随节点入站消息中的 `status` 字段更新
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MachineStatus {
    Ready,
    Busy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Liveliness {
    Alive,
    Dead,
}

/// 任务生命周期，线上格式为带空格的展示字符串
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifeCycle {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Queue")]
    InQueue,
    #[serde(rename = "In Progress")]
    InProgress,
    Finished,
    Failed,
}

/// 已知节点的存活记录
///
/// 心跳任务的句柄由路由器单独持有，不随记录序列化，
/// 在拥有该记录的一侧本地重建。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineRecord {
    pub status: MachineStatus,
    pub validated: DateTime<Utc>,
    pub conn_attempts: u32,
}

impl MachineRecord {
    /// 首次收到某节点消息时创建的初始记录
    pub fn new() -> Self {
        Self {
            status: MachineStatus::Ready,
            validated: Utc::now(),
            conn_attempts: 0,
        }
    }

    /// 收到该节点任意消息时刷新：状态取载荷中的 `status`（缺省 Ready），
    /// 校验时间取当前时刻，连接尝试次数清零
    pub fn refresh(&mut self, status: Option<MachineStatus>) {
        self.status = status.unwrap_or(MachineStatus::Ready);
        self.validated = Utc::now();
        self.conn_attempts = 0;
    }

    /// 分发可选条件: 状态 Ready 且最近一次校验在新鲜度窗口内
    pub fn is_dispatch_eligible(&self, now: DateTime<Utc>, freshness_window_secs: i64) -> bool {
        if self.status != MachineStatus::Ready {
            return false;
        }
        (now - self.validated).num_seconds() <= freshness_window_secs
    }
}

impl Default for MachineRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// identity -> 存活记录，由单个路由器独占持有
pub type MachineMapData = HashMap<String, MachineRecord>;

/// 客户端请求进入工作队列时的内部包装
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_id: String,
    pub header: String,
    pub body: Value,
}

/// 回传给客户端的任务状态响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LivelinessResponse {
    pub node: String,
    pub job: String,
    pub message: Value,
    pub status: MachineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub life_cycle: Option<LifeCycle>,
}

/// 心跳探测载荷 `{ "heartbeat": true }`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatProbe {
    pub heartbeat: bool,
}

impl HeartbeatProbe {
    pub fn new() -> Self {
        Self { heartbeat: true }
    }
}

impl Default for HeartbeatProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// 节点发现时的自我通告消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryHello {
    pub router_id: String,
    pub healthy: Liveliness,
    pub status: MachineStatus,
}
