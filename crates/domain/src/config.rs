use serde::{Deserialize, Serialize};

/// 单个 socket 路由器的运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// 心跳任务启动前的固定延迟（秒）
    pub startup_delay_secs: u64,
    /// 心跳重试上限，超过后节点被驱逐
    pub max_retries: u32,
    /// 指数退避的基础超时（毫秒）
    pub base_timeout_ms: u64,
    /// 首次心跳后的基础间隔（秒）
    pub base_interval_secs: u64,
    /// 分发可选节点的新鲜度窗口（秒）
    pub freshness_window_secs: i64,
    /// 分发轮询定时器间隔（毫秒），兜底队列通知
    pub dispatch_poll_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 45,
            max_retries: 5,
            base_timeout_ms: 500,
            base_interval_secs: 30,
            freshness_window_secs: 30,
            dispatch_poll_interval_ms: 1000,
        }
    }
}

/// 负载均衡器配置：前后端两个路由端口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// 对外通告的本机地址
    pub address: String,
    pub client_port: u16,
    pub worker_port: u16,
    pub router: RouterConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            client_port: 8765,
            worker_port: 8766,
            router: RouterConfig::default(),
        }
    }
}
