use thiserror::Error;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("消息编解码失败: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("发送失败: 节点 {identity} - {reason}")]
    Send { identity: String, reason: String },
    #[error("传输层错误: {0}")]
    Transport(#[from] std::io::Error),
    #[error("重试次数耗尽: 共尝试 {attempts} 次 - {source_message}")]
    ExhaustedRetries {
        attempts: u32,
        source_message: String,
    },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type FabricResult<T> = Result<T, FabricError>;

impl FabricError {
    pub fn send_failure<I: Into<String>, R: Into<String>>(identity: I, reason: R) -> Self {
        Self::Send {
            identity: identity.into(),
            reason: reason.into(),
        }
    }
    pub fn exhausted_retries<S: Into<String>>(attempts: u32, source_message: S) -> Self {
        Self::ExhaustedRetries {
            attempts,
            source_message: source_message.into(),
        }
    }
    pub fn serialization_error<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn network_error<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FabricError::Internal(_) | FabricError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FabricError::Send { .. } | FabricError::Transport(_) | FabricError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests;
