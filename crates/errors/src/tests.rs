use super::*;

#[test]
fn test_send_failure_display() {
    let err = FabricError::send_failure("peer-1", "connection closed");
    assert_eq!(err.to_string(), "发送失败: 节点 peer-1 - connection closed");
    assert!(err.is_retryable());
    assert!(!err.is_fatal());
}

#[test]
fn test_exhausted_retries_display() {
    let err = FabricError::exhausted_retries(3, "HTTP 503");
    assert_eq!(err.to_string(), "重试次数耗尽: 共尝试 3 次 - HTTP 503");
    assert!(!err.is_retryable());
}

#[test]
fn test_decode_from_serde_json() {
    let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err: FabricError = parse_err.into();
    assert!(matches!(err, FabricError::Decode(_)));
}

#[test]
fn test_fatal_classification() {
    assert!(FabricError::Internal("boom".to_string()).is_fatal());
    assert!(FabricError::config_error("bad port").is_fatal());
    assert!(!FabricError::network_error("refused").is_fatal());
}
