use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error};
use uuid::Uuid;

/// 链表节点，经 id 在查找表中索引
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueNode {
    pub id: String,
    pub next: Option<String>,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    elements: HashMap<String, QueueNode>,
    head: Option<String>,
    tail: Option<String>,
    length: usize,
}

/// 事件通知型 FIFO 队列
///
/// 链表套查找表的结构保证 O(1) 入队出队；每次成功入队后
/// 通知变更，由分发循环与兜底定时器共同消费。队列仅存于
/// 内存，进程重启即丢失。
#[derive(Debug)]
pub struct SimpleQueue {
    name: String,
    inner: RwLock<QueueInner>,
    notify: Notify,
}

impl SimpleQueue {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 入队：分配全新 id，尾部追加，随后发出变更通知
    pub async fn enqueue(&self, value: Value) {
        let timestamp = Utc::now();
        let id = format!("{}-{}", Uuid::new_v4().simple(), timestamp.to_rfc3339());

        {
            let mut inner = self.inner.write().await;
            let node = QueueNode {
                id: id.clone(),
                next: None,
                value,
                timestamp,
            };

            match inner.tail.take() {
                None => {
                    inner.head = Some(id.clone());
                    inner.tail = Some(id.clone());
                    inner.elements.insert(id.clone(), node);
                }
                Some(prev_id) => {
                    inner.tail = Some(id.clone());
                    inner.elements.insert(id.clone(), node);
                    if let Some(prev) = inner.elements.get_mut(&prev_id) {
                        prev.next = Some(id.clone());
                    } else {
                        error!("Queue '{}' tail {} missing from table", self.name, prev_id);
                    }
                }
            }

            inner.length += 1;
        }

        debug!("Enqueued {} on queue '{}'", id, self.name);
        self.notify.notify_one();
    }

    /// 出队：移除并返回队首的值，空队列返回 None
    pub async fn dequeue(&self) -> Option<Value> {
        let mut inner = self.inner.write().await;

        let head_id = inner.head.take()?;
        let node = inner.elements.remove(&head_id)?;

        inner.head = node.next.clone();
        if inner.head.is_none() {
            inner.tail = None;
        }
        inner.length -= 1;

        Some(node.value)
    }

    /// 返回最近入队（队尾）的值及其时间戳
    ///
    /// 与常见的"查看队首"语义相反，此处沿用既有行为：peek 看的是尾部。
    pub async fn peek(&self) -> Option<(Value, DateTime<Utc>)> {
        let inner = self.inner.read().await;
        let tail_id = inner.tail.as_ref()?;
        let node = inner.elements.get(tail_id)?;
        Some((node.value.clone(), node.timestamp))
    }

    /// id -> 节点表的只读快照
    pub async fn snapshot(&self) -> HashMap<String, QueueNode> {
        self.inner.read().await.elements.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.length
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.length == 0
    }

    /// 等待下一次变更通知
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// 诊断用：把当前全部节点以 pretty JSON 写进 debug 日志，不改动队列
    pub async fn debug_dump(&self) {
        let snapshot = self.snapshot().await;
        match serde_json::to_string_pretty(&snapshot) {
            Ok(dump) => debug!("Queue '{}' contents: {}", self.name, dump),
            Err(e) => error!("Failed to dump queue '{}': {}", self.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_and_length() {
        let queue = SimpleQueue::new("test");

        for i in 0..5 {
            queue.enqueue(json!({ "seq": i })).await;
        }
        assert_eq!(queue.len().await, 5);

        for i in 0..5 {
            let value = queue.dequeue().await.unwrap();
            assert_eq!(value["seq"], i);
        }
        assert_eq!(queue.len().await, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let queue = SimpleQueue::new("test");
        assert!(queue.dequeue().await.is_none());

        // 清空后再次入队出队仍然正常
        queue.enqueue(json!("a")).await;
        assert_eq!(queue.dequeue().await.unwrap(), json!("a"));
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_peek_returns_most_recent() {
        let queue = SimpleQueue::new("test");
        queue.enqueue(json!("first")).await;
        queue.enqueue(json!("second")).await;
        queue.enqueue(json!("third")).await;

        let (value, _) = queue.peek().await.unwrap();
        assert_eq!(value, json!("third"));

        // peek 不消费
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.dequeue().await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_length_tracks_table_size() {
        let queue = SimpleQueue::new("test");
        for i in 0..10 {
            queue.enqueue(json!(i)).await;
        }
        queue.dequeue().await;
        queue.dequeue().await;

        assert_eq!(queue.len().await, 8);
        assert_eq!(queue.snapshot().await.len(), 8);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_leak_mutation() {
        let queue = SimpleQueue::new("test");
        queue.enqueue(json!("keep")).await;

        let mut snapshot = queue.snapshot().await;
        snapshot.clear();

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_signals_change() {
        let queue = std::sync::Arc::new(SimpleQueue::new("test"));

        let waiter = queue.clone();
        let handle = tokio::spawn(async move {
            waiter.changed().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(json!("wake")).await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("change notification not delivered")
            .unwrap();
    }

    #[tokio::test]
    async fn test_debug_dump_leaves_queue_intact() {
        let queue = SimpleQueue::new("test");
        queue.enqueue(json!({ "job": 1 })).await;
        queue.enqueue(json!({ "job": 2 })).await;

        queue.debug_dump().await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.dequeue().await.unwrap(), json!({ "job": 1 }));
    }

    #[tokio::test]
    async fn test_interleaved_enqueue_dequeue() {
        let queue = SimpleQueue::new("test");
        queue.enqueue(json!(1)).await;
        queue.enqueue(json!(2)).await;
        assert_eq!(queue.dequeue().await.unwrap(), json!(1));

        queue.enqueue(json!(3)).await;
        assert_eq!(queue.dequeue().await.unwrap(), json!(2));
        assert_eq!(queue.dequeue().await.unwrap(), json!(3));
        assert!(queue.dequeue().await.is_none());

        // head/tail 指针在清空后复位
        queue.enqueue(json!(4)).await;
        let (value, _) = queue.peek().await.unwrap();
        assert_eq!(value, json!(4));
        assert_eq!(queue.dequeue().await.unwrap(), json!(4));
    }
}
