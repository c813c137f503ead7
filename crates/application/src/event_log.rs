use crate::error::ApplicationError;
use domain::{EventRecord, NewEventRecord, RecordId, Username};
use serde::Serialize;

/// 某个作者发送的聊天消息数量
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorCount {
    pub username: Username,
    pub count: u64,
}

/// 按数量降序、同数量按名字升序排列
pub fn rank_authors(counts: &mut [AuthorCount]) {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.username.cmp(&b.username)));
}

/// 只追加的事件日志
///
/// 每次追加是原子的；不同追加之间不需要全局顺序锁，回放按时间戳排序，
/// 时间戳相同时按存储分配的 `RecordId` 排序。
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventLogStore: Send + Sync {
    async fn append(&self, record: NewEventRecord) -> Result<RecordId, ApplicationError>;

    /// 最近的 `limit` 条记录，最新的在前
    async fn query_recent(&self, limit: u32) -> Result<Vec<EventRecord>, ApplicationError>;

    /// 按作者统计聊天消息数量
    async fn count_chat_by_author(&self) -> Result<Vec<AuthorCount>, ApplicationError>;
}

/// 内存实现的事件日志（单实例部署与测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// 记录按 (created_at, id) 升序保存
    #[derive(Default)]
    pub struct MemoryEventLogStore {
        records: RwLock<Vec<EventRecord>>,
    }

    impl MemoryEventLogStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }
    }

    #[async_trait::async_trait]
    impl EventLogStore for MemoryEventLogStore {
        async fn append(&self, record: NewEventRecord) -> Result<RecordId, ApplicationError> {
            let mut records = self.records.write().await;
            let id = RecordId(records.len() as i64 + 1);
            // 按 (created_at, id) 保持有序，新记录的 id 总是最大
            let at = records.partition_point(|existing| existing.created_at <= record.created_at);
            records.insert(at, record.into_record(id));
            Ok(id)
        }

        async fn query_recent(&self, limit: u32) -> Result<Vec<EventRecord>, ApplicationError> {
            let records = self.records.read().await;
            Ok(records.iter().rev().take(limit as usize).cloned().collect())
        }

        async fn count_chat_by_author(&self) -> Result<Vec<AuthorCount>, ApplicationError> {
            let records = self.records.read().await;
            let mut counts: HashMap<&Username, u64> = HashMap::new();
            for record in records.iter().filter(|r| r.kind.is_chat()) {
                if let Some(author) = &record.author {
                    *counts.entry(author).or_default() += 1;
                }
            }
            let mut ranked: Vec<AuthorCount> = counts
                .into_iter()
                .map(|(username, count)| AuthorCount {
                    username: username.clone(),
                    count,
                })
                .collect();
            rank_authors(&mut ranked);
            Ok(ranked)
        }
    }

}
