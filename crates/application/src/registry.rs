use crate::error::ApplicationError;
use domain::Username;

/// 在线用户注册表
///
/// 可在多个服务实例间共享。`try_insert` 必须是单个原子的"检查并加入"操作，
/// 两个会话同时抢占同一个显示名时只有一个能成功。
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 名字不存在时加入并返回 `true`，已存在返回 `false`
    async fn try_insert(&self, name: &Username) -> Result<bool, ApplicationError>;

    async fn remove(&self, name: &Username) -> Result<(), ApplicationError>;

    /// 按加入顺序列出所有在线名字
    async fn list_all(&self) -> Result<Vec<Username>, ApplicationError>;
}

/// 正在输入集合及其版本号
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingSnapshot {
    /// 集合每变化一次加一
    pub revision: u64,
    /// 按开始输入的顺序排列
    pub names: Vec<Username>,
}

/// 正在输入的显示名集合
///
/// 与在线注册表一样可在实例间共享，集合变化时版本号递增，
/// `snapshot` 原子地返回集合与对应的版本号。
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TypingRegistry: Send + Sync {
    /// 加入集合，返回集合是否变化
    async fn mark(&self, name: &Username) -> Result<bool, ApplicationError>;

    /// 移出集合，返回集合是否变化
    async fn unmark(&self, name: &Username) -> Result<bool, ApplicationError>;

    async fn snapshot(&self) -> Result<TypingSnapshot, ApplicationError>;
}

/// 内存实现的在线用户注册表与正在输入集合（单实例部署与测试）
pub mod memory {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryPresenceRegistry {
        names: Mutex<Vec<Username>>,
    }

    impl MemoryPresenceRegistry {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        async fn try_insert(&self, name: &Username) -> Result<bool, ApplicationError> {
            let mut names = self.names.lock().await;
            if names.contains(name) {
                return Ok(false);
            }
            names.push(name.clone());
            Ok(true)
        }

        async fn remove(&self, name: &Username) -> Result<(), ApplicationError> {
            let mut names = self.names.lock().await;
            names.retain(|existing| existing != name);
            Ok(())
        }

        async fn list_all(&self) -> Result<Vec<Username>, ApplicationError> {
            Ok(self.names.lock().await.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryTypingRegistry {
        typing: Mutex<TypingSnapshot>,
    }

    impl MemoryTypingRegistry {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl TypingRegistry for MemoryTypingRegistry {
        async fn mark(&self, name: &Username) -> Result<bool, ApplicationError> {
            let mut typing = self.typing.lock().await;
            if typing.names.contains(name) {
                return Ok(false);
            }
            typing.names.push(name.clone());
            typing.revision += 1;
            Ok(true)
        }

        async fn unmark(&self, name: &Username) -> Result<bool, ApplicationError> {
            let mut typing = self.typing.lock().await;
            let before = typing.names.len();
            typing.names.retain(|existing| existing != name);
            if typing.names.len() == before {
                return Ok(false);
            }
            typing.revision += 1;
            Ok(true)
        }

        async fn snapshot(&self) -> Result<TypingSnapshot, ApplicationError> {
            Ok(self.typing.lock().await.clone())
        }
    }

}
