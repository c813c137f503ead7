//! Redis 实现的在线用户注册表与正在输入集合
//!
//! 两个集合都是以加入时间（微秒）为分数的有序集合，`ZRANGE` 即按加入顺序列出。
//! 每个成员在配套的哈希里记下所属实例。实例定期续约自己的心跳键，
//! 心跳已过期的实例留下的成员由仍在运行的实例清除。

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use application::{ApplicationError, PresenceRegistry, TypingRegistry, TypingSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use domain::Username;
use redis::{aio::ConnectionManager, RedisResult, Script};
use uuid::Uuid;

fn map_redis_err(operation: &'static str) -> impl Fn(redis::RedisError) -> ApplicationError {
    move |err| ApplicationError::store_unavailable(operation, format!("redis: {err}"))
}

// KEYS: members, owners, revision  ARGV: score, name, instance
const CLAIM: &str = r"
if redis.call('ZADD', KEYS[1], 'NX', ARGV[1], ARGV[2]) == 1 then
  redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
  redis.call('INCR', KEYS[3])
  return 1
end
return 0
";

// KEYS: members, owners, revision  ARGV: name
const RELEASE: &str = r"
redis.call('HDEL', KEYS[2], ARGV[1])
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('INCR', KEYS[3])
  return 1
end
return 0
";

// KEYS: members, owners, revision  ARGV: name, expected owner ('' = none)
const PURGE: &str = r"
local owner = redis.call('HGET', KEYS[2], ARGV[1])
if (owner or '') ~= ARGV[2] then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('INCR', KEYS[3])
  return 1
end
return 0
";

/// 带归属实例的有序集合
#[derive(Debug, Clone)]
struct OwnedSet {
    members: String,
    owners: String,
    revision: String,
}

impl OwnedSet {
    fn new(key: &str) -> Self {
        Self {
            members: key.to_owned(),
            owners: format!("{key}:owners"),
            revision: format!("{key}:revision"),
        }
    }
}

struct Shared {
    connection: ConnectionManager,
    instance: String,
    heartbeat_prefix: String,
    lease: Duration,
    names: OwnedSet,
    typing: OwnedSet,
    claim: Script,
    release: Script,
    purge: Script,
}

impl Shared {
    fn heartbeat_key(&self, instance: &str) -> String {
        format!("{}{instance}", self.heartbeat_prefix)
    }

    async fn renew(&self) -> RedisResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.heartbeat_key(&self.instance))
            .arg(Utc::now().timestamp_millis())
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim(&self, set: &OwnedSet, name: &Username) -> RedisResult<bool> {
        let mut conn = self.connection.clone();
        let added: i64 = self
            .claim
            .key(&set.members)
            .key(&set.owners)
            .key(&set.revision)
            .arg(Utc::now().timestamp_micros())
            .arg(name.as_str())
            .arg(&self.instance)
            .invoke_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn release(&self, set: &OwnedSet, name: &Username) -> RedisResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .release
            .key(&set.members)
            .key(&set.owners)
            .key(&set.revision)
            .arg(name.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn members(&self, set: &OwnedSet) -> RedisResult<(Vec<String>, u64)> {
        let mut conn = self.connection.clone();
        let (members, revision): (Vec<String>, Option<u64>) = redis::pipe()
            .atomic()
            .cmd("ZRANGE")
            .arg(&set.members)
            .arg(0)
            .arg(-1)
            .cmd("GET")
            .arg(&set.revision)
            .query_async(&mut conn)
            .await?;
        Ok((members, revision.unwrap_or_default()))
    }

    fn parse_members(&self, set: &OwnedSet, members: Vec<String>) -> Vec<Username> {
        members
            .into_iter()
            .filter_map(|member| match Username::parse(member.as_str()) {
                Ok(name) => Some(name),
                Err(err) => {
                    tracing::warn!(key = %set.members, member = %member, error = %err, "ignoring invalid registry entry");
                    None
                }
            })
            .collect()
    }

    /// 清除心跳已过期（或没有记录归属）的实例留下的成员，返回清除数量
    async fn sweep(&self) -> RedisResult<usize> {
        let mut conn = self.connection.clone();
        let mut alive: HashMap<String, bool> = HashMap::new();
        let mut purged = 0;

        for set in [&self.names, &self.typing] {
            let members: Vec<String> = redis::cmd("ZRANGE")
                .arg(&set.members)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await?;
            let owners: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(&set.owners)
                .query_async(&mut conn)
                .await?;

            for member in members {
                let owner = owners.get(&member).cloned().unwrap_or_default();
                if owner == self.instance {
                    continue;
                }
                let live = if let Some(live) = alive.get(&owner).copied() {
                    live
                } else {
                    let mut live = false;
                    if !owner.is_empty() {
                        live = redis::cmd("EXISTS")
                            .arg(self.heartbeat_key(&owner))
                            .query_async(&mut conn)
                            .await?;
                    }
                    alive.insert(owner.clone(), live);
                    live
                };
                if live {
                    continue;
                }

                let removed: i64 = self
                    .purge
                    .key(&set.members)
                    .key(&set.owners)
                    .key(&set.revision)
                    .arg(&member)
                    .arg(&owner)
                    .invoke_async(&mut conn)
                    .await?;
                if removed == 1 {
                    tracing::info!(key = %set.members, %member, %owner, "purged entry of expired instance");
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }
}

/// 定期续约心跳并清理失效实例；注册表全部释放后退出
async fn maintain(shared: Weak<Shared>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Err(err) = shared.renew().await {
            tracing::warn!(instance = %shared.instance, error = %err, "failed to renew presence lease");
            continue;
        }
        if let Err(err) = shared.sweep().await {
            tracing::warn!(instance = %shared.instance, error = %err, "presence sweep failed");
        }
    }
}

/// 在线用户注册表
#[derive(Clone)]
pub struct RedisPresenceRegistry {
    shared: Arc<Shared>,
}

impl RedisPresenceRegistry {
    /// 以新的实例标识写入心跳，清理失效实例留下的名字，并启动定期续约。
    ///
    /// `lease` 是心跳的有效期；续约间隔为它的三分之一。
    pub async fn start(
        connection: ConnectionManager,
        key: &str,
        typing_key: &str,
        lease: Duration,
    ) -> RedisResult<Self> {
        let shared = Arc::new(Shared {
            connection,
            instance: Uuid::new_v4().to_string(),
            heartbeat_prefix: format!("{key}:instance:"),
            lease,
            names: OwnedSet::new(key),
            typing: OwnedSet::new(typing_key),
            claim: Script::new(CLAIM),
            release: Script::new(RELEASE),
            purge: Script::new(PURGE),
        });

        shared.renew().await?;
        let purged = shared.sweep().await?;
        tracing::info!(instance = %shared.instance, %key, purged, "presence lease acquired");

        let every = (lease / 3).max(Duration::from_millis(100));
        tokio::spawn(maintain(Arc::downgrade(&shared), every));
        Ok(Self { shared })
    }

    /// 共享本实例心跳的正在输入集合
    pub fn typing(&self) -> RedisTypingRegistry {
        RedisTypingRegistry {
            shared: self.shared.clone(),
        }
    }

    /// 立即执行一次清理
    pub async fn sweep(&self) -> Result<usize, ApplicationError> {
        self.shared
            .sweep()
            .await
            .map_err(map_redis_err("registry.sweep"))
    }
}

#[async_trait]
impl PresenceRegistry for RedisPresenceRegistry {
    async fn try_insert(&self, name: &Username) -> Result<bool, ApplicationError> {
        // ZADD NX 与归属记录在同一个脚本里完成
        self.shared
            .claim(&self.shared.names, name)
            .await
            .map_err(map_redis_err("registry.try_insert"))
    }

    async fn remove(&self, name: &Username) -> Result<(), ApplicationError> {
        self.shared
            .release(&self.shared.names, name)
            .await
            .map_err(map_redis_err("registry.remove"))?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Username>, ApplicationError> {
        let (members, _) = self
            .shared
            .members(&self.shared.names)
            .await
            .map_err(map_redis_err("registry.list_all"))?;
        Ok(self.shared.parse_members(&self.shared.names, members))
    }
}

/// 正在输入集合，集合变化时递增版本号
#[derive(Clone)]
pub struct RedisTypingRegistry {
    shared: Arc<Shared>,
}

#[async_trait]
impl TypingRegistry for RedisTypingRegistry {
    async fn mark(&self, name: &Username) -> Result<bool, ApplicationError> {
        self.shared
            .claim(&self.shared.typing, name)
            .await
            .map_err(map_redis_err("typing.mark"))
    }

    async fn unmark(&self, name: &Username) -> Result<bool, ApplicationError> {
        self.shared
            .release(&self.shared.typing, name)
            .await
            .map_err(map_redis_err("typing.unmark"))
    }

    async fn snapshot(&self) -> Result<TypingSnapshot, ApplicationError> {
        let (members, revision) = self
            .shared
            .members(&self.shared.typing)
            .await
            .map_err(map_redis_err("typing.snapshot"))?;
        Ok(TypingSnapshot {
            revision,
            names: self.shared.parse_members(&self.shared.typing, members),
        })
    }
}
