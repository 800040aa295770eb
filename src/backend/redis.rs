//! Cache family on the `redis` driver
//!
//! Every handle owns one multiplexed connection; clones of it are cheap and
//! safe to use from concurrent callers. Commands are issued as raw `redis::cmd`
//! calls so the handle stays a thin pass-through.

use std::collections::HashMap;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use redis::Cmd;
use redis::FromRedisValue;
use redis::IntoConnectionInfo;
use redis::ToRedisArgs;
use tracing::debug;

use super::BackendHandle;
use super::Connector;
use super::TaggedRegistry;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackendError;
use crate::BackoffPolicy;
use crate::ConnectionConfig;
use crate::Error;
use crate::Result;
use crate::RoutingError;

pub type RedisRegistry = TaggedRegistry<RedisConnector>;

const SCAN_COUNT: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    type Handle = RedisHandle;

    /// Connects to `config.address` (a `redis://` URL) and verifies the
    /// connection with `PING`, retrying `config.retry` times. `database`, when
    /// set, selects the logical db index.
    async fn build(
        &self,
        config: &ConnectionConfig,
    ) -> Result<RedisHandle> {
        let connect_error = |e: redis::RedisError| BackendError::connect(&config.tag, &config.address, e);

        let mut info = config.address.as_str().into_connection_info().map_err(connect_error)?;
        if let Some(username) = &config.credentials.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &config.credentials.password {
            info.redis.password = Some(password.clone());
        }
        if let Some(database) = &config.database {
            info.redis.db = database.parse().map_err(|_| {
                Error::InvalidConfig(format!(
                    "redis connection {} has a non-numeric database {}",
                    config.tag, database
                ))
            })?;
        }

        let client = Client::open(info).map_err(connect_error)?;
        let timeout = config.timeout();

        let connect = || {
            let client = client.clone();
            async move {
                let mut connection = client
                    .get_multiplexed_async_connection_with_timeouts(timeout, timeout)
                    .await
                    .map_err(|e| Error::from(connect_error(e)))?;
                let _: String = redis::cmd("PING")
                    .query_async(&mut connection)
                    .await
                    .map_err(|e| Error::from(connect_error(e)))?;
                Ok(connection)
            }
        };
        let connection =
            task_with_timeout_and_exponential_backoff(connect, BackoffPolicy::for_connection(config.retry, timeout))
                .await?;

        debug!(tag = %config.tag, "redis connection verified");
        Ok(RedisHandle {
            config: config.clone(),
            connection: ArcSwapOption::from_pointee(connection),
        })
    }
}

/// One cache endpoint. After `close` every command fails with
/// `RoutingError::HandleClosed`.
pub struct RedisHandle {
    config: ConnectionConfig,
    connection: ArcSwapOption<MultiplexedConnection>,
}

impl RedisHandle {
    fn connection(&self) -> Result<MultiplexedConnection> {
        self.connection
            .load_full()
            .map(|connection| (*connection).clone())
            .ok_or_else(|| {
                RoutingError::HandleClosed {
                    tag: self.config.tag.clone(),
                }
                .into()
            })
    }

    /// Runs an arbitrary command on this endpoint
    pub async fn query<T: FromRedisValue>(
        &self,
        cmd: &Cmd,
    ) -> Result<T> {
        let mut connection = self.connection()?;
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| BackendError::transport(&self.config.tag, e).into())
    }

    /// `SET key value [PX ms]`
    pub async fn set<V: ToRedisArgs + Send + Sync>(
        &self,
        key: &str,
        value: V,
        expire: Option<Duration>,
    ) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(expire) = expire {
            cmd.arg("PX").arg(expire.as_millis() as u64);
        }
        self.query(&cmd).await
    }

    /// Value of `key` decoded as `T`, `None` when the key is missing
    pub async fn get<T: FromRedisValue>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    pub async fn exists(
        &self,
        key: &str,
    ) -> Result<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    /// Deletes `keys`, returning how many existed
    pub async fn del(
        &self,
        keys: &[&str],
    ) -> Result<usize> {
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    /// `PEXPIRE`; false when the key does not exist
    pub async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64))
            .await
    }

    /// Remaining time to live in milliseconds (-1 no expiry, -2 missing key)
    pub async fn pttl(
        &self,
        key: &str,
    ) -> Result<i64> {
        self.query(redis::cmd("PTTL").arg(key)).await
    }

    pub async fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    pub async fn hset<V: ToRedisArgs + Send + Sync>(
        &self,
        key: &str,
        field: &str,
        value: V,
    ) -> Result<()> {
        self.query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await
            .map(|_: usize| ())
    }

    pub async fn hdel(
        &self,
        key: &str,
        field: &str,
    ) -> Result<usize> {
        self.query(redis::cmd("HDEL").arg(key).arg(field)).await
    }

    pub async fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<usize> {
        self.query(redis::cmd("ZADD").arg(key).arg(score).arg(member))
            .await
    }

    /// Zero-based rank of `member`, `None` if absent
    pub async fn zrank(
        &self,
        key: &str,
        member: &str,
    ) -> Result<Option<usize>> {
        self.query(redis::cmd("ZRANK").arg(key).arg(member)).await
    }

    pub async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>> {
        self.query(redis::cmd("ZRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    pub async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.query(redis::cmd("ZRANGE").arg(key).arg(start).arg(stop).arg("WITHSCORES"))
            .await
    }

    pub async fn zrem(
        &self,
        key: &str,
        member: &str,
    ) -> Result<usize> {
        self.query(redis::cmd("ZREM").arg(key).arg(member)).await
    }

    /// Appends `value`, returning the new list length
    pub async fn rpush<V: ToRedisArgs + Send + Sync>(
        &self,
        key: &str,
        value: V,
    ) -> Result<usize> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    /// Blocking pop from the first non-empty list of `keys`.
    ///
    /// `timeout` must stay below the handle's response timeout or the call
    /// fails before the server answers.
    pub async fn blpop(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        self.query(redis::cmd("BLPOP").arg(keys).arg(timeout.as_secs_f64()))
            .await
    }

    pub async fn llen(
        &self,
        key: &str,
    ) -> Result<usize> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    pub async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    pub async fn keys(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>> {
        self.query(redis::cmd("KEYS").arg(pattern)).await
    }

    /// `MSET k1 v1 k2 v2 ...`
    pub async fn mset(
        &self,
        pairs: &[(&str, &str)],
    ) -> Result<()> {
        self.query(redis::cmd("MSET").arg(pairs)).await
    }

    /// Every key starting with `prefix`, found with `SCAN`, mapped (prefix
    /// stripped) to its string value. Keys that vanish between the scan and
    /// the read are skipped.
    pub async fn values_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<HashMap<String, String>> {
        let pattern = format!("{prefix}*");
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let values: Vec<Option<String>> = self.query(redis::cmd("MGET").arg(&keys)).await?;
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| {
                let value = value?;
                let stripped = key.strip_prefix(prefix).unwrap_or(&key).to_string();
                Some((stripped, value))
            })
            .collect())
    }
}

#[async_trait]
impl BackendHandle for RedisHandle {
    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.connection.load().is_none()
    }

    /// Drops this handle's connection; the driver closes it once the last
    /// in-flight clone finishes.
    async fn close(&self) -> Result<()> {
        if self.connection.swap(None).is_some() {
            debug!(tag = %self.config.tag, "redis connection released");
        }
        Ok(())
    }
}
