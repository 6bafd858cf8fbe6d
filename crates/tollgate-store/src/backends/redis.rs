//! Redis store backend
//!
//! Batches are sent as `MULTI/EXEC` pipelines so multi-key sequences such as
//! "delete the live record, then read its tombstone" can never interleave
//! with a concurrent client.

use crate::{Batch, SessionBackend, StoreCommand, StoreConfig, StoreError, StoreReply, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Redis session backend
pub struct RedisBackend {
    connection: ConnectionManager,
    config: StoreConfig,
}

impl RedisBackend {
    /// Connect using the given configuration
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.redis_url.as_str()).map_err(|e| {
            StoreError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let connect = ConnectionManager::new(client);
        let mut connection = tokio::time::timeout(config.connection_timeout, connect)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        // Ping to verify connection
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Redis ping failed: {}", e)))?;

        debug!("Redis connection established successfully");

        Ok(Self { connection, config })
    }

    /// Connect to a Redis URL with default settings
    pub async fn from_url<S: Into<String>>(url: S) -> StoreResult<Self> {
        let config = StoreConfig::builder().redis_url(url).build();
        Self::new(config).await
    }

    /// Format key with optional prefix
    fn format_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn to_cmd(&self, command: &StoreCommand) -> Cmd {
        let key = self.format_key(command.key());
        match command {
            StoreCommand::Get(_) => {
                let mut cmd = redis::cmd("GET");
                cmd.arg(key);
                cmd
            }
            StoreCommand::Set { value, ttl, .. } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value);
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(millis(*ttl));
                }
                cmd
            }
            StoreCommand::SetIfAbsent { value, ttl, .. } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value).arg("NX");
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(millis(*ttl));
                }
                cmd
            }
            StoreCommand::Delete(_) => {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(key);
                cmd
            }
            StoreCommand::Increment(_) => {
                let mut cmd = redis::cmd("INCR");
                cmd.arg(key);
                cmd
            }
            StoreCommand::Expire { ttl, .. } => {
                let mut cmd = redis::cmd("PEXPIRE");
                cmd.arg(key).arg(millis(*ttl));
                cmd
            }
            StoreCommand::Ttl(_) => {
                let mut cmd = redis::cmd("TTL");
                cmd.arg(key);
                cmd
            }
            StoreCommand::Exists(_) => {
                let mut cmd = redis::cmd("EXISTS");
                cmd.arg(key);
                cmd
            }
            StoreCommand::SetAdd { member, .. } => {
                let mut cmd = redis::cmd("SADD");
                cmd.arg(key).arg(member);
                cmd
            }
            StoreCommand::SetRemove { member, .. } => {
                let mut cmd = redis::cmd("SREM");
                cmd.arg(key).arg(member);
                cmd
            }
            StoreCommand::SetMembers(_) => {
                let mut cmd = redis::cmd("SMEMBERS");
                cmd.arg(key);
                cmd
            }
        }
    }

    async fn with_timeout<F, R>(&self, operation: F) -> StoreResult<R>
    where
        F: std::future::Future<Output = redis::RedisResult<R>>,
    {
        tokio::time::timeout(self.config.command_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Backend(format!("Redis operation failed: {}", e)))
    }
}

fn millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry
    (ttl.as_millis() as u64).max(1)
}

/// Translate a raw Redis value into the reply shape of the command
fn decode_reply(command: &StoreCommand, value: Value) -> StoreResult<StoreReply> {
    let unexpected = |value: &Value| {
        StoreError::UnexpectedReply(format!("{} returned {:?}", command.name(), value))
    };

    match command {
        StoreCommand::Get(_) => match value {
            Value::Nil => Ok(StoreReply::Nil),
            Value::Data(bytes) => String::from_utf8(bytes)
                .map(StoreReply::Text)
                .map_err(|e| StoreError::UnexpectedReply(e.to_string())),
            Value::Status(text) => Ok(StoreReply::Text(text)),
            other => Err(unexpected(&other)),
        },
        StoreCommand::Set { .. } => match value {
            Value::Okay | Value::Status(_) => Ok(StoreReply::Ok),
            other => Err(unexpected(&other)),
        },
        // SET NX answers OK on write and nil when the key already existed
        StoreCommand::SetIfAbsent { .. } => match value {
            Value::Okay | Value::Status(_) => Ok(StoreReply::Int(1)),
            Value::Nil => Ok(StoreReply::Int(0)),
            other => Err(unexpected(&other)),
        },
        StoreCommand::SetMembers(_) => match value {
            Value::Bulk(items) => {
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Data(bytes) => {
                            let member = String::from_utf8(bytes)
                                .map_err(|e| StoreError::UnexpectedReply(e.to_string()))?;
                            members.push(member);
                        }
                        other => return Err(unexpected(&other)),
                    }
                }
                Ok(StoreReply::Members(members))
            }
            Value::Nil => Ok(StoreReply::Members(Vec::new())),
            other => Err(unexpected(&other)),
        },
        _ => match value {
            Value::Int(n) => Ok(StoreReply::Int(n)),
            other => Err(unexpected(&other)),
        },
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply> {
        let cmd = self.to_cmd(&command);
        let mut connection = self.connection.clone();

        let value: Value = self
            .with_timeout(cmd.query_async(&mut connection))
            .await
            .map_err(|e| {
                error!("Redis {} error for key '{}': {}", command.name(), command.key(), e);
                e
            })?;

        decode_reply(&command, value)
    }

    async fn execute_batch(&self, batch: Batch) -> StoreResult<Vec<StoreReply>> {
        let commands = batch.into_commands();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            pipe.add_command(self.to_cmd(command));
        }

        let mut connection = self.connection.clone();
        let values: Vec<Value> = self
            .with_timeout(pipe.query_async(&mut connection))
            .await
            .map_err(|e| {
                error!("Redis MULTI/EXEC of {} commands failed: {}", commands.len(), e);
                e
            })?;

        if values.len() != commands.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "EXEC returned {} replies for {} commands",
                values.len(),
                commands.len()
            )));
        }

        commands
            .iter()
            .zip(values)
            .map(|(command, value)| decode_reply(command, value))
            .collect()
    }

    fn backend_name(&self) -> &str {
        "redis"
    }
}
