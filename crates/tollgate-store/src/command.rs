//! Store commands, replies and atomic batches
//!
//! Commands mirror the small subset of Redis semantics the session engine
//! relies on. Every backend must interpret them identically.

use crate::{StoreError, StoreResult};
use std::time::Duration;

/// A single operation against the ephemeral store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Read a string value
    Get(String),

    /// Write a string value, replacing any previous value and TTL
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },

    /// Write a string value only when the key is absent; replies `Int(1)` on write
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },

    /// Remove a key of any type; replies with the number of removed keys
    Delete(String),

    /// Increment an integer value, creating it at zero. The TTL is preserved.
    Increment(String),

    /// Attach a TTL to an existing key; replies `Int(1)` when the key exists
    Expire { key: String, ttl: Duration },

    /// Remaining TTL in whole seconds: `-2` when missing, `-1` without TTL
    Ttl(String),

    /// Replies `Int(1)` when the key exists
    Exists(String),

    /// Add a member to a set; replies with the number of new members
    SetAdd { key: String, member: String },

    /// Remove a member from a set; replies with the number of removed members
    SetRemove { key: String, member: String },

    /// List all members of a set
    SetMembers(String),
}

impl StoreCommand {
    /// Short command name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Get(_) => "GET",
            StoreCommand::Set { .. } => "SET",
            StoreCommand::SetIfAbsent { .. } => "SETNX",
            StoreCommand::Delete(_) => "DEL",
            StoreCommand::Increment(_) => "INCR",
            StoreCommand::Expire { .. } => "PEXPIRE",
            StoreCommand::Ttl(_) => "TTL",
            StoreCommand::Exists(_) => "EXISTS",
            StoreCommand::SetAdd { .. } => "SADD",
            StoreCommand::SetRemove { .. } => "SREM",
            StoreCommand::SetMembers(_) => "SMEMBERS",
        }
    }

    /// The key this command touches
    pub fn key(&self) -> &str {
        match self {
            StoreCommand::Get(key)
            | StoreCommand::Delete(key)
            | StoreCommand::Increment(key)
            | StoreCommand::Ttl(key)
            | StoreCommand::Exists(key)
            | StoreCommand::SetMembers(key) => key,
            StoreCommand::Set { key, .. }
            | StoreCommand::SetIfAbsent { key, .. }
            | StoreCommand::Expire { key, .. }
            | StoreCommand::SetAdd { key, .. }
            | StoreCommand::SetRemove { key, .. } => key,
        }
    }
}

/// Reply to a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    Nil,
    Ok,
    Int(i64),
    Text(String),
    Members(Vec<String>),
}

impl StoreReply {
    pub fn as_int(&self) -> StoreResult<i64> {
        match self {
            StoreReply::Int(value) => Ok(*value),
            other => Err(StoreError::UnexpectedReply(format!("expected integer, got {:?}", other))),
        }
    }

    pub fn into_text(self) -> StoreResult<Option<String>> {
        match self {
            StoreReply::Text(value) => Ok(Some(value)),
            StoreReply::Nil => Ok(None),
            other => Err(StoreError::UnexpectedReply(format!("expected text, got {:?}", other))),
        }
    }

    pub fn into_members(self) -> StoreResult<Vec<String>> {
        match self {
            StoreReply::Members(members) => Ok(members),
            StoreReply::Nil => Ok(Vec::new()),
            other => Err(StoreError::UnexpectedReply(format!("expected members, got {:?}", other))),
        }
    }

    /// Interpret an integer reply as a yes/no answer
    pub fn is_truthy(&self) -> StoreResult<bool> {
        Ok(self.as_int()? > 0)
    }
}

/// An ordered group of commands executed as one atomic unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<StoreCommand>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, command: StoreCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn get(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::Get(key.into()))
    }

    pub fn set(
        self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.push(StoreCommand::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        })
    }

    pub fn set_if_absent(
        self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.push(StoreCommand::SetIfAbsent {
            key: key.into(),
            value: value.into(),
            ttl,
        })
    }

    pub fn delete(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::Delete(key.into()))
    }

    pub fn increment(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::Increment(key.into()))
    }

    pub fn expire(self, key: impl Into<String>, ttl: Duration) -> Self {
        self.push(StoreCommand::Expire { key: key.into(), ttl })
    }

    pub fn ttl(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::Ttl(key.into()))
    }

    pub fn exists(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::Exists(key.into()))
    }

    pub fn set_add(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(StoreCommand::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_remove(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(StoreCommand::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_members(self, key: impl Into<String>) -> Self {
        self.push(StoreCommand::SetMembers(key.into()))
    }

    /// Append every command of another batch, preserving order
    pub fn extend(mut self, other: Batch) -> Self {
        self.commands.extend(other.commands);
        self
    }

    pub fn commands(&self) -> &[StoreCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<StoreCommand> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
