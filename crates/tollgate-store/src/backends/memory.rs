//! In-memory store backend
//!
//! All state lives behind one mutex so a batch runs as a single critical
//! section. No `.await` happens while the lock is held. Expired entries are
//! dropped lazily when touched and by a periodic sweep.

use crate::{
    Batch, Clock, SessionBackend, StoreCommand, StoreError, StoreReply, StoreResult, SystemClock,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

/// Entry in the memory store
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + to_chrono(ttl)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| now >= exp)
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    next_sweep: DateTime<Utc>,
}

/// In-memory session backend with clock-driven expiry
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    outage: AtomicBool,
    commands: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryBackend {
    /// Create a backend reading time from the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let next_sweep = clock.now() + to_chrono(DEFAULT_SWEEP_INTERVAL);
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                next_sweep,
            }),
            clock,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            outage: AtomicBool::new(false),
            commands: AtomicU64::new(0),
        }
    }

    /// How often expired entries are swept on access
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self.state.get_mut().next_sweep = self.clock.now() + to_chrono(interval);
        self
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` until reset
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Number of commands executed, batches counted per command
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::sweep(&mut state, now)
    }

    fn sweep(state: &mut State, now: DateTime<Utc>) -> usize {
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    /// Lock the state, sweeping expired entries when the interval has passed
    fn lock_state(&self, now: DateTime<Utc>) -> MutexGuard<'_, State> {
        let mut state = self.state.lock();
        if now >= state.next_sweep {
            Self::sweep(&mut state, now);
            state.next_sweep = now + to_chrono(self.sweep_interval);
        }
        state
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend outage simulated".to_string()));
        }
        Ok(())
    }

    fn apply(
        entries: &mut HashMap<String, Entry>,
        command: StoreCommand,
        now: DateTime<Utc>,
    ) -> StoreResult<StoreReply> {
        // Lazily expire the touched key before interpreting the command
        let key = command.key().to_string();
        if entries.get(&key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(&key);
        }

        match command {
            StoreCommand::Get(key) => match entries.get(&key) {
                Some(Entry { value: Value::Text(text), .. }) => Ok(StoreReply::Text(text.clone())),
                Some(_) => Err(wrong_type(&key)),
                None => Ok(StoreReply::Nil),
            },
            StoreCommand::Set { key, value, ttl } => {
                entries.insert(key, Entry::new(Value::Text(value), ttl, now));
                Ok(StoreReply::Ok)
            }
            StoreCommand::SetIfAbsent { key, value, ttl } => {
                if entries.contains_key(&key) {
                    Ok(StoreReply::Int(0))
                } else {
                    entries.insert(key, Entry::new(Value::Text(value), ttl, now));
                    Ok(StoreReply::Int(1))
                }
            }
            StoreCommand::Delete(key) => Ok(StoreReply::Int(entries.remove(&key).map_or(0, |_| 1))),
            StoreCommand::Increment(key) => {
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Text("0".to_string()), None, now));
                let Value::Text(text) = &mut entry.value else {
                    return Err(wrong_type(&key));
                };
                let current = text.parse::<i64>().map_err(|_| {
                    StoreError::Backend(format!("value at '{}' is not an integer", key))
                })?;
                let next = current + 1;
                *text = next.to_string();
                Ok(StoreReply::Int(next))
            }
            StoreCommand::Expire { key, ttl } => match entries.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = Some(now + to_chrono(ttl));
                    Ok(StoreReply::Int(1))
                }
                None => Ok(StoreReply::Int(0)),
            },
            StoreCommand::Ttl(key) => match entries.get(&key) {
                Some(Entry { expires_at: Some(exp), .. }) => {
                    let remaining = (*exp - now).num_milliseconds().max(0);
                    // Round up so a key with 0.4s left still reports 1s
                    Ok(StoreReply::Int((remaining + 999) / 1000))
                }
                Some(_) => Ok(StoreReply::Int(-1)),
                None => Ok(StoreReply::Int(-2)),
            },
            StoreCommand::Exists(key) => Ok(StoreReply::Int(entries.contains_key(&key) as i64)),
            StoreCommand::SetAdd { key, member } => {
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new()), None, now));
                match &mut entry.value {
                    Value::Set(members) => Ok(StoreReply::Int(members.insert(member) as i64)),
                    Value::Text(_) => Err(wrong_type(&key)),
                }
            }
            StoreCommand::SetRemove { key, member } => {
                let (removed, now_empty) = match entries.get_mut(&key) {
                    Some(Entry { value: Value::Set(members), .. }) => {
                        let removed = members.remove(&member);
                        (removed, members.is_empty())
                    }
                    Some(_) => return Err(wrong_type(&key)),
                    None => (false, false),
                };
                // Redis drops a set once its last member is gone
                if now_empty {
                    entries.remove(&key);
                }
                Ok(StoreReply::Int(removed as i64))
            }
            StoreCommand::SetMembers(key) => match entries.get(&key) {
                Some(Entry { value: Value::Set(members), .. }) => {
                    Ok(StoreReply::Members(members.iter().cloned().collect()))
                }
                Some(_) => Err(wrong_type(&key)),
                None => Ok(StoreReply::Members(Vec::new())),
            },
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!("WRONGTYPE operation against key '{}'", key))
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply> {
        self.check_available()?;
        self.commands.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut state = self.lock_state(now);
        Self::apply(&mut state.entries, command, now)
    }

    async fn execute_batch(&self, batch: Batch) -> StoreResult<Vec<StoreReply>> {
        self.check_available()?;
        self.commands.fetch_add(batch.len() as u64, Ordering::Relaxed);
        let now = self.clock.now();
        let mut state = self.lock_state(now);

        // Prior values of the touched keys, restored if a command fails
        let mut undo: HashMap<String, Option<Entry>> = HashMap::new();
        let mut replies = Vec::with_capacity(batch.len());
        for command in batch.into_commands() {
            if !undo.contains_key(command.key()) {
                let original = state.entries.get(command.key()).cloned();
                undo.insert(command.key().to_string(), original);
            }
            match Self::apply(&mut state.entries, command, now) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    for (key, original) in undo {
                        match original {
                            Some(entry) => state.entries.insert(key, entry),
                            None => state.entries.remove(&key),
                        };
                    }
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
