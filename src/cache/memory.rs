//! 进程内缓存存储
//! 实现完整的存储契约，流水线在同一把锁内执行，因此对单进程部署是原子的

use super::{CacheStore, Command, Reply, StoreError};
use crate::clock::{system_clock, SharedClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: String) -> bool {
        let is_new = match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(old, member.clone()));
                false
            }
            None => true,
        };
        self.ordered.insert((score, member));
        is_new
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn in_range(&self, min: i64, max: i64) -> Vec<(String, i64)> {
        if min > max {
            return Vec::new();
        }
        self.ordered
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(score, member)| (member.clone(), *score))
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
enum Value {
    Str(String),
    Sorted(SortedSet),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty_collection(&self) -> bool {
        match &self.value {
            Value::Sorted(set) => set.len() == 0,
            Value::List(list) => list.is_empty(),
            Value::Str(_) => false,
        }
    }
}

/// 进程内键值存储
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| StoreError::NotInteger(format!("ttl out of range: {ttl:?}")))
}

/// 取未过期的条目，过期条目在读取时惰性删除
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: DateTime<Utc>,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

/// 按 Redis 语义规范化列表区间，返回 `[start, end)`
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}

fn apply(
    entries: &mut HashMap<String, Entry>,
    now: DateTime<Utc>,
    command: Command,
) -> Result<Reply, StoreError> {
    match command {
        Command::Ping => Ok(Reply::Ok),
        Command::Get { key } => match live(entries, &key, now) {
            Some(Entry { value: Value::Str(v), .. }) => Ok(Reply::Value(v.clone())),
            Some(_) => Err(StoreError::WrongType(key)),
            None => Ok(Reply::Nil),
        },
        Command::Set { key, value, ttl } => {
            let expires_at = ttl.map(|ttl| expiry(now, ttl)).transpose()?;
            entries.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at,
                },
            );
            Ok(Reply::Ok)
        }
        Command::Del { key } => {
            let existed = live(entries, &key, now).is_some();
            entries.remove(&key);
            Ok(Reply::Int(i64::from(existed)))
        }
        Command::Incr { key } => match live(entries, &key, now) {
            Some(Entry { value: Value::Str(v), .. }) => {
                let next = v
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| StoreError::NotInteger(key.clone()))?;
                *v = next.to_string();
                Ok(Reply::Int(next))
            }
            Some(_) => Err(StoreError::WrongType(key)),
            None => {
                entries.insert(
                    key,
                    Entry {
                        value: Value::Str("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(Reply::Int(1))
            }
        },
        Command::Expire { key, ttl } => match live(entries, &key, now) {
            Some(entry) => {
                entry.expires_at = Some(expiry(now, ttl)?);
                Ok(Reply::Int(1))
            }
            None => Ok(Reply::Int(0)),
        },
        // 返回剩余毫秒数；-2 表示键不存在，-1 表示没有过期时间
        Command::Ttl { key } => match live(entries, &key, now) {
            Some(Entry { expires_at: Some(at), .. }) => {
                Ok(Reply::Int((*at - now).num_milliseconds().max(0)))
            }
            Some(_) => Ok(Reply::Int(-1)),
            None => Ok(Reply::Int(-2)),
        },
        Command::ZAdd { key, score, member } => {
            if live(entries, &key, now).is_none() {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Sorted(SortedSet::default()),
                        expires_at: None,
                    },
                );
            }
            match entries.get_mut(&key) {
                Some(Entry { value: Value::Sorted(set), .. }) => {
                    Ok(Reply::Int(i64::from(set.insert(score, member))))
                }
                _ => Err(StoreError::WrongType(key)),
            }
        }
        Command::ZRemRangeByScore { key, min, max } => {
            let removed = match live(entries, &key, now) {
                Some(Entry { value: Value::Sorted(set), .. }) => {
                    let doomed = set.in_range(min, max);
                    for (member, _) in &doomed {
                        set.remove(member);
                    }
                    doomed.len()
                }
                Some(_) => return Err(StoreError::WrongType(key)),
                None => 0,
            };
            if entries.get(&key).is_some_and(Entry::is_empty_collection) {
                entries.remove(&key);
            }
            Ok(Reply::Int(removed as i64))
        }
        Command::ZCard { key } => match live(entries, &key, now) {
            Some(Entry { value: Value::Sorted(set), .. }) => Ok(Reply::Int(set.len() as i64)),
            Some(_) => Err(StoreError::WrongType(key)),
            None => Ok(Reply::Int(0)),
        },
        Command::ZRangeByScore { key, min, max } => match live(entries, &key, now) {
            Some(Entry { value: Value::Sorted(set), .. }) => Ok(Reply::Scored(set.in_range(min, max))),
            Some(_) => Err(StoreError::WrongType(key)),
            None => Ok(Reply::Scored(Vec::new())),
        },
        Command::ZRem { key, member } => {
            let removed = match live(entries, &key, now) {
                Some(Entry { value: Value::Sorted(set), .. }) => set.remove(&member),
                Some(_) => return Err(StoreError::WrongType(key)),
                None => false,
            };
            if entries.get(&key).is_some_and(Entry::is_empty_collection) {
                entries.remove(&key);
            }
            Ok(Reply::Int(i64::from(removed)))
        }
        Command::LPush { key, value } => {
            if live(entries, &key, now).is_none() {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::List(VecDeque::new()),
                        expires_at: None,
                    },
                );
            }
            match entries.get_mut(&key) {
                Some(Entry { value: Value::List(list), .. }) => {
                    list.push_front(value);
                    Ok(Reply::Int(list.len() as i64))
                }
                _ => Err(StoreError::WrongType(key)),
            }
        }
        Command::LTrim { key, start, stop } => {
            match live(entries, &key, now) {
                Some(Entry { value: Value::List(list), .. }) => {
                    match normalize_range(list.len(), start, stop) {
                        Some((from, to)) => {
                            list.truncate(to);
                            list.drain(..from);
                        }
                        None => list.clear(),
                    }
                }
                Some(_) => return Err(StoreError::WrongType(key)),
                None => {}
            }
            if entries.get(&key).is_some_and(Entry::is_empty_collection) {
                entries.remove(&key);
            }
            Ok(Reply::Ok)
        }
        Command::LRange { key, start, stop } => match live(entries, &key, now) {
            Some(Entry { value: Value::List(list), .. }) => {
                let values = match normalize_range(list.len(), start, stop) {
                    Some((from, to)) => list.range(from..to).cloned().collect(),
                    None => Vec::new(),
                };
                Ok(Reply::Values(values))
            }
            Some(_) => Err(StoreError::WrongType(key)),
            None => Ok(Reply::Values(Vec::new())),
        },
        Command::Keys { prefix } => {
            let mut keys: Vec<String> = entries
                .iter()
                .filter(|(key, entry)| key.starts_with(&prefix) && !entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.sort();
            Ok(Reply::Values(keys))
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn execute(&self, command: Command) -> Result<Reply, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        apply(&mut entries, now, command)
    }

    async fn pipeline(&self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        commands
            .into_iter()
            .map(|command| apply(&mut entries, now, command))
            .collect()
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}
