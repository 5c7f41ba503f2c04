//! A process-local `VolatileStore` implementation. Used by the crate's
//! own tests and by `tiervault-ctl`/integration tests so exercising the
//! rate limiter, upload session cache, and metadata cache doesn't
//! require a live Redis instance. Never used by `run_service` itself —
//! production always wires `RedisStore`.

use super::VolatileStore;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(std::collections::HashSet<String>),
    ZSet(Vec<(String, f64)>),
}

#[derive(Default)]
pub struct InMemoryVolatileStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryVolatileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at.is_none_or(|at| Instant::now() < at)
    }

    fn with_entry<T>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> T) -> T {
        let entries = self.entries.read().expect("lock poisoned");
        let entry = entries.get(key).filter(|e| Self::is_live(e));
        f(entry)
    }
}

#[async_trait::async_trait]
impl VolatileStore for InMemoryVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::Str(s), .. }) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(
            key.to_string(),
            Entry { value: Value::Str(value.to_string()), expires_at: ttl.map(|d| Instant::now() + d) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().expect("lock poisoned").remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_entry(key, |e| e.is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.with_entry(key, |e| {
            e.and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs() as i64)
        }))
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.incrby(key, 1).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let current = match entries.get(key) {
            Some(Entry { value: Value::Str(s), .. }) => s.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + delta;
        entries.insert(key.to_string(), Entry { value: Value::Str(next.to_string()), expires_at: None });
        Ok(next)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        if let Value::Hash(map) = &mut entry.value {
            map.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::Hash(map), .. }) => map.get(field).cloned(),
            _ => None,
        }))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::Hash(map), .. }) => map.clone(),
            _ => HashMap::new(),
        }))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        if let Some(Entry { value: Value::Hash(map), .. }) = entries.get_mut(key) {
            map.remove(field);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(Default::default()),
            expires_at: None,
        });
        if let Value::Set(set) = &mut entry.value {
            set.insert(member.to_string());
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::Set(set), .. }) => set.contains(member),
            _ => false,
        }))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::Set(set), .. }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: Value::ZSet(Vec::new()), expires_at: None });
        if let Value::ZSet(set) = &mut entry.value {
            set.retain(|(m, _)| m != member);
            set.push((member.to_string(), score));
            set.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        }
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64> {
        let mut entries = self.entries.write().expect("lock poisoned");
        if let Some(Entry { value: Value::ZSet(set), .. }) = entries.get_mut(key) {
            let before = set.len();
            set.retain(|(_, score)| *score < min || *score > max);
            Ok((before - set.len()) as i64)
        } else {
            Ok(0)
        }
    }

    async fn zcard(&self, key: &str) -> Result<i64> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::ZSet(set), .. }) => set.len() as i64,
            _ => 0,
        }))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        Ok(self.with_entry(key, |e| match e {
            Some(Entry { value: Value::ZSet(set), .. }) => {
                let len = set.len() as isize;
                let norm = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
                let (s, e) = (norm(start), norm(stop));
                if s > e || len == 0 {
                    Vec::new()
                } else {
                    set[s as usize..=(e as usize).min(set.len().saturating_sub(1))]
                        .iter()
                        .map(|(m, _)| m.clone())
                        .collect()
                }
            }
            _ => Vec::new(),
        }))
    }

    async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        let prefix = pattern.trim_end_matches('*');
        let mut entries = self.entries.write().expect("lock poisoned");
        let matching: Vec<String> = entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for key in &matching {
            entries.remove(key);
        }
        Ok(matching.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = InMemoryVolatileStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn ttl_expiry_is_honored() {
        let store = InMemoryVolatileStore::new();
        store.set("k", "v", Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sorted_set_sliding_window() {
        let store = InMemoryVolatileStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "c", 3.0).await.unwrap();
        store.zremrangebyscore("z", 0.0, 1.5).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }
}
