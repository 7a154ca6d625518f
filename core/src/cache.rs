//! TTL cache with best-effort peer replication
//!
//! Values are arbitrary JSON. Expiration travels as Unix nanoseconds so that
//! peers agree on when an entry dies regardless of when it reached them; `0`
//! means the entry never expires.
//!
//! In distributed mode `set` and `delete` are pushed to every peer in the
//! background and a local miss asks peers in order. Entries pulled from a
//! peer are stored locally without being pushed again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Timeout for every request sent to a peer
pub const PEER_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the janitor sweeps expired entries
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}

/// A cached value and its absolute expiration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    /// Unix nanoseconds; 0 never expires
    pub expiration: i64,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        let expiration = if ttl.is_zero() {
            0
        } else {
            now_nanos().saturating_add(ttl.as_nanos().min(i64::MAX as u128) as i64)
        };
        Self { value, expiration }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiration != 0 && now_nanos() > self.expiration
    }
}

/// Body of `POST /cache/set` between peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSetRequest {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub expiration: i64,
}

/// Body of `POST /cache/delete` between peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDeleteRequest {
    pub key: String,
}

/// Response of `GET /cache/get?key=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerGetResponse {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub expiration: i64,
    #[serde(default)]
    pub found: bool,
}

impl PeerGetResponse {
    pub fn from_lookup(key: &str, entry: Option<CacheEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                key: key.to_string(),
                value: entry.value,
                expiration: entry.expiration,
                found: true,
            },
            None => Self {
                key: key.to_string(),
                value: Value::Null,
                expiration: 0,
                found: false,
            },
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Distribution {
    enabled: bool,
    peers: Vec<String>,
    auth_token: Option<String>,
}

/// In-memory TTL cache
#[derive(Debug)]
pub struct Cache {
    items: RwLock<HashMap<String, CacheEntry>>,
    distribution: RwLock<Distribution>,
    http: reqwest::Client,
}

impl Cache {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            items: RwLock::new(HashMap::new()),
            distribution: RwLock::new(Distribution::default()),
            http,
        }
    }

    /// Start replicating to `peers` (base URLs such as `http://host:port`).
    /// `auth_token` is sent as a bearer token when the peers require one.
    pub async fn enable_distributed(&self, peers: Vec<String>, auth_token: Option<String>) {
        let peers = peers
            .into_iter()
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let mut dist = self.distribution.write().await;
        *dist = Distribution {
            enabled: true,
            peers,
            auth_token,
        };
    }

    pub async fn disable_distributed(&self) {
        *self.distribution.write().await = Distribution::default();
    }

    pub async fn is_distributed(&self) -> bool {
        self.distribution.read().await.enabled
    }

    /// Store `value` for `ttl` (zero keeps it forever) and replicate
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        self.items
            .write()
            .await
            .insert(key.to_string(), entry.clone());

        let dist = self.distribution.read().await.clone();
        if dist.enabled {
            self.replicate_set(key, entry, dist);
        }
    }

    /// Live value for `key`, falling back to peers on a local miss
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.lookup_local(key).await {
            return Some(entry.value);
        }

        let dist = self.distribution.read().await.clone();
        if !dist.enabled {
            return None;
        }
        self.fetch_from_peers(key, &dist).await
    }

    /// Remove `key` here and on every peer
    pub async fn delete(&self, key: &str) {
        self.items.write().await.remove(key);

        let dist = self.distribution.read().await.clone();
        if dist.enabled {
            self.replicate_delete(key, dist);
        }
    }

    pub async fn clear(&self) {
        self.items.write().await.clear();
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn delete_expired(&self) -> usize {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, entry| !entry.is_expired());
        before - items.len()
    }

    /// Live entry stored on this node only
    pub async fn lookup_local(&self, key: &str) -> Option<CacheEntry> {
        self.items
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Store an entry received from a peer, without replicating it
    pub async fn store_local(&self, key: &str, entry: CacheEntry) {
        self.items.write().await.insert(key.to_string(), entry);
    }

    /// Remove an entry on behalf of a peer, without replicating
    pub async fn delete_local(&self, key: &str) {
        self.items.write().await.remove(key);
    }

    /// Sweep expired entries every `interval` until the handle is aborted
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.delete_expired().await;
                if removed > 0 {
                    debug!("🧹 Cache janitor removed {} expired entries", removed);
                }
            }
        })
    }

    fn replicate_set(&self, key: &str, entry: CacheEntry, dist: Distribution) {
        let body = PeerSetRequest {
            key: key.to_string(),
            value: entry.value,
            expiration: entry.expiration,
        };
        for peer in dist.peers {
            let request = self.peer_request(
                self.http.post(format!("{}/cache/set", peer)).json(&body),
                dist.auth_token.as_deref(),
            );
            tokio::spawn(async move {
                if let Err(e) = request.send().await.and_then(|r| r.error_for_status()) {
                    warn!("Cache replicate set to {} failed: {}", peer, e);
                }
            });
        }
    }

    fn replicate_delete(&self, key: &str, dist: Distribution) {
        let body = PeerDeleteRequest {
            key: key.to_string(),
        };
        for peer in dist.peers {
            let request = self.peer_request(
                self.http.post(format!("{}/cache/delete", peer)).json(&body),
                dist.auth_token.as_deref(),
            );
            tokio::spawn(async move {
                if let Err(e) = request.send().await.and_then(|r| r.error_for_status()) {
                    warn!("Cache replicate delete to {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn fetch_from_peers(&self, key: &str, dist: &Distribution) -> Option<Value> {
        for peer in &dist.peers {
            if let Some(entry) = self.fetch_from_peer(key, peer, dist.auth_token.as_deref()).await {
                let value = entry.value.clone();
                self.store_local(key, entry).await;
                return Some(value);
            }
        }
        None
    }

    async fn fetch_from_peer(
        &self,
        key: &str,
        peer: &str,
        auth_token: Option<&str>,
    ) -> Option<CacheEntry> {
        let request = self.peer_request(
            self.http
                .get(format!("{}/cache/get", peer))
                .query(&[("key", key)]),
            auth_token,
        );

        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Cache peer {} answered {}", peer, r.status());
                return None;
            }
            Err(e) => {
                warn!("Cache fetch from {} failed: {}", peer, e);
                return None;
            }
        };

        let body: PeerGetResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Cache peer {} sent invalid JSON: {}", peer, e);
                return None;
            }
        };

        if !body.found {
            return None;
        }
        let entry = CacheEntry {
            value: body.value,
            expiration: body.expiration,
        };
        (!entry.is_expired()).then_some(entry)
    }

    fn peer_request(
        &self,
        builder: reqwest::RequestBuilder,
        auth_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = Cache::new();
        cache.set("key1", json!("value1"), Duration::from_secs(60)).await;
        assert_eq!(cache.get("key1").await, Some(json!("value1")));
        assert_eq!(cache.len().await, 1);

        cache.delete("key1").await;
        assert_eq!(cache.get("key1").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = Cache::new();
        cache.set("short", json!(1), Duration::from_millis(20)).await;
        cache.set("forever", json!({"a": 1}), Duration::ZERO).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("forever").await, Some(json!({"a": 1})));

        // expired entries linger until swept
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.delete_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = Cache::new();
        cache.set("a", json!(1), Duration::ZERO).await;
        cache.set("b", json!(2), Duration::ZERO).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_janitor_sweeps() {
        let cache = Arc::new(Cache::new());
        cache.set("gone", json!(true), Duration::from_millis(10)).await;
        let janitor = cache.spawn_janitor(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len().await, 0);
        janitor.abort();
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_a_miss() {
        let cache = Cache::new();
        // port 9 on loopback refuses connections
        cache
            .enable_distributed(vec!["http://127.0.0.1:9/".to_string()], None)
            .await;
        assert!(cache.is_distributed().await);

        cache.set("local", json!("v"), Duration::from_secs(5)).await;
        assert_eq!(cache.get("local").await, Some(json!("v")));
        assert_eq!(cache.get("missing").await, None);

        cache.disable_distributed().await;
        assert!(!cache.is_distributed().await);
    }

    #[test]
    fn test_peer_get_response_from_lookup() {
        let hit = PeerGetResponse::from_lookup(
            "k",
            Some(CacheEntry {
                value: json!("v"),
                expiration: 0,
            }),
        );
        assert!(hit.found);
        assert_eq!(hit.value, json!("v"));

        let miss = PeerGetResponse::from_lookup("k", None);
        assert!(!miss.found);
        assert_eq!(serde_json::to_value(&miss).unwrap()["value"], Value::Null);
    }

    #[test]
    fn test_entry_expiration_encoding() {
        assert_eq!(CacheEntry::new(json!(1), Duration::ZERO).expiration, 0);
        let entry = CacheEntry::new(json!(1), Duration::from_secs(60));
        assert!(entry.expiration > now_nanos());
        assert!(!entry.is_expired());
        let stale = CacheEntry {
            value: json!(1),
            expiration: 1,
        };
        assert!(stale.is_expired());
    }
}
