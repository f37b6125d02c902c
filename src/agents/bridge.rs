//! Data bridge: the fetch layer workers pull from
//!
//! `CachedBridge` decorates a primary bridge with a TTL cache and an optional
//! fallback bridge. Lookup order: fresh cache, primary, fallback, stale cache.
//! Entries older than the TTL plus the stale window are swept on insert.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::{request_key, ToolArgs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

impl BridgeResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            cached: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            cached: false,
        }
    }
}

/// Remote data source. Failures are returned, never raised.
#[async_trait]
pub trait DataBridge: Send + Sync {
    async fn call(&self, tool: &str, args: &ToolArgs) -> BridgeResponse;
}

/// Serves canned responses
#[derive(Debug, Clone, Default)]
pub struct StaticBridge {
    fixtures: HashMap<String, Value>,
    echo: bool,
}

impl StaticBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every call by echoing the tool and arguments back
    pub fn echo() -> Self {
        Self {
            fixtures: HashMap::new(),
            echo: true,
        }
    }

    pub fn with_fixture(mut self, tool: &str, data: Value) -> Self {
        self.fixtures.insert(tool.to_string(), data);
        self
    }
}

#[async_trait]
impl DataBridge for StaticBridge {
    async fn call(&self, tool: &str, args: &ToolArgs) -> BridgeResponse {
        if let Some(data) = self.fixtures.get(tool) {
            return BridgeResponse::ok(data.clone());
        }
        if self.echo {
            return BridgeResponse::ok(json!({ "tool": tool, "args": args }));
        }
        BridgeResponse::failure(format!("no fixture for {tool}"))
    }
}

const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(300);

struct CacheEntry {
    stored_at: Instant,
    data: Value,
}

pub struct CachedBridge {
    primary: Arc<dyn DataBridge>,
    fallback: Option<Arc<dyn DataBridge>>,
    ttl: Duration,
    stale_window: Duration,
    cache: DashMap<String, CacheEntry>,
    last_sweep: Mutex<Instant>,
}

impl CachedBridge {
    pub fn new(primary: Arc<dyn DataBridge>, ttl: Duration) -> Self {
        Self {
            primary,
            fallback: None,
            ttl,
            stale_window: DEFAULT_STALE_WINDOW,
            cache: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn DataBridge>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// How long past the TTL an entry may still be served when every bridge fails
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    fn retention(&self) -> Duration {
        self.ttl.saturating_add(self.stale_window)
    }

    fn lookup(&self, key: &str, allow_stale: bool) -> Option<Value> {
        let limit = if allow_stale { self.retention() } else { self.ttl };
        self.cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < limit)
            .map(|entry| entry.data.clone())
    }

    /// Drop entries past their stale window, at most once per TTL
    fn sweep_if_due(&self) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < self.ttl {
                return;
            }
            *last = Instant::now();
        }
        let retention = self.retention();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.stored_at.elapsed() < retention);
        let swept = before.saturating_sub(self.cache.len());
        if swept > 0 {
            debug!(swept, "swept stale bridge entries");
        }
    }

    fn store(&self, key: String, data: &Value) {
        self.sweep_if_due();
        self.cache.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                data: data.clone(),
            },
        );
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.cache.len())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl DataBridge for CachedBridge {
    async fn call(&self, tool: &str, args: &ToolArgs) -> BridgeResponse {
        let key = request_key(tool, args);
        if let Some(data) = self.lookup(&key, false) {
            debug!(tool, "bridge cache hit");
            return BridgeResponse {
                cached: true,
                ..BridgeResponse::ok(data)
            };
        }

        let primary = self.primary.call(tool, args).await;
        if primary.success {
            if let Some(data) = &primary.data {
                self.store(key, data);
            }
            return primary;
        }

        let primary_error = primary.error.unwrap_or_else(|| "unknown error".to_string());
        warn!(tool, error = %primary_error, "primary bridge failed");

        if let Some(fallback) = &self.fallback {
            let response = fallback.call(tool, args).await;
            if response.success {
                if let Some(data) = &response.data {
                    self.store(key, data);
                }
                return response;
            }
        }

        if let Some(data) = self.lookup(&key, true) {
            debug!(tool, "serving stale bridge data");
            return BridgeResponse {
                cached: true,
                ..BridgeResponse::ok(data)
            };
        }

        BridgeResponse::failure(primary_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts calls and can be switched off
    struct Flaky {
        calls: AtomicUsize,
        down: AtomicBool,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DataBridge for Flaky {
        async fn call(&self, tool: &str, _args: &ToolArgs) -> BridgeResponse {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                BridgeResponse::failure("upstream 503")
            } else {
                BridgeResponse::ok(json!({ "tool": tool, "call": n }))
            }
        }
    }

    #[tokio::test]
    async fn test_cache_hit_marks_cached() {
        let primary = Arc::new(Flaky::new());
        let bridge = CachedBridge::new(primary.clone(), Duration::from_secs(60));
        let args = ToolArgs::new();

        let first = bridge.call("token_price", &args).await;
        assert!(first.success && !first.cached);
        let second = bridge.call("token_price", &args).await;
        assert!(second.cached);
        assert_eq!(second.data, first.data);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_then_stale() {
        let primary = Arc::new(Flaky::new());
        let fallback =
            StaticBridge::new().with_fixture("whale_tracker", json!({ "src": "fallback" }));
        let bridge =
            CachedBridge::new(primary.clone(), Duration::ZERO).with_fallback(Arc::new(fallback));
        let args = ToolArgs::new();

        // ttl zero: every call goes upstream
        assert!(bridge.call("token_price", &args).await.success);
        primary.down.store(true, Ordering::SeqCst);

        let fb = bridge.call("whale_tracker", &args).await;
        assert_eq!(fb.data, Some(json!({ "src": "fallback" })));

        let stale = bridge.call("token_price", &args).await;
        assert!(stale.success && stale.cached);

        let missing = bridge.call("nft_floor_tracker", &args).await;
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("upstream 503"));
    }

    #[tokio::test]
    async fn test_entries_past_stale_window_are_swept() {
        let primary = Arc::new(Flaky::new());
        let bridge = CachedBridge::new(primary.clone(), Duration::from_millis(10))
            .with_stale_window(Duration::from_millis(10));
        let args = ToolArgs::new();

        bridge.call("token_price", &args).await;
        bridge.call("whale_tracker", &args).await;
        assert_eq!(bridge.len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        bridge.call("gas_tracker", &args).await;
        assert_eq!(bridge.len(), 1);

        // swept entries are gone for stale fallback too
        primary.down.store(true, Ordering::SeqCst);
        assert!(!bridge.call("token_price", &args).await.success);
    }

    #[tokio::test]
    async fn test_static_bridge() {
        let args = ToolArgs::new();
        assert!(!StaticBridge::new().call("x", &args).await.success);
        let echoed = StaticBridge::echo().call("x", &args).await;
        assert_eq!(echoed.data, Some(json!({ "tool": "x", "args": {} })));
    }
}
