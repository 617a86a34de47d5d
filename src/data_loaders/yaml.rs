use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{LazyLock, RwLock},
    time::{Duration, Instant},
};

use serde_yaml::Value;

/* =========================
   CONFIG CACHE
========================= */

// Keyed by path; the modified time guards against serving a stale document
// when the file is rewritten inside the TTL window.
type CacheEntry = (Value, Instant, Option<std::time::SystemTime>);

static YAML_CACHE: LazyLock<RwLock<HashMap<String, CacheEntry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
const CACHE_TTL: Duration = Duration::from_secs(1);
const CACHE_MAX: usize = 16;

/// YAML loader with a short per-file cache.
pub fn load_yaml(path: &Path) -> Option<Value> {
    let now = Instant::now();
    let key = path.to_string_lossy().to_string();
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();

    if let Ok(cache) = YAML_CACHE.read() {
        if let Some((v, t, m)) = cache.get(&key) {
            if now.duration_since(*t) < CACHE_TTL && *m == modified {
                return Some(v.clone());
            }
        }
    }

    let txt = fs::read_to_string(path).ok()?;
    let v: Value = serde_yaml::from_str(&txt).ok()?;

    if let Ok(mut cache) = YAML_CACHE.write() {
        if cache.len() >= CACHE_MAX {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, (_, t, _))| *t)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(key, (v.clone(), now, modified));
    }

    Some(v)
}

pub fn invalidate(path: &Path) {
    let key = path.to_string_lossy().to_string();
    if let Ok(mut cache) = YAML_CACHE.write() {
        cache.remove(&key);
    }
}
