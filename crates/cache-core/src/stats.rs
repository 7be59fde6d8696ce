//! 缓存指标

use ::metrics::counter;

pub(crate) fn record_hit(entity: &str) {
    counter!("cache_hits_total", "entity" => entity.to_string()).increment(1);
}

pub(crate) fn record_miss(entity: &str) {
    counter!("cache_misses_total", "entity" => entity.to_string()).increment(1);
}

pub(crate) fn record_store_error(entity: &str, op: &'static str) {
    counter!("cache_store_errors_total", "entity" => entity.to_string(), "op" => op).increment(1);
}

pub(crate) fn record_evicted(entity: &str, count: u64) {
    counter!("cache_evicted_keys_total", "entity" => entity.to_string()).increment(count);
}

pub(crate) fn record_invalidation(entity: &str) {
    counter!("cache_invalidations_total", "entity" => entity.to_string()).increment(1);
}
