//! 进程内缓存存储
//!
//! 实现 `CachePort` 与 `CacheKeyspace`，用于单机部署与测试。
//! 扫描游标基于写入序号，扫描过程中删除键不会导致遗漏。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tessera_errors::AppResult;
use tessera_ports::{CacheKeyspace, CachePort, ScanPage};

struct Entry {
    value: String,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// 写入序号 -> 键
    order: BTreeMap<u64, String>,
    next_seq: u64,
    /// 写入时回收过期键的起始序号
    sweep_from: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.remove(key);
        }
        self.entries.get(key)
    }

    /// 从上次位置起检查至多 `limit` 个键并删除其中已过期的，返回删除数
    fn sweep(&mut self, now: Instant, limit: usize) -> usize {
        let mut examined = 0;
        let mut expired = Vec::new();
        let mut last_seq = None;

        for (seq, key) in self.order.range(self.sweep_from..) {
            if examined == limit {
                break;
            }
            examined += 1;
            last_seq = Some(*seq);
            if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
                expired.push(key.clone());
            }
        }

        self.sweep_from = match last_seq {
            Some(seq) if examined == limit => seq + 1,
            _ => 0,
        };

        expired.iter().filter(|key| self.remove(key)).count()
    }
}

/// 每次写入顺带检查的键数
const SWEEP_PER_WRITE: usize = 16;

/// 内存缓存
#[derive(Clone, Default)]
pub struct InMemoryCache {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未过期的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入时设置的过期时间
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.inner.lock().live(key, now).and_then(|e| e.ttl)
    }

    /// 匹配模式的键（按写入顺序）
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .order
            .values()
            .filter(|key| {
                inner
                    .entries
                    .get(key.as_str())
                    .is_some_and(|e| !e.is_expired(now))
            })
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CachePort for InMemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        Ok(self.inner.lock().live(key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.sweep(now, SWEEP_PER_WRITE);
        let expires_at = ttl.map(|ttl| now + ttl);

        // 覆盖写保留原序号，与 Redis 在扫描期间一直存在的键必被返回一致
        let existing_seq = inner.live(key, now).map(|e| e.seq);
        let seq = match existing_seq {
            Some(seq) => seq,
            None => {
                inner.next_seq += 1;
                let seq = inner.next_seq;
                inner.order.insert(seq, key.to_string());
                seq
            }
        };

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        Ok(self.inner.lock().live(key, now).is_some())
    }
}

#[async_trait]
impl CacheKeyspace for InMemoryCache {
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> AppResult<ScanPage> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let mut examined = 0;
        let mut last_seq = None;
        let mut keys = Vec::new();
        let mut expired = Vec::new();

        for (seq, key) in inner.order.range(cursor..) {
            if examined == count.max(1) {
                break;
            }
            examined += 1;
            last_seq = Some(*seq);

            match inner.entries.get(key) {
                Some(entry) if entry.is_expired(now) => expired.push(key.clone()),
                Some(_) if glob_match(pattern, key) => keys.push(key.clone()),
                _ => {}
            }
        }

        // 已扫过的过期键直接回收；后续序号不受影响，游标仍然有效
        for key in &expired {
            inner.remove(key);
        }

        let next = last_seq
            .filter(|seq| inner.order.range(seq + 1..).next().is_some())
            .map(|seq| seq + 1)
            .unwrap_or(0);

        Ok(ScanPage { cursor: next, keys })
    }

    async fn unlink(&self, keys: &[String]) -> AppResult<u64> {
        let mut inner = self.inner.lock();
        Ok(keys.iter().filter(|key| inner.remove(key)).count() as u64)
    }
}

/// Redis 风格的 glob 匹配：`*` `?` `[abc]` `[a-z]` `[^a]` 与 `\` 转义
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // 最近一个 `*` 的位置与它当时对应的文本位置
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// 匹配 `[...]` 字符类，返回 (是否匹配, 类结束后的模式位置)
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }

    // 未闭合的 `[` 按字面量处理
    if i >= p.len() {
        return if c == '[' { Some((true, start + 1)) } else { None };
    }

    Some((matched != negate, i + 1))
}
