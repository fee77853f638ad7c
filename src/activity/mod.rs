use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::quote::Direction;

/// 活动键：毫秒时间戳 + 同毫秒内的单调序号。
///
/// 毫秒时间戳在连续快速写入时会碰撞，这里用显式序号消歧；
/// BTreeMap 的键序因此等于写入顺序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActivityKey {
    pub stamp_ms: u64,
    pub seq: u32,
}

/// 一次成交的规范化视图。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradeActivity {
    pub direction: Direction,
    /// 以原生币计的成交额。
    pub price_native: f64,
    /// 以美元计的成交额。
    pub price_usd: f64,
}

/// 池储备的一次观测。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSample {
    pub base_reserve: u64,
    pub quote_reserve: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivityEvent {
    Trade(TradeActivity),
    PoolSample(PoolSample),
}

struct CacheState {
    entries: BTreeMap<ActivityKey, ActivityEvent>,
    /// 已交付给消费者的最大键，只前进不回退。
    watermark: Option<ActivityKey>,
    last_stamp: u64,
    seq: u32,
}

/// 按时间键有序的追加日志，带水位线的至多一次交付。
/// 单写者单读者；锁只为跨任务安全，不假设并发写。
pub struct ActivityCache {
    state: Mutex<CacheState>,
}

impl Default for ActivityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: BTreeMap::new(),
                watermark: None,
                last_stamp: 0,
                seq: 0,
            }),
        }
    }

    /// 以当前时刻写入一条活动，返回分配到的键。
    pub fn save(&self, event: ActivityEvent) -> ActivityKey {
        self.save_at(now_ms(), event)
    }

    /// 以指定时间戳写入。时钟回拨会被钳到上一次的时间戳，
    /// 保证键序单调。
    pub fn save_at(&self, stamp_ms: u64, event: ActivityEvent) -> ActivityKey {
        let mut state = self.state.lock();
        let stamp_ms = stamp_ms.max(state.last_stamp);
        if stamp_ms == state.last_stamp {
            state.seq += 1;
        } else {
            state.last_stamp = stamp_ms;
            state.seq = 0;
        }
        let key = ActivityKey {
            stamp_ms,
            seq: state.seq,
        };
        state.entries.insert(key, event);
        key
    }

    /// 取出水位线之后的全部活动并推进水位线。两次调用之间没有
    /// 写入时，第二次返回空；已交付的记录永不重发。
    pub fn read_new(&self) -> Vec<(ActivityKey, ActivityEvent)> {
        let mut state = self.state.lock();
        let fresh: Vec<(ActivityKey, ActivityEvent)> = match state.watermark {
            Some(mark) => state
                .entries
                .range((
                    std::ops::Bound::Excluded(mark),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(k, v)| (*k, *v))
                .collect(),
            None => state.entries.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        if let Some((last, _)) = fresh.last() {
            state.watermark = Some(*last);
        }
        fresh
    }

    /// 删除键不大于 `upto` 的记录。水位线不回退。
    pub fn prune(&self, upto: ActivityKey) {
        let mut state = self.state.lock();
        state.entries.retain(|key, _| *key > upto);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// 迭代序中的最后一条活动。
    pub fn last_activity(&self) -> Option<(ActivityKey, ActivityEvent)> {
        let state = self.state.lock();
        state.entries.iter().next_back().map(|(k, v)| (*k, *v))
    }

    /// 迭代序中的最后两条活动，(较早, 较晚)。
    pub fn last_pair(&self) -> Option<[(ActivityKey, ActivityEvent); 2]> {
        let state = self.state.lock();
        let mut rev = state.entries.iter().rev();
        let newest = rev.next().map(|(k, v)| (*k, *v))?;
        let previous = rev.next().map(|(k, v)| (*k, *v))?;
        Some([previous, newest])
    }

    /// 以原生币计的粗利润：卖出额合计 - 买入额合计。
    pub fn total_profit(&self) -> f64 {
        let state = self.state.lock();
        state
            .entries
            .values()
            .filter_map(|event| match event {
                ActivityEvent::Trade(trade) => Some(match trade.direction {
                    Direction::Sell => trade.price_native,
                    Direction::Buy => -trade.price_native,
                }),
                ActivityEvent::PoolSample(_) => None,
            })
            .sum()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(direction: Direction, price_native: f64) -> ActivityEvent {
        ActivityEvent::Trade(TradeActivity {
            direction,
            price_native,
            price_usd: price_native * 150.0,
        })
    }

    #[test]
    fn read_new_never_redelivers() {
        let cache = ActivityCache::new();
        cache.save_at(1_000, trade(Direction::Buy, 1.0));
        cache.save_at(2_000, trade(Direction::Sell, 2.0));

        assert_eq!(cache.read_new().len(), 2);
        assert!(cache.read_new().is_empty());

        cache.save_at(3_000, trade(Direction::Buy, 3.0));
        let fresh = cache.read_new();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0.stamp_ms, 3_000);
    }

    #[test]
    fn same_millisecond_keys_keep_insertion_order() {
        let cache = ActivityCache::new();
        let first = cache.save_at(1_000, trade(Direction::Buy, 1.0));
        let second = cache.save_at(1_000, trade(Direction::Sell, 2.0));
        assert!(first < second);

        let fresh = cache.read_new();
        assert_eq!(fresh[0].0, first);
        assert_eq!(fresh[1].0, second);
    }

    #[test]
    fn clock_rollback_is_clamped() {
        let cache = ActivityCache::new();
        let first = cache.save_at(5_000, trade(Direction::Buy, 1.0));
        let second = cache.save_at(4_000, trade(Direction::Sell, 2.0));
        assert!(second > first);
        assert_eq!(second.stamp_ms, 5_000);
    }

    #[test]
    fn prune_is_inclusive() {
        let cache = ActivityCache::new();
        let first = cache.save_at(1_000, trade(Direction::Buy, 1.0));
        cache.save_at(2_000, trade(Direction::Sell, 2.0));
        cache.prune(first);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.last_activity().unwrap().0.stamp_ms, 2_000);
    }

    #[test]
    fn last_pair_orders_old_to_new() {
        let cache = ActivityCache::new();
        assert!(cache.last_pair().is_none());
        cache.save_at(1_000, trade(Direction::Buy, 1.0));
        assert!(cache.last_pair().is_none());
        cache.save_at(2_000, trade(Direction::Sell, 2.0));
        let [older, newer] = cache.last_pair().unwrap();
        assert!(older.0 < newer.0);
    }

    #[test]
    fn profit_is_sells_minus_buys() {
        let cache = ActivityCache::new();
        cache.save_at(1_000, trade(Direction::Buy, 1.5));
        cache.save_at(2_000, trade(Direction::Sell, 2.0));
        cache.save_at(
            3_000,
            ActivityEvent::PoolSample(PoolSample {
                base_reserve: 1,
                quote_reserve: 1,
            }),
        );
        assert!((cache.total_profit() - 0.5).abs() < f64::EPSILON);
    }
}
