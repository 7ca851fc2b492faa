// Copyright 2026 tilecache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, sync::Arc};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use tilecache_common::{
    clock::Clock,
    event::{Event, EventListener},
    ledger::Ledger,
    rate::UnloadRate,
    statistics::Statistics,
    strict_assert,
};

use crate::pin::{PinGuard, PinnedEntry};

/// The weighter for the memory tier.
///
/// The weighter is used to calculate the resident size of a payload.
pub trait Weighter<V>: Fn(&str, &V) -> usize + Send + Sync + 'static {}
impl<V, T> Weighter<V> for T where T: Fn(&str, &V) -> usize + Send + Sync + 'static {}

struct Slot<V> {
    value: Arc<V>,
    pins: usize,
    /// Distinguishes a re-inserted key from the slot a guard was taken on.
    id: u64,
}

struct State<V> {
    slots: HashMap<String, Slot<V>>,
    ledger: Ledger,
    next_id: u64,
}

type Garbage<V> = (Event, String, Arc<V>);

pub(crate) struct Inner<V> {
    state: Mutex<State<V>>,

    capacity: usize,
    unload_rate: UnloadRate,

    weighter: Arc<dyn Weighter<V>>,
    event_listener: Option<Arc<dyn EventListener<Value = V>>>,

    clock: Arc<Clock>,
    statistics: Arc<Statistics>,
}

impl<V> Inner<V> {
    /// Unload up to `rate` of the live entries, oldest first, skipping pinned ones.
    fn evict(&self, state: &mut State<V>, rate: UnloadRate, garbages: &mut Vec<Garbage<V>>) -> usize {
        let count = rate.unload_count(state.ledger.len());
        let selected = state.ledger.select_oldest(count);
        let victims = selected
            .iter()
            .copied()
            .filter(|&i| {
                let key = state.ledger.entries()[i].key();
                state.slots.get(key).map(|slot| slot.pins == 0).unwrap_or(true)
            })
            .collect_vec();
        let skipped = selected.len() - victims.len();

        let before = state.ledger.total_size();
        for entry in state.ledger.remove(&victims) {
            if let Some(slot) = state.slots.remove(entry.key()) {
                garbages.push((Event::Evict, entry.key().to_string(), slot.value));
            }
        }
        strict_assert!(state.slots.len() == state.ledger.len());

        self.statistics
            .evictions
            .fetch_add(victims.len(), std::sync::atomic::Ordering::Relaxed);
        tracing::debug!(
            selected = selected.len(),
            evicted = victims.len(),
            skipped,
            freed = before - state.ledger.total_size(),
            "[memory]: eviction pass"
        );
        victims.len()
    }

    /// Hand the garbages to the listener. Must be called without the lock held.
    fn release(&self, garbages: Vec<Garbage<V>>)
    where
        V: 'static,
    {
        if let Some(listener) = self.event_listener.as_ref() {
            for (event, key, value) in garbages.iter() {
                listener.on_leave(*event, key, value);
            }
        }
    }

    pub(crate) fn unpin(&self, key: &str, id: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(key) {
            if slot.id == id {
                assert!(slot.pins > 0, "pin count underflow on {key:?}");
                slot.pins -= 1;
            }
        }
    }

    fn pin_locked(self: &Arc<Self>, state: &mut State<V>, key: &str) -> Option<(Arc<V>, PinGuard<V>)> {
        let slot = state.slots.get_mut(key)?;
        slot.pins += 1;
        let pinned = (slot.value.clone(), PinGuard::new(self.clone(), key.to_string(), slot.id));
        state.ledger.touch(key, self.clock.tick());
        Some(pinned)
    }
}

/// The memory tier.
///
/// Cloning is cheap: clones share the same entries.
pub struct MemoryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.inner.capacity)
            .field("unload_rate", &self.inner.unload_rate)
            .field("usage", &self.usage())
            .finish()
    }
}

impl<V> MemoryCache<V>
where
    V: Send + Sync + 'static,
{
    /// Insert `value` under `key`, or replace the payload of an existing key and refresh its timestamp.
    ///
    /// Pins on a replaced key stay in place. If the resident size exceeds the capacity afterwards, one eviction
    /// pass with the configured unload rate runs before returning.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Arc<V> {
        let key = key.into();
        let weight = (self.inner.weighter)(&key, &value);
        let value = Arc::new(value);
        let mut garbages = vec![];

        {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.tick();
            state.ledger.add_or_refresh(&key, weight, now);

            match state.slots.get_mut(&key) {
                Some(slot) => {
                    let old = std::mem::replace(&mut slot.value, value.clone());
                    garbages.push((Event::Replace, key.clone(), old));
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.slots.insert(
                        key.clone(),
                        Slot {
                            value: value.clone(),
                            pins: 0,
                            id,
                        },
                    );
                }
            }
            self.inner
                .statistics
                .inserts
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            if state.ledger.total_size() > self.inner.capacity {
                self.inner.evict(&mut state, self.inner.unload_rate, &mut garbages);
            }
        }

        // Do not hand out or drop payloads within the lock section.
        self.inner.release(garbages);
        value
    }

    /// Get the payload of `key` and refresh its timestamp.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.inner.state.lock();
        let value = state.slots.get(key).map(|slot| slot.value.clone());
        if value.is_some() {
            state.ledger.touch(key, self.inner.clock.tick());
        }
        self.inner.statistics.record_lookup(value.is_some());
        tracing::trace!(key, hit = value.is_some(), "[memory]: get");
        value
    }

    /// Get the payload of `key` and pin it, atomically with respect to eviction.
    pub fn get_pinned(&self, key: &str) -> Option<PinnedEntry<V>> {
        let mut state = self.inner.state.lock();
        let pinned = self.inner.pin_locked(&mut state, key);
        self.inner.statistics.record_lookup(pinned.is_some());
        pinned.map(|(value, guard)| PinnedEntry::new(value, guard))
    }

    /// Look up and pin a batch of keys under a single lock acquisition.
    ///
    /// Nothing can be evicted or cleared between the lookups of the batch.
    pub fn get_pinned_batch<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<Option<PinnedEntry<V>>> {
        let mut state = self.inner.state.lock();
        keys.into_iter()
            .map(|key| {
                let pinned = self.inner.pin_locked(&mut state, key);
                self.inner.statistics.record_lookup(pinned.is_some());
                pinned.map(|(value, guard)| PinnedEntry::new(value, guard))
            })
            .collect()
    }

    /// Pin `key` until the returned guard is dropped.
    ///
    /// Pinning a key that is not resident returns a guard whose release does nothing.
    pub fn pin(&self, key: &str) -> PinGuard<V> {
        let mut state = self.inner.state.lock();
        match self.inner.pin_locked(&mut state, key) {
            Some((_, guard)) => guard,
            None => PinGuard::noop(),
        }
    }

    /// Number of live pins on `key`.
    pub fn pins(&self, key: &str) -> usize {
        self.inner.state.lock().slots.get(key).map(|slot| slot.pins).unwrap_or_default()
    }

    /// Whether `key` is resident. Does not refresh its timestamp.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().slots.contains_key(key)
    }

    /// Remove `key` regardless of pins. Outstanding guards on it become no-ops.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let removed = {
            let mut state = self.inner.state.lock();
            state.ledger.remove_key(key);
            state.slots.remove(key)
        }?;
        let value = removed.value;
        self.inner.release(vec![(Event::Remove, key.to_string(), value.clone())]);
        Some(value)
    }

    /// Run one eviction pass unloading up to `rate` of the live entries, oldest first.
    ///
    /// Pinned entries in the selection are skipped and not replaced by younger ones, so a pass may free less than
    /// requested. Returns the number of evicted entries.
    pub fn evict_fraction(&self, rate: UnloadRate) -> usize {
        let mut garbages = vec![];
        let evicted = {
            let mut state = self.inner.state.lock();
            self.inner.evict(&mut state, rate, &mut garbages)
        };
        self.inner.release(garbages);
        evicted
    }

    /// Drop every entry, pinned or not, and reset the usage to 0.
    pub fn clear(&self) {
        let garbages = {
            let mut state = self.inner.state.lock();
            state.ledger.clear();
            state
                .slots
                .drain()
                .map(|(key, slot)| (Event::Clear, key, slot.value))
                .collect_vec()
        };
        tracing::debug!(count = garbages.len(), "[memory]: clear");
        self.inner.release(garbages);
    }
}

impl<V> MemoryCache<V> {
    /// Resident size according to the weighter.
    pub fn usage(&self) -> usize {
        self.inner.state.lock().ledger.total_size()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    /// Whether no entry is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tier counters.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }
}

/// Builder of [`MemoryCache`].
pub struct MemoryCacheBuilder<V> {
    capacity: usize,
    unload_rate: UnloadRate,
    weighter: Arc<dyn Weighter<V>>,
    event_listener: Option<Arc<dyn EventListener<Value = V>>>,
    clock: Option<Arc<Clock>>,
    statistics: Option<Arc<Statistics>>,
}

impl<V> MemoryCacheBuilder<V>
where
    V: Send + Sync + 'static,
{
    /// Create a builder with the given capacity, in weighter units.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            unload_rate: UnloadRate::default(),
            weighter: Arc::new(|_: &str, _: &V| 1),
            event_listener: None,
            clock: None,
            statistics: None,
        }
    }

    /// Set the fraction of entries unloaded when the capacity is exceeded.
    ///
    /// Default: `0.3`.
    pub fn with_unload_rate(mut self, unload_rate: UnloadRate) -> Self {
        self.unload_rate = unload_rate;
        self
    }

    /// Set the weighter.
    ///
    /// Default: every entry weighs `1`.
    pub fn with_weighter(mut self, weighter: impl Weighter<V>) -> Self {
        self.weighter = Arc::new(weighter);
        self
    }

    /// Set event listener.
    ///
    /// Default: No event listener installed.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Value = V>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Share a clock with other tiers.
    pub fn with_clock(mut self, clock: Arc<Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a statistics sink.
    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Build the memory tier.
    pub fn build(self) -> MemoryCache<V> {
        tracing::info!(
            capacity = self.capacity,
            unload_rate = %self.unload_rate,
            "[memory]: memory tier created"
        );
        MemoryCache {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slots: HashMap::new(),
                    ledger: Ledger::new(),
                    next_id: 0,
                }),
                capacity: self.capacity,
                unload_rate: self.unload_rate,
                weighter: self.weighter,
                event_listener: self.event_listener,
                clock: self.clock.unwrap_or_default(),
                statistics: self.statistics.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rand::Rng;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, String)>>,
    }

    impl EventListener for Recorder {
        type Value = Vec<u8>;

        fn on_leave(&self, reason: Event, key: &str, _: &Self::Value) {
            self.events.lock().push((reason, key.to_string()));
        }
    }

    fn rate(v: f64) -> UnloadRate {
        UnloadRate::new(v).unwrap()
    }

    fn cache(capacity: usize, unload_rate: f64) -> MemoryCache<Vec<u8>> {
        MemoryCacheBuilder::new(capacity)
            .with_unload_rate(rate(unload_rate))
            .with_weighter(|_, v: &Vec<u8>| v.len())
            .build()
    }

    #[test_log::test]
    fn test_insert_get_replace() {
        let c = cache(100, 0.5);
        c.insert("a", vec![1; 10]);
        assert_eq!(c.get("a").as_deref(), Some(&vec![1; 10]));
        assert_eq!(c.usage(), 10);

        c.insert("a", vec![2; 20]);
        assert_eq!(c.get("a").as_deref(), Some(&vec![2; 20]));
        assert_eq!(c.usage(), 20);
        assert_eq!(c.len(), 1);
        assert!(c.get("b").is_none());

        let stats = c.statistics().snapshot();
        assert_eq!((stats.hits, stats.misses, stats.inserts), (2, 1, 2));
    }

    #[test_log::test]
    fn test_over_budget_evicts_oldest_fraction() {
        let c = cache(40, 0.5);
        for i in 0..4 {
            c.insert(format!("k{i}"), vec![0; 10]);
        }
        assert_eq!(c.usage(), 40);

        // 50 > 40, unload round(5 * 0.5) = 2 oldest
        c.insert("k4", vec![0; 10]);
        assert_eq!(c.len(), 3);
        assert!(!c.contains("k0"));
        assert!(!c.contains("k1"));
        assert!(c.contains("k4"));
        assert_eq!(c.usage(), 30);
    }

    #[test_log::test]
    fn test_get_refreshes_age() {
        let c = cache(30, 0.34);
        c.insert("a", vec![0; 10]);
        c.insert("b", vec![0; 10]);
        c.insert("c", vec![0; 10]);
        c.get("a");

        c.insert("d", vec![0; 10]);
        assert!(c.contains("a"));
        assert!(!c.contains("b"));
    }

    #[test_log::test]
    fn test_pinned_entry_is_exempt() {
        let c = cache(1000, 1.0);
        c.insert("old", vec![0; 1]);
        c.insert("young", vec![0; 1]);

        let guard = c.pin("old");
        assert!(guard.is_pinned());
        assert_eq!(c.pins("old"), 1);

        assert_eq!(c.evict_fraction(rate(1.0)), 1);
        assert!(c.contains("old"));
        assert!(!c.contains("young"));

        drop(guard);
        assert_eq!(c.pins("old"), 0);
        assert_eq!(c.evict_fraction(rate(1.0)), 1);
        assert!(c.is_empty());
    }

    #[test_log::test]
    fn test_pins_are_reference_counted() {
        let c = cache(1000, 1.0);
        c.insert("tile", vec![0; 1]);

        let g1 = c.pin("tile");
        let g2 = c.get_pinned("tile").unwrap();
        assert_eq!(c.pins("tile"), 2);

        drop(g1);
        assert_eq!(c.evict_fraction(rate(1.0)), 0);
        drop(g2);
        assert_eq!(c.evict_fraction(rate(1.0)), 1);
    }

    #[test_log::test]
    fn test_pin_missing_key_is_noop() {
        let c = cache(1000, 1.0);
        let guard = c.pin("missing");
        assert!(!guard.is_pinned());
        drop(guard);

        // A guard that outlives its entry must not touch a new entry with the same key.
        c.insert("k", vec![0; 1]);
        let stale = c.pin("k");
        c.clear();
        c.insert("k", vec![0; 1]);
        let fresh = c.pin("k");
        drop(stale);
        assert_eq!(c.pins("k"), 1);
        drop(fresh);
        assert_eq!(c.pins("k"), 0);
    }

    #[test_log::test]
    fn test_clear_ignores_pins() {
        let recorder = Arc::new(Recorder::default());
        let c = MemoryCacheBuilder::new(1000)
            .with_weighter(|_, v: &Vec<u8>| v.len())
            .with_event_listener(recorder.clone())
            .build();
        c.insert("a", vec![0; 3]);
        c.insert("b", vec![0; 4]);
        let _guard = c.pin("a");

        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.usage(), 0);
        let mut events = recorder.events.lock().clone();
        events.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(events, vec![(Event::Clear, "a".to_string()), (Event::Clear, "b".to_string())]);
    }

    #[test_log::test]
    fn test_listener_sees_evict_replace_remove() {
        let recorder = Arc::new(Recorder::default());
        let c = MemoryCacheBuilder::new(2)
            .with_unload_rate(rate(0.5))
            .with_event_listener(recorder.clone())
            .build();
        c.insert("a", vec![]);
        c.insert("a", vec![]);
        c.insert("b", vec![]);
        c.insert("c", vec![]);
        c.remove("c");

        assert_eq!(
            recorder.events.lock().clone(),
            vec![
                (Event::Replace, "a".to_string()),
                // 3 live > 2, unload round(3 * 0.5) = 2
                (Event::Evict, "a".to_string()),
                (Event::Evict, "b".to_string()),
                (Event::Remove, "c".to_string()),
            ]
        );
    }

    #[test_log::test]
    fn test_batch_pins_every_hit() {
        let c = cache(1000, 1.0);
        c.insert("a", vec![1]);
        c.insert("b", vec![2]);

        let batch = c.get_pinned_batch(["a", "x", "b"]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].as_ref().map(|e| e.to_vec()), Some(vec![1]));
        assert!(batch[1].is_none());
        assert_eq!(c.pins("a"), 1);
        assert_eq!(c.pins("b"), 1);

        assert_eq!(c.evict_fraction(rate(1.0)), 0);
        drop(batch);
        assert_eq!(c.evict_fraction(rate(1.0)), 2);
    }

    #[test_log::test]
    fn test_repeated_pressure_converges() {
        let c = cache(1000, 0.1);
        for i in 0..50 {
            c.insert(format!("k{i}"), vec![0; 100]);
        }
        assert!(c.usage() <= 1000);

        let before = c.usage();
        c.evict_fraction(rate(0.1));
        assert!(c.usage() < before);
    }

    #[test_log::test]
    fn test_concurrent_pin_and_evict() {
        let c = cache(64, 0.5);
        let handles = (0..4)
            .map(|t| {
                let c = c.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    for i in 0..2000 {
                        let key = format!("k{}", rng.random_range(0..32));
                        match i % 3 {
                            0 => {
                                c.insert(key, vec![t as u8; 4]);
                            }
                            1 => {
                                if let Some(entry) = c.get_pinned(&key) {
                                    // Nothing may evict a pinned entry.
                                    c.evict_fraction(rate(1.0));
                                    assert!(c.contains(&key));
                                    assert_eq!(entry.len(), 4);
                                }
                            }
                            _ => {
                                let _guard = c.pin(&key);
                            }
                        }
                    }
                })
            })
            .collect_vec();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..32 {
            assert_eq!(c.pins(&format!("k{i}")), 0);
        }
        c.evict_fraction(rate(1.0));
        assert!(c.is_empty());
        assert_eq!(c.usage(), 0);
    }
}
