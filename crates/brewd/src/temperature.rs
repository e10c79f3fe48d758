//! Periodic probe discovery and temperature polling, with keyed pub/sub
//! for subscribers that want to react to new probes or new readings.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::TemperatureManagerError;
use crate::sensor::{Clock, TemperatureSensorProvider};

/// Observed statistics for a single probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeStats {
    pub sensor_id: String,
    pub last_temp: i64,
    pub first_seen: u64,
    pub last_seen: u64,
    pub num_success: u64,
    pub num_errors: u64,
}

impl ProbeStats {
    fn new(sensor_id: String, now: u64) -> Self {
        Self {
            sensor_id,
            last_temp: -1,
            first_seen: now,
            last_seen: now,
            num_success: 0,
            num_errors: 0,
        }
    }
}

type StatsCallback = Arc<dyn Fn(&ProbeStats, &ProbeStats) + Send + Sync>;
type NewProbeCallback = Arc<dyn Fn(&str, &ProbeStats) + Send + Sync>;

struct ProbeData {
    known: HashMap<String, String>, // sensor_id -> manager_id
    stats: HashMap<String, ProbeStats>,
}

#[derive(Default)]
struct EventState {
    stats_listeners: HashMap<u64, StatsCallback>,
    new_probe_listeners: HashMap<u64, NewProbeCallback>,
    next_key: u64,
}

impl EventState {
    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }
}

/// Polls a [`TemperatureSensorProvider`] on a background thread and
/// publishes probe-discovery and reading events to subscribers.
pub struct TemperatureManager {
    provider: Arc<dyn TemperatureSensorProvider>,
    clock: Arc<dyn Clock>,
    update_frequency_ms: u64,
    update_probe_list_frequency_ms: u64,
    data: Mutex<ProbeData>,
    events: Mutex<EventState>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TemperatureManager {
    pub fn new(provider: Arc<dyn TemperatureSensorProvider>, clock: Arc<dyn Clock>) -> Self {
        Self::with_frequencies(provider, clock, 333, 15_000)
    }

    pub fn with_frequencies(
        provider: Arc<dyn TemperatureSensorProvider>,
        clock: Arc<dyn Clock>,
        update_frequency_ms: u64,
        update_probe_list_frequency_ms: u64,
    ) -> Self {
        Self {
            provider,
            clock,
            update_frequency_ms,
            update_probe_list_frequency_ms,
            data: Mutex::new(ProbeData { known: HashMap::new(), stats: HashMap::new() }),
            events: Mutex::new(EventState::default()),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn list_probes(&self) -> Vec<String> {
        self.data.lock().known.keys().cloned().collect()
    }

    pub fn get_probe_stats(&self, sensor_id: &str) -> Result<ProbeStats, TemperatureManagerError> {
        self.data
            .lock()
            .stats
            .get(sensor_id)
            .cloned()
            .ok_or_else(|| TemperatureManagerError::UnknownProbe(sensor_id.to_string()))
    }

    pub fn subscribe_stats<F>(&self, cb: F) -> u64
    where
        F: Fn(&ProbeStats, &ProbeStats) + Send + Sync + 'static,
    {
        let mut events = self.events.lock();
        let key = events.next_key();
        events.stats_listeners.insert(key, Arc::new(cb));
        key
    }

    pub fn unsubscribe_stats(&self, key: u64) {
        self.events.lock().stats_listeners.remove(&key);
    }

    pub fn subscribe_new_probe<F>(&self, cb: F) -> u64
    where
        F: Fn(&str, &ProbeStats) + Send + Sync + 'static,
    {
        let mut events = self.events.lock();
        let key = events.next_key();
        events.new_probe_listeners.insert(key, Arc::new(cb));
        key
    }

    pub fn unsubscribe_new_probe(&self, key: u64) {
        self.events.lock().new_probe_listeners.remove(&key);
    }

    /// Starts the polling worker. Idempotent: does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        *handle = Some(
            thread::Builder::new()
                .name("temperature-manager".into())
                .spawn(move || this.run())
                .expect("failed to spawn temperature manager worker"),
        );
    }

    /// Signals the worker to stop and waits for it to exit. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        let mut last_update = 0u64;
        let mut last_probe_list: Option<u64> = None;

        while self.running.load(Ordering::SeqCst) {
            let now = self.clock.now_ms();

            if now.saturating_sub(last_update) < self.update_frequency_ms {
                thread::sleep(Duration::from_millis(3));
                continue;
            }

            let should_rediscover = last_probe_list
                .map(|t| now.saturating_sub(t) >= self.update_probe_list_frequency_ms)
                .unwrap_or(true);
            if should_rediscover {
                match self.update_probe_list(now) {
                    Ok(()) => last_probe_list = Some(now),
                    Err(e) => tracing::warn!(error = %e, "temperature manager: probe discovery failed"),
                }
            }

            self.update_temperatures(now);
            last_update = now;
        }
    }

    fn update_probe_list(&self, now: u64) -> Result<(), crate::sensor::SensorError> {
        let discovered = self.provider.list_temperature_sensors()?;

        let mut newcomers = Vec::new();
        {
            let mut data = self.data.lock();
            for (manager_id, sensor_id) in discovered {
                if data.known.contains_key(&sensor_id) {
                    continue;
                }
                data.known.insert(sensor_id.clone(), manager_id.clone());
                let stats = ProbeStats::new(sensor_id.clone(), now);
                data.stats.insert(sensor_id.clone(), stats.clone());
                newcomers.push((sensor_id, stats));
            }
        }

        if newcomers.is_empty() {
            return Ok(());
        }

        // Snapshot the listener list out from under the event lock so
        // callbacks can call back into the manager without deadlocking.
        let listeners: Vec<NewProbeCallback> = {
            let events = self.events.lock();
            events.new_probe_listeners.values().cloned().collect()
        };

        for (sensor_id, stats) in &newcomers {
            for cb in &listeners {
                let result = panic::catch_unwind(AssertUnwindSafe(|| cb(sensor_id, stats)));
                if result.is_err() {
                    tracing::warn!(probe = %sensor_id, "temperature manager: new-probe subscriber panicked");
                }
            }
        }

        Ok(())
    }

    fn update_temperatures(&self, now: u64) {
        let probes: Vec<(String, String)> = {
            let data = self.data.lock();
            data.known.iter().map(|(sid, mid)| (mid.clone(), sid.clone())).collect()
        };

        for (manager_id, sensor_id) in probes {
            let Some(sensor) = self.provider.get_temperature_sensor(&manager_id, &sensor_id) else {
                continue;
            };

            let Some(before) = self.data.lock().stats.get(&sensor_id).cloned() else {
                continue;
            };

            let after = match sensor.get_temperature() {
                Ok((milli_celsius, ts)) => {
                    let mut after = before.clone();
                    after.last_temp = milli_celsius;
                    after.last_seen = ts.max(now);
                    after.num_success += 1;
                    after
                }
                Err(e) => {
                    tracing::warn!(probe = %sensor_id, error = %e, "temperature manager: read failed");
                    let mut after = before.clone();
                    after.num_errors += 1;
                    after
                }
            };

            self.data.lock().stats.insert(sensor_id.clone(), after.clone());

            let listeners: Vec<StatsCallback> = {
                let events = self.events.lock();
                events.stats_listeners.values().cloned().collect()
            };
            for cb in &listeners {
                let result = panic::catch_unwind(AssertUnwindSafe(|| cb(&before, &after)));
                if result.is_err() {
                    tracing::warn!(probe = %sensor_id, "temperature manager: stats subscriber panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::TemperatureSensor;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    struct FixedClock(AtomicU64);
    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct OneProbeSensor;
    impl TemperatureSensor for OneProbeSensor {
        fn get_temperature(&self) -> Result<(i64, u64), crate::sensor::SensorError> {
            Ok((65_000, 0))
        }
    }

    struct OneProbeProvider;
    impl TemperatureSensorProvider for OneProbeProvider {
        fn list_temperature_sensors(&self) -> Result<BTreeSet<(String, String)>, crate::sensor::SensorError> {
            let mut set = BTreeSet::new();
            set.insert(("onewire".to_string(), "probe-1".to_string()));
            Ok(set)
        }

        fn get_temperature_sensor(
            &self,
            _manager_id: &str,
            _sensor_id: &str,
        ) -> Option<Box<dyn TemperatureSensor>> {
            Some(Box::new(OneProbeSensor))
        }
    }

    #[test]
    fn discovery_populates_stats_with_initial_values() {
        let clock = Arc::new(FixedClock(AtomicU64::new(1000)));
        let manager = TemperatureManager::new(Arc::new(OneProbeProvider), clock);
        manager.update_probe_list(1000).unwrap();

        let stats = manager.get_probe_stats("probe-1").unwrap();
        assert_eq!(stats.last_temp, -1);
        assert_eq!(stats.num_success, 0);
        assert_eq!(stats.first_seen, 1000);
    }

    #[test]
    fn unknown_probe_stats_lookup_fails() {
        let clock = Arc::new(FixedClock(AtomicU64::new(0)));
        let manager = TemperatureManager::new(Arc::new(OneProbeProvider), clock);
        assert_eq!(
            manager.get_probe_stats("nope").unwrap_err(),
            TemperatureManagerError::UnknownProbe("nope".into())
        );
    }

    #[test]
    fn update_after_discovery_fires_stats_callback() {
        let clock = Arc::new(FixedClock(AtomicU64::new(0)));
        let manager = TemperatureManager::new(Arc::new(OneProbeProvider), clock);
        manager.update_probe_list(0).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager.subscribe_stats(move |_before, after| {
            assert_eq!(after.last_temp, 65_000);
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager.update_temperatures(0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = manager.get_probe_stats("probe-1").unwrap();
        assert_eq!(stats.last_temp, 65_000);
        assert_eq!(stats.num_success, 1);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_others() {
        let clock = Arc::new(FixedClock(AtomicU64::new(0)));
        let manager = TemperatureManager::new(Arc::new(OneProbeProvider), clock);
        manager.update_probe_list(0).unwrap();

        manager.subscribe_stats(|_, _| panic!("boom"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager.subscribe_stats(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager.update_temperatures(0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
