//! Clock state tracking
//!
//! One [`ClockState`] per (process, interface). The tracker passes through the
//! state each process reports and adds holdover bookkeeping on top: a clock
//! that stays in HOLDOVER longer than its process's holdover timeout is forced
//! to FREERUN, once per expiry.
//!
//! Locking: the key map sits behind an `RwLock` and every entry has its own
//! `Mutex`, so samples for different keys never contend and samples for the
//! same key apply in arrival order. Lock order is key map, then entry, then
//! the clock class table.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{interface_alias, PtpMetrics};
use crate::parser::{ClockSource, MetricSample, OffsetSample, SyncState};
use crate::process::{ClockThreshold, ProcessDescriptor};

/// Identity of a tracked clock
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClockKey {
    pub process: String,
    pub interface: String,
}

impl ClockKey {
    pub fn new(process: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            interface: interface.into(),
        }
    }
}

impl std::fmt::Display for ClockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.process, self.interface)
    }
}

/// Live state of one clock
#[derive(Debug, Clone, Serialize)]
pub struct ClockState {
    /// Last known state; `None` until a sample carries a state token
    pub state: Option<SyncState>,
    pub source: ClockSource,
    pub offset: i64,
    pub max_offset: i64,
    pub frequency_adjustment: i64,
    pub delay: i64,
    /// Whether the last offset fell within the process's thresholds
    pub offset_in_range: bool,
    #[serde(skip)]
    pub last_update: Instant,
    #[serde(skip)]
    pub last_locked: Option<Instant>,
    /// Start of the current holdover window
    #[serde(skip)]
    pub holdover_since: Option<Instant>,
    /// Set once the current holdover window has been forced to FREERUN
    pub holdover_expired: bool,
}

impl ClockState {
    fn new(source: ClockSource, now: Instant) -> Self {
        Self {
            state: None,
            source,
            offset: 0,
            max_offset: 0,
            frequency_adjustment: 0,
            delay: 0,
            offset_in_range: true,
            last_update: now,
            last_locked: None,
            holdover_since: None,
            holdover_expired: false,
        }
    }

    /// Time spent in the current holdover window
    pub fn holdover_elapsed(&self, now: Instant) -> Duration {
        self.holdover_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    fn apply_state(&mut self, reported: SyncState, now: Instant) {
        match reported {
            SyncState::Locked => {
                self.state = Some(SyncState::Locked);
                self.last_locked = Some(now);
                self.holdover_since = None;
                self.holdover_expired = false;
            }
            SyncState::Holdover => {
                if self.holdover_since.is_none() {
                    self.holdover_since = Some(self.last_locked.unwrap_or(now));
                }
                // An expired window stays FREERUN until the process relocks
                self.state = Some(if self.holdover_expired {
                    SyncState::Freerun
                } else {
                    SyncState::Holdover
                });
            }
            SyncState::Freerun => {
                self.state = Some(SyncState::Freerun);
                self.last_locked = None;
                self.holdover_since = None;
                self.holdover_expired = false;
            }
        }
    }

    /// Force FREERUN if the holdover window has outlived `timeout`.
    ///
    /// Returns true only on the call that performs the transition.
    fn expire_holdover(&mut self, timeout: Duration, now: Instant) -> bool {
        if self.state != Some(SyncState::Holdover) || self.holdover_expired {
            return false;
        }
        if self.holdover_elapsed(now) <= timeout {
            return false;
        }
        self.state = Some(SyncState::Freerun);
        self.holdover_expired = true;
        true
    }
}

/// Threshold and reported interfaces of one configured process
struct ConfiguredProcess {
    threshold: Arc<ClockThreshold>,
    interfaces: BTreeSet<String>,
}

/// Key map and the configuration it is keyed by, swapped together on reload
#[derive(Default)]
struct Clocks {
    states: HashMap<ClockKey, Arc<Mutex<ClockState>>>,
    processes: HashMap<String, ConfiguredProcess>,
}

impl Clocks {
    fn is_configured(&self, key: &ClockKey) -> bool {
        self.processes
            .get(&key.process)
            .is_some_and(|p| p.interfaces.contains(&key.interface))
    }

    fn threshold(&self, process: &str) -> Option<Arc<ClockThreshold>> {
        self.processes.get(process).map(|p| Arc::clone(&p.threshold))
    }
}

/// Per (process, interface) clock state machine feeding the metric gauges.
///
/// Only keys named by the current descriptor set are tracked; samples for
/// anything else are dropped. Gauge writes happen under the key-map read
/// lock, so a reload never races a write that would revive a removed series.
pub struct ClockStateTracker {
    metrics: PtpMetrics,
    clocks: RwLock<Clocks>,
    clock_classes: Mutex<BTreeMap<String, u8>>,
}

impl ClockStateTracker {
    pub fn new(metrics: PtpMetrics) -> Self {
        Self {
            metrics,
            clocks: RwLock::new(Clocks::default()),
            clock_classes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn metrics(&self) -> &PtpMetrics {
        &self.metrics
    }

    /// Apply a decoded sample; returns the key's resulting state
    pub fn observe(&self, sample: &MetricSample) -> Option<SyncState> {
        self.observe_at(sample, Instant::now())
    }

    pub fn observe_at(&self, sample: &MetricSample, now: Instant) -> Option<SyncState> {
        match sample {
            MetricSample::Offset(offset) => self.observe_offset(offset, now),
            MetricSample::ClockClass { process, clock_class } => {
                let clocks = self.clocks.read();
                if !clocks.processes.contains_key(process) {
                    debug!(process = %process, "Dropping clock class of unconfigured process");
                    return None;
                }
                self.clock_classes.lock().insert(process.clone(), *clock_class);
                self.metrics.set_clock_class(process, *clock_class);
                debug!(process = %process, clock_class, "Clock class updated");
                None
            }
        }
    }

    fn observe_offset(&self, sample: &OffsetSample, now: Instant) -> Option<SyncState> {
        let key = ClockKey::new(&sample.process, &sample.interface);
        loop {
            {
                let clocks = self.clocks.read();
                if !clocks.is_configured(&key) {
                    debug!(clock = %key, "Dropping sample for unconfigured interface");
                    return None;
                }
                if let Some(entry) = clocks.states.get(&key) {
                    let threshold = clocks.threshold(&key.process).unwrap_or_default();
                    return self.apply_offset(&key, entry, &threshold, sample, now);
                }
            }

            let mut clocks = self.clocks.write();
            if !clocks.is_configured(&key) {
                return None;
            }
            clocks
                .states
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ClockState::new(sample.source, now))));
        }
    }

    /// Update one entry and its gauges; the caller holds the key-map lock
    fn apply_offset(
        &self,
        key: &ClockKey,
        entry: &Mutex<ClockState>,
        threshold: &ClockThreshold,
        sample: &OffsetSample,
        now: Instant,
    ) -> Option<SyncState> {
        let iface = interface_alias(&sample.process, &sample.interface);

        let mut state = entry.lock();
        let previous = state.state;

        state.source = sample.source;
        state.offset = sample.offset;
        // Overwritten per sample, not a running maximum
        state.max_offset = sample.max_offset;
        state.frequency_adjustment = sample.frequency_adjustment;
        state.delay = sample.delay;
        state.last_update = now;
        state.offset_in_range = threshold.offset_in_range(sample.offset);

        if let Some(reported) = sample.state() {
            state.apply_state(reported, now);
        }
        let expired = state.expire_holdover(threshold.holdover_timeout, now);

        self.metrics.set_sample(
            sample.source,
            &sample.process,
            &iface,
            sample.offset,
            sample.max_offset,
            sample.frequency_adjustment,
            sample.delay,
        );
        if let Some(current) = state.state {
            self.metrics.set_clock_state(&sample.process, &iface, current);
        }

        if expired {
            warn!(clock = %key, "Holdover timeout exceeded, clock is free-running");
        } else if previous != state.state {
            if let Some(current) = state.state {
                info!(clock = %key, state = %current, "Clock state changed");
            }
        }
        if !state.offset_in_range {
            debug!(clock = %key, offset = sample.offset, "Offset outside thresholds");
        }

        state.state
    }

    /// Force every clock whose holdover window has outlived its timeout to
    /// FREERUN. Returns the keys that transitioned.
    pub fn expire_holdovers(&self, now: Instant) -> Vec<ClockKey> {
        let clocks = self.clocks.read();

        let mut expired = Vec::new();
        for (key, entry) in &clocks.states {
            let timeout = clocks.threshold(&key.process).unwrap_or_default().holdover_timeout;
            let mut state = entry.lock();
            if state.expire_holdover(timeout, now) {
                let iface = interface_alias(&key.process, &key.interface);
                self.metrics.set_clock_state(&key.process, &iface, SyncState::Freerun);
                warn!(clock = %key, "Holdover timeout exceeded, clock is free-running");
                expired.push(key.clone());
            }
        }
        expired.sort();
        expired
    }

    /// Swap in a new descriptor set.
    ///
    /// Thresholds and tracked interfaces are replaced wholesale. Clocks no
    /// longer reported by any descriptor are dropped along with their metric
    /// series; retained clocks keep their state.
    pub fn apply_descriptors(&self, descriptors: &[ProcessDescriptor]) -> Vec<ClockKey> {
        let mut clocks = self.clocks.write();

        clocks.processes.clear();
        for d in descriptors {
            let process = clocks
                .processes
                .entry(d.name.clone())
                .or_insert_with(|| ConfiguredProcess {
                    threshold: Arc::clone(&d.threshold),
                    interfaces: BTreeSet::new(),
                });
            process.interfaces.extend(d.interfaces.iter().cloned());
        }

        let Clocks { states, processes } = &mut *clocks;
        let mut removed = Vec::new();
        states.retain(|key, _| {
            let keep = processes
                .get(&key.process)
                .is_some_and(|p| p.interfaces.contains(&key.interface));
            if !keep {
                removed.push(key.clone());
            }
            keep
        });

        // Several interfaces may share one alias; keep series still in use
        let live_aliases: BTreeSet<(String, String)> = states
            .keys()
            .map(|k| (k.process.clone(), interface_alias(&k.process, &k.interface)))
            .collect();
        for key in &removed {
            let alias = interface_alias(&key.process, &key.interface);
            if !live_aliases.contains(&(key.process.clone(), alias.clone())) {
                self.metrics.remove_interface(&key.process, &alias);
            }
        }

        self.clock_classes.lock().retain(|process, _| {
            let keep = processes.contains_key(process);
            if !keep {
                self.metrics.remove_clock_class(process);
            }
            keep
        });

        removed.sort();
        for key in &removed {
            info!(clock = %key, "Removed clock no longer in configuration");
        }
        removed
    }

    /// Copy of one clock's state
    pub fn get(&self, key: &ClockKey) -> Option<ClockState> {
        self.clocks.read().states.get(key).map(|entry| entry.lock().clone())
    }

    /// Last clock class reported by a process
    pub fn clock_class(&self, process: &str) -> Option<u8> {
        self.clock_classes.lock().get(process).copied()
    }

    /// Copy of every clock's state, ordered by key
    pub fn snapshot(&self) -> BTreeMap<ClockKey, ClockState> {
        self.clocks
            .read()
            .states
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clocks.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.read().states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::parser::parse;

    fn tracker() -> (MetricsRegistry, ClockStateTracker) {
        let registry = MetricsRegistry::new("node1").unwrap();
        let tracker = ClockStateTracker::new(registry.metrics().clone());
        tracker.apply_descriptors(&[
            descriptor("ts2phc", &["ens2f0", "ens2f1", "ens3f0"], 5),
            descriptor("phc2sys", &["CLOCK_REALTIME"], 5),
            descriptor("ptp4l", &["master"], 5),
        ]);
        (registry, tracker)
    }

    fn ts2phc_iface_line(iface: &str, offset: i64, token: &str) -> MetricSample {
        let line = format!(
            "ts2phc[1896327.319]: [ts2phc.0.config] {} master offset {} {} freq -2",
            iface, offset, token
        );
        parse("ts2phc", &line).unwrap()
    }

    fn ts2phc_line(offset: i64, token: &str) -> MetricSample {
        let line = format!(
            "ts2phc[1896327.319]: [ts2phc.0.config] ens2f0 master offset {} {} freq -2",
            offset, token
        );
        parse("ts2phc", &line).unwrap()
    }

    fn descriptor(name: &str, interfaces: &[&str], holdover_secs: u64) -> ProcessDescriptor {
        ProcessDescriptor {
            name: name.to_string(),
            kind: crate::process::ProcessKind::from_name(name),
            message_tag: format!("[{}.0.config]", name),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            threshold: Arc::new(ClockThreshold {
                holdover_timeout: Duration::from_secs(holdover_secs),
                ..ClockThreshold::default()
            }),
            program: name.to_string(),
            args: Vec::new(),
            config_file: None,
        }
    }

    #[test]
    fn test_locked_sample_updates_gauges() {
        let (_registry, tracker) = tracker();
        let state = tracker.observe(&ts2phc_line(-1, "s2"));
        assert_eq!(state, Some(SyncState::Locked));

        let m = tracker.metrics();
        assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", "ens2fx"), Some(-1.0));
        assert_eq!(m.frequency_adjustment_value(ClockSource::Master, "ts2phc", "ens2fx"), Some(-2.0));
        assert_eq!(m.delay_value(ClockSource::Master, "ts2phc", "ens2fx"), Some(0.0));
        assert_eq!(m.clock_state_value("ts2phc", "ens2fx"), Some(1.0));

        let key = ClockKey::new("ts2phc", "ens2f0");
        assert_eq!(tracker.get(&key).unwrap().state, Some(SyncState::Locked));
    }

    #[test]
    fn test_first_sample_sets_initial_state() {
        let (_registry, tracker) = tracker();
        assert_eq!(tracker.observe(&ts2phc_line(3, "s0")), Some(SyncState::Freerun));
        assert_eq!(tracker.metrics().clock_state_value("ts2phc", "ens2fx"), Some(0.0));
    }

    #[test]
    fn test_reported_state_passes_through() {
        let (_registry, tracker) = tracker();
        let t0 = Instant::now();
        tracker.observe_at(&ts2phc_line(0, "s2"), t0);
        assert_eq!(tracker.observe_at(&ts2phc_line(40, "s1"), t0), Some(SyncState::Holdover));
        assert_eq!(tracker.metrics().clock_state_value("ts2phc", "ens2fx"), Some(2.0));
        assert_eq!(tracker.observe_at(&ts2phc_line(900, "s0"), t0), Some(SyncState::Freerun));
    }

    #[test]
    fn test_max_offset_is_overwritten() {
        let (_registry, tracker) = tracker();
        tracker.observe(&ts2phc_line(50, "s2"));
        tracker.observe(&ts2phc_line(-3, "s2"));
        let m = tracker.metrics();
        assert_eq!(m.max_offset_value(ClockSource::Master, "ts2phc", "ens2fx"), Some(-3.0));
    }

    #[test]
    fn test_holdover_expires_exactly_once() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        let key = ClockKey::new("ts2phc", "ens2f0");

        let t0 = Instant::now();
        tracker.observe_at(&ts2phc_line(0, "s2"), t0);
        tracker.observe_at(&ts2phc_line(10, "s1"), t0 + Duration::from_secs(1));

        assert!(tracker.expire_holdovers(t0 + Duration::from_secs(4)).is_empty());
        assert_eq!(tracker.expire_holdovers(t0 + Duration::from_secs(6)), vec![key.clone()]);
        assert!(tracker.expire_holdovers(t0 + Duration::from_secs(7)).is_empty());

        let state = tracker.get(&key).unwrap();
        assert_eq!(state.state, Some(SyncState::Freerun));
        assert!(state.holdover_expired);
        assert_eq!(tracker.metrics().clock_state_value("ts2phc", "ens2fx"), Some(0.0));

        // Continued HOLDOVER reports neither revive HOLDOVER nor re-expire
        let after = tracker.observe_at(&ts2phc_line(12, "s1"), t0 + Duration::from_secs(8));
        assert_eq!(after, Some(SyncState::Freerun));
        assert!(tracker.expire_holdovers(t0 + Duration::from_secs(20)).is_empty());
    }

    #[test]
    fn test_holdover_expires_on_sample() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        let t0 = Instant::now();
        tracker.observe_at(&ts2phc_line(0, "s2"), t0);
        let state = tracker.observe_at(&ts2phc_line(10, "s1"), t0 + Duration::from_secs(6));
        assert_eq!(state, Some(SyncState::Freerun));
        assert!(tracker.expire_holdovers(t0 + Duration::from_secs(7)).is_empty());
    }

    #[test]
    fn test_relock_resets_holdover() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        let key = ClockKey::new("ts2phc", "ens2f0");
        let t0 = Instant::now();
        tracker.observe_at(&ts2phc_line(0, "s2"), t0);
        tracker.observe_at(&ts2phc_line(0, "s1"), t0 + Duration::from_secs(1));
        tracker.expire_holdovers(t0 + Duration::from_secs(10));
        tracker.observe_at(&ts2phc_line(0, "s2"), t0 + Duration::from_secs(11));

        let state = tracker.get(&key).unwrap();
        assert_eq!(state.state, Some(SyncState::Locked));
        assert!(!state.holdover_expired);
        assert_eq!(state.holdover_elapsed(t0 + Duration::from_secs(30)), Duration::ZERO);

        tracker.observe_at(&ts2phc_line(0, "s1"), t0 + Duration::from_secs(12));
        assert_eq!(tracker.expire_holdovers(t0 + Duration::from_secs(18)), vec![key]);
    }

    #[test]
    fn test_sample_without_state_keeps_state() {
        let (_registry, tracker) = tracker();
        let line = "phc2sys[1.0]: [ptp4l.0.config] CLOCK_REALTIME phc offset 1 s2 freq +2 delay 3";
        tracker.observe(&parse("phc2sys", line).unwrap());
        let summary = "phc2sys[2.0]: [ptp4l.0.config] CLOCK_REALTIME rms 8 max 12 freq -3 +/- 4 delay 500 +/- 2";
        let result = tracker.observe(&parse("phc2sys", summary).unwrap());
        assert_eq!(result, Some(SyncState::Locked));
        let m = tracker.metrics();
        assert_eq!(m.max_offset_value(ClockSource::Phc, "phc2sys", "CLOCK_REALTIME"), Some(12.0));
    }

    #[test]
    fn test_offset_range_flag() {
        let (_registry, tracker) = tracker();
        tracker.observe(&ts2phc_line(500, "s2"));
        let state = tracker.get(&ClockKey::new("ts2phc", "ens2f0")).unwrap();
        assert!(!state.offset_in_range);
    }

    #[test]
    fn test_clock_class_is_per_process() {
        let (_registry, tracker) = tracker();
        let line = "ptp4l[5196819.100]: [ptp4l.0.config] CLOCK_CLASS_CHANGE 6";
        tracker.observe(&parse("ptp4l", line).unwrap());
        assert_eq!(tracker.clock_class("ptp4l"), Some(6));
        assert_eq!(tracker.metrics().clock_class_value("ptp4l"), Some(6.0));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reload_removes_dropped_interfaces() {
        let (_registry, tracker) = tracker();
        let t0 = Instant::now();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0", "ens3f0"], 5)]);
        tracker.observe_at(&ts2phc_line(-1, "s2"), t0);
        let other = "ts2phc[1.0]: [ts2phc.0.config] ens3f0 master offset 7 s2 freq 1";
        tracker.observe_at(&parse("ts2phc", other).unwrap(), t0);
        let before = tracker.get(&ClockKey::new("ts2phc", "ens2f0")).unwrap();

        let removed = tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        assert_eq!(removed, vec![ClockKey::new("ts2phc", "ens3f0")]);
        assert_eq!(tracker.len(), 1);

        let after = tracker.get(&ClockKey::new("ts2phc", "ens2f0")).unwrap();
        assert_eq!(after.offset, before.offset);
        assert_eq!(after.state, before.state);
        assert_eq!(after.last_update, before.last_update);

        let m = tracker.metrics();
        assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", "ens3fx"), None);
        assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", "ens2fx"), Some(-1.0));
    }

    #[test]
    fn test_reload_keeps_shared_alias_series() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0", "ens2f1"], 5)]);
        tracker.observe(&ts2phc_line(-1, "s2"));
        let sibling = "ts2phc[1.0]: [ts2phc.0.config] ens2f1 master offset 4 s2 freq 1";
        tracker.observe(&parse("ts2phc", sibling).unwrap());

        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        assert!(tracker.metrics().clock_state_value("ts2phc", "ens2fx").is_some());
    }

    #[test]
    fn test_reload_drops_clock_class_of_removed_process() {
        let (_registry, tracker) = tracker();
        let line = "ptp4l[5196819.100]: [ptp4l.0.config] CLOCK_CLASS_CHANGE 248";
        tracker.observe(&parse("ptp4l", line).unwrap());
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        assert_eq!(tracker.clock_class("ptp4l"), None);
        assert_eq!(tracker.metrics().clock_class_value("ptp4l"), None);
    }

    #[test]
    fn test_unconfigured_interface_is_ignored() {
        let (_registry, tracker) = tracker();
        assert_eq!(tracker.observe(&ts2phc_iface_line("ens9f0", 4, "s2")), None);
        assert!(tracker.get(&ClockKey::new("ts2phc", "ens9f0")).is_none());
        assert!(tracker.is_empty());
        assert_eq!(tracker.metrics().clock_state_value("ts2phc", "ens9fx"), None);
        assert_eq!(tracker.metrics().offset_value(ClockSource::Master, "ts2phc", "ens9fx"), None);
    }

    #[test]
    fn test_unconfigured_process_is_ignored() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);

        let offset = "phc2sys[1.0]: [ptp4l.0.config] CLOCK_REALTIME phc offset 1 s2 freq +2 delay 3";
        assert_eq!(tracker.observe(&parse("phc2sys", offset).unwrap()), None);
        let class = "ptp4l[5196819.100]: [ptp4l.0.config] CLOCK_CLASS_CHANGE 6";
        tracker.observe(&parse("ptp4l", class).unwrap());

        assert!(tracker.is_empty());
        assert_eq!(tracker.clock_class("ptp4l"), None);
        assert_eq!(tracker.metrics().clock_class_value("ptp4l"), None);
        assert_eq!(tracker.metrics().clock_state_value("phc2sys", "CLOCK_REALTIME"), None);
    }

    #[test]
    fn test_interface_added_on_reload_is_tracked() {
        let (_registry, tracker) = tracker();
        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0"], 5)]);
        assert_eq!(tracker.observe(&ts2phc_iface_line("ens3f0", 1, "s2")), None);

        tracker.apply_descriptors(&[descriptor("ts2phc", &["ens2f0", "ens3f0"], 5)]);
        assert_eq!(tracker.observe(&ts2phc_iface_line("ens3f0", 1, "s2")), Some(SyncState::Locked));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_reload_and_holdover_scan_leave_no_orphan_series() {
        let (_registry, tracker) = tracker();
        let full = [descriptor("ts2phc", &["ens2f0", "ens3f0"], 5)];
        let reduced = [descriptor("ts2phc", &["ens2f0"], 5)];
        let t0 = Instant::now();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    tracker.apply_descriptors(&full);
                    tracker.apply_descriptors(&reduced);
                }
            });
            scope.spawn(|| {
                for i in 0..500u64 {
                    let base = t0 + Duration::from_secs(i * 100);
                    tracker.observe_at(&ts2phc_iface_line("ens3f0", 1, "s2"), base);
                    tracker.observe_at(&ts2phc_iface_line("ens3f0", 1, "s1"), base);
                    tracker.expire_holdovers(base + Duration::from_secs(10));
                }
            });
        });

        // The reduced set was applied last, so ens3f0 must be gone everywhere
        let m = tracker.metrics();
        assert!(tracker.get(&ClockKey::new("ts2phc", "ens3f0")).is_none());
        assert_eq!(m.clock_state_value("ts2phc", "ens3fx"), None);
        assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", "ens3fx"), None);
    }

    #[test]
    fn test_concurrent_samples_keep_state_and_gauges_in_step() {
        let (_registry, tracker) = tracker();
        let ifaces = ["ens2f0", "ens3f0"];

        std::thread::scope(|scope| {
            for iface in ifaces {
                for writer in 0..4i64 {
                    let tracker = &tracker;
                    scope.spawn(move || {
                        for n in 0..250i64 {
                            tracker.observe(&ts2phc_iface_line(iface, writer * 1000 + n, "s2"));
                        }
                    });
                }
            }
        });

        assert_eq!(tracker.len(), 2);
        let m = tracker.metrics();
        for iface in ifaces {
            let state = tracker.get(&ClockKey::new("ts2phc", iface)).unwrap();
            assert_eq!(state.state, Some(SyncState::Locked));
            let alias = interface_alias("ts2phc", iface);
            assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", &alias), Some(state.offset as f64));
            assert_eq!(m.max_offset_value(ClockSource::Master, "ts2phc", &alias), Some(state.max_offset as f64));
        }
    }
}
