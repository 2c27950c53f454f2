//! Prometheus gauges for clock telemetry
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `ptp_offset_ns` | `from`, `process`, `node`, `iface` |
//! | `ptp_max_offset_ns` | `from`, `process`, `node`, `iface` |
//! | `ptp_frequency_adjustment_ns` | `from`, `process`, `node`, `iface` |
//! | `ptp_delay_ns` | `from`, `process`, `node`, `iface` |
//! | `ptp_clock_state` | `process`, `node`, `iface` |
//! | `ptp_clock_class` | `process`, `node` |
//!
//! The registry is owned by the daemon and handed to the tracker; nothing
//! here is process-global.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::constants::{metrics as names, process as proc_const};
use crate::parser::{ClockSource, SyncState};
use crate::{PtpError, Result};

fn metrics_err(e: prometheus::Error) -> PtpError {
    PtpError::Metrics(e.to_string())
}

/// Interface label for a process's metrics.
///
/// ts2phc reports per NIC port; its series are labelled by NIC with the
/// port digit masked (`ens2f0` -> `ens2fx`).
pub fn interface_alias(process: &str, interface: &str) -> String {
    if process == proc_const::TS2PHC && interface != proc_const::MASTER {
        let mut chars: Vec<char> = interface.chars().collect();
        if let Some(last) = chars.last_mut() {
            *last = 'x';
        }
        return chars.into_iter().collect();
    }
    interface.to_string()
}

/// Gauge vectors for one node
#[derive(Clone)]
pub struct PtpMetrics {
    node: String,
    offset: GaugeVec,
    max_offset: GaugeVec,
    frequency_adjustment: GaugeVec,
    delay: GaugeVec,
    clock_state: GaugeVec,
    clock_class: GaugeVec,
}

impl PtpMetrics {
    /// Create the gauges and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if a metric of the same name is already registered.
    pub fn new(registry: &Registry, node: impl Into<String>) -> Result<Self> {
        let sample_labels = &[names::LABEL_FROM, names::LABEL_PROCESS, names::LABEL_NODE, names::LABEL_IFACE];

        let offset = gauge(registry, names::OFFSET, "Offset between the clock and its reference", sample_labels)?;
        let max_offset = gauge(registry, names::MAX_OFFSET, "Most recent maximum offset", sample_labels)?;
        let frequency_adjustment = gauge(
            registry,
            names::FREQUENCY_ADJUSTMENT,
            "Frequency adjustment applied to the clock",
            sample_labels,
        )?;
        let delay = gauge(registry, names::DELAY, "Path delay to the reference", sample_labels)?;
        let clock_state = gauge(
            registry,
            names::CLOCK_STATE,
            "Clock state: 0 = FREERUN, 1 = LOCKED, 2 = HOLDOVER",
            &[names::LABEL_PROCESS, names::LABEL_NODE, names::LABEL_IFACE],
        )?;
        let clock_class = gauge(
            registry,
            names::CLOCK_CLASS,
            "Clock class announced by the process",
            &[names::LABEL_PROCESS, names::LABEL_NODE],
        )?;

        Ok(Self {
            node: node.into(),
            offset,
            max_offset,
            frequency_adjustment,
            delay,
            clock_state,
            clock_class,
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Set the four per-sample gauges for one (source, process, interface)
    pub fn set_sample(
        &self,
        source: ClockSource,
        process: &str,
        iface: &str,
        offset: i64,
        max_offset: i64,
        frequency_adjustment: i64,
        delay: i64,
    ) {
        let labels = [source.label(), process, self.node.as_str(), iface];
        self.offset.with_label_values(&labels).set(offset as f64);
        self.max_offset.with_label_values(&labels).set(max_offset as f64);
        self.frequency_adjustment
            .with_label_values(&labels)
            .set(frequency_adjustment as f64);
        self.delay.with_label_values(&labels).set(delay as f64);
    }

    pub fn set_clock_state(&self, process: &str, iface: &str, state: SyncState) {
        self.clock_state
            .with_label_values(&[process, self.node.as_str(), iface])
            .set(state.gauge_value());
    }

    pub fn set_clock_class(&self, process: &str, clock_class: u8) {
        self.clock_class
            .with_label_values(&[process, self.node.as_str()])
            .set(f64::from(clock_class));
    }

    /// Delete every series for one (process, interface)
    pub fn remove_interface(&self, process: &str, iface: &str) {
        for source in [ClockSource::Phc, ClockSource::Master] {
            let labels = [source.label(), process, self.node.as_str(), iface];
            // Absent series are not an error worth reporting
            let _ = self.offset.remove_label_values(&labels);
            let _ = self.max_offset.remove_label_values(&labels);
            let _ = self.frequency_adjustment.remove_label_values(&labels);
            let _ = self.delay.remove_label_values(&labels);
        }
        let _ = self
            .clock_state
            .remove_label_values(&[process, self.node.as_str(), iface]);
    }

    pub fn remove_clock_class(&self, process: &str) {
        let _ = self.clock_class.remove_label_values(&[process, self.node.as_str()]);
    }

    fn sample_labels<'a>(&'a self, source: ClockSource, process: &'a str, iface: &'a str) -> [(&'a str, &'a str); 4] {
        [
            (names::LABEL_FROM, source.label()),
            (names::LABEL_PROCESS, process),
            (names::LABEL_NODE, self.node.as_str()),
            (names::LABEL_IFACE, iface),
        ]
    }

    /// Current offset gauge value, if the series exists
    pub fn offset_value(&self, source: ClockSource, process: &str, iface: &str) -> Option<f64> {
        read(&self.offset, &self.sample_labels(source, process, iface))
    }

    pub fn max_offset_value(&self, source: ClockSource, process: &str, iface: &str) -> Option<f64> {
        read(&self.max_offset, &self.sample_labels(source, process, iface))
    }

    pub fn frequency_adjustment_value(&self, source: ClockSource, process: &str, iface: &str) -> Option<f64> {
        read(&self.frequency_adjustment, &self.sample_labels(source, process, iface))
    }

    pub fn delay_value(&self, source: ClockSource, process: &str, iface: &str) -> Option<f64> {
        read(&self.delay, &self.sample_labels(source, process, iface))
    }

    pub fn clock_state_value(&self, process: &str, iface: &str) -> Option<f64> {
        read(
            &self.clock_state,
            &[
                (names::LABEL_PROCESS, process),
                (names::LABEL_NODE, self.node.as_str()),
                (names::LABEL_IFACE, iface),
            ],
        )
    }

    pub fn clock_class_value(&self, process: &str) -> Option<f64> {
        read(
            &self.clock_class,
            &[(names::LABEL_PROCESS, process), (names::LABEL_NODE, self.node.as_str())],
        )
    }
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help), labels).map_err(metrics_err)?;
    registry.register(Box::new(vec.clone())).map_err(metrics_err)?;
    Ok(vec)
}

/// Read a series without creating it
fn read(vec: &GaugeVec, labels: &[(&str, &str)]) -> Option<f64> {
    use prometheus::core::Collector;

    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .find(|metric| {
            let pairs = metric.get_label();
            pairs.len() == labels.len()
                && labels.iter().all(|(name, value)| {
                    pairs
                        .iter()
                        .any(|p| p.get_name() == *name && p.get_value() == *value)
                })
        })
        .map(|metric| metric.get_gauge().get_value())
}

/// Daemon-owned registry bundling the PTP gauges
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    metrics: PtpMetrics,
}

impl MetricsRegistry {
    pub fn new(node: impl Into<String>) -> Result<Self> {
        let registry = Registry::new();
        let metrics = PtpMetrics::new(&registry, node)?;
        Ok(Self { registry, metrics })
    }

    pub fn metrics(&self) -> &PtpMetrics {
        &self.metrics
    }

    /// Encode all metrics in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(|e| PtpError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_alias() {
        assert_eq!(interface_alias("ts2phc", "ens2f0"), "ens2fx");
        assert_eq!(interface_alias("ts2phc", "master"), "master");
        assert_eq!(interface_alias("phc2sys", "CLOCK_REALTIME"), "CLOCK_REALTIME");
        assert_eq!(interface_alias("ts2phc", ""), "");
    }

    #[test]
    fn test_set_and_read_sample() {
        let registry = MetricsRegistry::new("node1").unwrap();
        let m = registry.metrics();
        m.set_sample(ClockSource::Phc, "phc2sys", "CLOCK_REALTIME", -10, -10, 8956, 508);
        assert_eq!(m.offset_value(ClockSource::Phc, "phc2sys", "CLOCK_REALTIME"), Some(-10.0));
        assert_eq!(m.delay_value(ClockSource::Phc, "phc2sys", "CLOCK_REALTIME"), Some(508.0));
        assert_eq!(m.offset_value(ClockSource::Master, "phc2sys", "CLOCK_REALTIME"), None);

        let text = registry.encode_text().unwrap();
        assert!(text.contains("ptp_frequency_adjustment_ns"));
        assert!(text.contains("node=\"node1\""));
    }

    #[test]
    fn test_remove_interface() {
        let registry = MetricsRegistry::new("node1").unwrap();
        let m = registry.metrics();
        m.set_sample(ClockSource::Master, "ts2phc", "ens2fx", 1, 1, 2, 0);
        m.set_clock_state("ts2phc", "ens2fx", SyncState::Locked);
        m.remove_interface("ts2phc", "ens2fx");
        assert_eq!(m.offset_value(ClockSource::Master, "ts2phc", "ens2fx"), None);
        assert_eq!(m.clock_state_value("ts2phc", "ens2fx"), None);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        PtpMetrics::new(&registry, "a").unwrap();
        assert!(PtpMetrics::new(&registry, "a").is_err());
    }
}
