//! PCI extended capability walk
//!
//! Hardware clocks are identified by the Device Serial Number capability in
//! their PCI configuration space. Extended capability records start right
//! after the 256-byte legacy header and form a linked list:
//!
//! ```text
//! offset+0  u16  capability id
//! offset+2  u16  next offset << 4 | version
//! offset+4  u64  serial number (DSN records only)
//! ```
//!
//! All fields are little-endian.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::constants::pci;
use crate::{PtpError, Result};

/// 64-bit hardware clock identity; zero means unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClockIdentity(pub u64);

impl ClockIdentity {
    pub const UNRESOLVED: ClockIdentity = ClockIdentity(0);

    pub fn is_resolved(self) -> bool {
        self != Self::UNRESOLVED
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Extract the Device Serial Number from a configuration space image.
///
/// # Errors
///
/// Fails when the chain ends (id 0 or next pointer 0) before a DSN record,
/// when an offset leaves the buffer, or when the chain loops.
pub fn dsn_from_config_space(device: &str, config: &[u8]) -> Result<u64> {
    let walk_error = |reason: String| PtpError::CapabilityWalk {
        device: device.to_string(),
        reason,
    };

    let mut offset = pci::CFG_SPACE_SIZE;
    for _ in 0..pci::MAX_EXT_CAP_RECORDS {
        let id = read_u16(config, offset)
            .ok_or_else(|| walk_error(format!("capability header at {:#x} is out of bounds", offset)))?;
        let next = read_u16(config, offset + pci::EXT_CAP_NEXT_OFFSET)
            .ok_or_else(|| walk_error(format!("next pointer at {:#x} is out of bounds", offset)))?
            >> pci::EXT_CAP_OFFSET_SHIFT;

        if id == pci::EXT_CAP_ID_DSN {
            return read_u64(config, offset + pci::EXT_CAP_DATA_OFFSET)
                .ok_or_else(|| walk_error(format!("serial number at {:#x} is out of bounds", offset)));
        }
        if id == 0 {
            return Err(walk_error(format!("empty capability record at {:#x}", offset)));
        }
        if next == 0 {
            return Err(walk_error("no serial number capability".to_string()));
        }
        debug!(device = %device, id, offset, next, "Skipping extended capability");
        offset = usize::from(next);
    }

    Err(walk_error("capability chain does not terminate".to_string()))
}

/// Source of per-device configuration space images
pub trait ConfigSpaceSource: Send + Sync {
    fn read_config_space(&self, device: &str) -> io::Result<Vec<u8>>;
}

/// Resolves and caches clock identities per device for one configuration
/// generation. Failures are not cached.
pub struct ClockIdResolver {
    source: Arc<dyn ConfigSpaceSource>,
    cache: Mutex<HashMap<String, ClockIdentity>>,
}

impl ClockIdResolver {
    pub fn new(source: Arc<dyn ConfigSpaceSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Identity of `device`, or [`ClockIdentity::UNRESOLVED`] on failure
    pub fn resolve(&self, device: &str) -> ClockIdentity {
        if let Some(id) = self.cache.lock().get(device) {
            return *id;
        }

        let config = match self.source.read_config_space(device) {
            Ok(config) => config,
            Err(e) => {
                warn!(device = %device, error = %e, "Failed to read PCI config space");
                return ClockIdentity::UNRESOLVED;
            }
        };

        match dsn_from_config_space(device, &config) {
            Ok(dsn) if dsn != 0 => {
                let id = ClockIdentity(dsn);
                self.cache.lock().insert(device.to_string(), id);
                debug!(device = %device, clock_id = %id, "Resolved clock identity");
                id
            }
            Ok(_) => {
                warn!(device = %device, "Device serial number is zero");
                ClockIdentity::UNRESOLVED
            }
            Err(e) => {
                warn!(error = %e, "Clock identity unavailable");
                ClockIdentity::UNRESOLVED
            }
        }
    }

    /// Forget cached identities; called when a new configuration is applied
    pub fn new_generation(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Build a config space with records at the given offsets
    fn config_space(records: &[(usize, u16, usize)]) -> Vec<u8> {
        let mut buf = vec![0u8; pci::CFG_SPACE_EXP_SIZE];
        for &(offset, id, next) in records {
            buf[offset..offset + 2].copy_from_slice(&id.to_le_bytes());
            let next_word = ((next as u16) << 4) | 0x1;
            buf[offset + 2..offset + 4].copy_from_slice(&next_word.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_dsn_found_after_chain() {
        let mut buf = config_space(&[(0x100, 0x0001, 0x148), (0x148, 0x000e, 0x1a0), (0x1a0, 3, 0)]);
        buf[0x1a4..0x1ac].copy_from_slice(&0x5070_69ff_ff0a_9b3cu64.to_le_bytes());
        assert_eq!(dsn_from_config_space("ens1f0", &buf).unwrap(), 0x5070_69ff_ff0a_9b3c);
    }

    #[test]
    fn test_dsn_at_first_record() {
        let mut buf = config_space(&[(0x100, 3, 0)]);
        buf[0x104..0x10c].copy_from_slice(&42u64.to_le_bytes());
        assert_eq!(dsn_from_config_space("ens1f0", &buf).unwrap(), 42);
    }

    #[test]
    fn test_chain_without_dsn_fails() {
        let buf = config_space(&[(0x100, 0x0001, 0x148), (0x148, 0x000e, 0)]);
        let err = dsn_from_config_space("ens1f0", &buf).unwrap_err();
        assert!(matches!(err, PtpError::CapabilityWalk { .. }));
    }

    #[test]
    fn test_truncated_buffers_fail() {
        assert!(dsn_from_config_space("x", &[0u8; 64]).is_err());
        assert!(dsn_from_config_space("x", &[0u8; 257]).is_err());

        // DSN header present but serial runs past the end
        let mut buf = vec![0u8; 0x108];
        buf[0x100] = 3;
        assert!(dsn_from_config_space("x", &buf).is_err());

        // Next pointer leaves the buffer
        let mut short = config_space(&[(0x100, 0x0001, 0xff0)]);
        short.truncate(0x200);
        assert!(dsn_from_config_space("x", &short).is_err());
    }

    #[test]
    fn test_looping_chain_terminates() {
        let buf = config_space(&[(0x100, 0x0001, 0x100)]);
        assert!(dsn_from_config_space("x", &buf).is_err());
    }

    #[test]
    fn test_walk_is_deterministic() {
        let mut buf = config_space(&[(0x100, 0x0001, 0x150), (0x150, 3, 0)]);
        buf[0x154..0x15c].copy_from_slice(&7u64.to_le_bytes());
        let copy = buf.clone();
        assert_eq!(dsn_from_config_space("a", &buf).unwrap(), dsn_from_config_space("a", &buf).unwrap());
        assert_eq!(buf, copy);
    }

    struct CountingSource {
        image: Vec<u8>,
        reads: AtomicUsize,
    }

    impl ConfigSpaceSource for CountingSource {
        fn read_config_space(&self, device: &str) -> io::Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if device == "missing" {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            Ok(self.image.clone())
        }
    }

    #[test]
    fn test_resolver_caches_per_generation() {
        let mut image = config_space(&[(0x100, 3, 0)]);
        image[0x104..0x10c].copy_from_slice(&99u64.to_le_bytes());
        let source = Arc::new(CountingSource {
            image,
            reads: AtomicUsize::new(0),
        });
        let resolver = ClockIdResolver::new(source.clone());

        assert_eq!(resolver.resolve("ens1f0"), ClockIdentity(99));
        assert_eq!(resolver.resolve("ens1f0"), ClockIdentity(99));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        resolver.new_generation();
        resolver.resolve("ens1f0");
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolver_returns_sentinel_on_failure() {
        let source = Arc::new(CountingSource {
            image: config_space(&[(0x100, 1, 0)]),
            reads: AtomicUsize::new(0),
        });
        let resolver = ClockIdResolver::new(source.clone());
        let id = resolver.resolve("ens1f0");
        assert_eq!(id, ClockIdentity::UNRESOLVED);
        assert!(!id.is_resolved());
        assert_eq!(resolver.resolve("missing"), ClockIdentity::UNRESOLVED);

        // Failures are retried
        resolver.resolve("ens1f0");
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
    }
}
