//! Network device sysfs access
//!
//! Layout under the net class root (normally `/sys/class/net`):
//!
//! ```text
//! <dev>/device/config                 PCI configuration space
//! <dev>/device/subsystem_device       PCI subsystem device ID
//! <dev>/device/ptp/<phc>/pins/<pin>   pin function
//! <dev>/device/ptp/<phc>/period       periodic output (SDP pins)
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use lp_core::constants::paths;
use lp_core::ConfigSpaceSource;
use lp_error::{PtpError, Result};
use lp_protocol::validate_sysfs_component;

use crate::constants::SDP_PREFIX;

fn validated(component: &str) -> Result<&str> {
    validate_sysfs_component(component).map_err(|reason| PtpError::invalid_path(component, reason))?;
    Ok(component)
}

/// Path a pin value is written to.
///
/// `SDP*` pins drive the PHC's periodic output; every other pin has its own
/// file under `pins/`.
pub fn pin_path(root: &Path, device: &str, phc: &str, pin: &str) -> Result<PathBuf> {
    let phc_dir = root
        .join(validated(device)?)
        .join("device")
        .join("ptp")
        .join(validated(phc)?);
    if pin.starts_with(SDP_PREFIX) {
        Ok(phc_dir.join("period"))
    } else {
        Ok(phc_dir.join("pins").join(validated(pin)?))
    }
}

/// Network device tree rooted at the net class directory
#[derive(Debug, Clone)]
pub struct SysfsNet {
    root: PathBuf,
}

impl Default for SysfsNet {
    fn default() -> Self {
        Self::new(paths::SYS_CLASS_NET)
    }
}

impl SysfsNet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, device: &str) -> Result<PathBuf> {
        Ok(self.root.join(validated(device)?).join("device"))
    }

    /// Network device names, sorted
    pub fn list_devices(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| PtpError::FileRead {
            path: self.root.clone(),
            source: e,
        })?;
        let mut devices: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        devices.sort();
        Ok(devices)
    }

    /// PCI subsystem device ID, trimmed
    pub fn subsystem_device(&self, device: &str) -> Result<String> {
        let path = self.device_dir(device)?.join("subsystem_device");
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| PtpError::FileRead { path, source: e })
    }

    /// PHC directories (`ptp*`) under a device, sorted
    pub fn list_phcs(&self, device: &str) -> Result<Vec<String>> {
        let dir = self.device_dir(device)?.join("ptp");
        let entries = fs::read_dir(&dir).map_err(|e| PtpError::FileRead {
            path: dir.clone(),
            source: e,
        })?;
        let mut phcs: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("ptp"))
            .collect();
        phcs.sort();
        Ok(phcs)
    }

    pub fn has_pin(&self, device: &str, phc: &str, pin: &str) -> bool {
        pin_path(&self.root, device, phc, pin)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Write one pin value on one PHC
    pub fn write_pin(&self, device: &str, phc: &str, pin: &str, value: &str) -> Result<()> {
        let path = pin_path(&self.root, device, phc, pin)?;
        info!(path = %path.display(), value = %value, "Writing pin");
        fs::write(&path, value).map_err(|e| PtpError::FileWrite { path, source: e })
    }

    /// Write a pin value on every PHC of a device.
    ///
    /// Per-PHC failures are logged and skipped; returns the number of PHCs
    /// written. Fails only if the PHC directory cannot be listed.
    pub fn write_pin_all_phcs(&self, device: &str, pin: &str, value: &str) -> Result<usize> {
        let mut written = 0;
        for phc in self.list_phcs(device)? {
            match self.write_pin(device, &phc, pin, value) {
                Ok(()) => written += 1,
                Err(e) => error!(device = %device, pin = %pin, value = %value, error = %e, "Pin write failed"),
            }
        }
        debug!(device = %device, pin = %pin, written, "Pin applied");
        Ok(written)
    }
}

impl ConfigSpaceSource for SysfsNet {
    fn read_config_space(&self, device: &str) -> io::Result<Vec<u8>> {
        let dir = self
            .device_dir(device)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        fs::read(dir.join("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_device(root: &Path, device: &str, subsystem: &str, phcs: &[&str], pins: &[&str]) {
        let dev = root.join(device).join("device");
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("subsystem_device"), format!("{}\n", subsystem)).unwrap();
        for phc in phcs {
            let pin_dir = dev.join("ptp").join(phc).join("pins");
            fs::create_dir_all(&pin_dir).unwrap();
            fs::write(dev.join("ptp").join(phc).join("period"), "").unwrap();
            for pin in pins {
                fs::write(pin_dir.join(pin), "").unwrap();
            }
        }
    }

    #[test]
    fn test_pin_path_routes_sdp_to_period() {
        let root = Path::new("/sys/class/net");
        assert_eq!(
            pin_path(root, "ens1f0", "ptp1", "SDP20").unwrap(),
            PathBuf::from("/sys/class/net/ens1f0/device/ptp/ptp1/period")
        );
        assert_eq!(
            pin_path(root, "ens1f0", "ptp1", "SMA1").unwrap(),
            PathBuf::from("/sys/class/net/ens1f0/device/ptp/ptp1/pins/SMA1")
        );
    }

    #[test]
    fn test_pin_path_rejects_traversal() {
        let root = Path::new("/sys/class/net");
        assert!(pin_path(root, "../etc", "ptp1", "SMA1").is_err());
        assert!(pin_path(root, "ens1f0", "ptp1", "../../x").is_err());
    }

    #[test]
    fn test_list_phcs_and_write() {
        let tmp = TempDir::new().unwrap();
        fake_device(tmp.path(), "ens1f0", "0x000e", &["ptp1", "ptp2"], &["SMA1"]);
        fs::create_dir_all(tmp.path().join("ens1f0/device/ptp/other")).unwrap();

        let sysfs = SysfsNet::new(tmp.path());
        assert_eq!(sysfs.list_phcs("ens1f0").unwrap(), vec!["ptp1", "ptp2"]);
        assert_eq!(sysfs.subsystem_device("ens1f0").unwrap(), "0x000e");
        assert!(sysfs.has_pin("ens1f0", "ptp1", "SMA1"));
        assert!(!sysfs.has_pin("ens1f0", "ptp1", "U.FL2"));

        assert_eq!(sysfs.write_pin_all_phcs("ens1f0", "SMA1", "1 1").unwrap(), 2);
        let written = fs::read_to_string(tmp.path().join("ens1f0/device/ptp/ptp2/pins/SMA1")).unwrap();
        assert_eq!(written, "1 1");
    }

    #[test]
    fn test_write_without_ptp_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let sysfs = SysfsNet::new(tmp.path());
        assert!(sysfs.write_pin_all_phcs("ens9f0", "SMA1", "1 1").is_err());
    }

    #[test]
    fn test_read_config_space() {
        let tmp = TempDir::new().unwrap();
        fake_device(tmp.path(), "ens1f0", "0x000e", &[], &[]);
        fs::write(tmp.path().join("ens1f0/device/config"), [1u8, 2, 3]).unwrap();

        let sysfs = SysfsNet::new(tmp.path());
        assert_eq!(sysfs.read_config_space("ens1f0").unwrap(), vec![1, 2, 3]);
        assert!(sysfs.read_config_space("missing").is_err());
    }
}
