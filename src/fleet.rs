//! Device fleet generation for a site.

use serde::{Deserialize, Serialize};

/// A simulated device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier (e.g., "device-0001")
    pub id: String,

    /// Site the device belongs to
    pub site: String,
}

/// Generates `count` devices with sequential identifiers for one site.
pub fn generate_fleet(site: &str, count: usize) -> Vec<Device> {
    (1..=count)
        .map(|i| Device {
            id: format!("device-{:04}", i),
            site: site.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fleet() {
        let fleet = generate_fleet("plant-a", 100);
        assert_eq!(fleet.len(), 100);

        for (i, device) in fleet.iter().enumerate() {
            assert_eq!(device.id, format!("device-{:04}", i + 1));
            assert_eq!(device.site, "plant-a");
        }
    }

    #[test]
    fn test_empty_fleet() {
        assert!(generate_fleet("plant-a", 0).is_empty());
    }
}
