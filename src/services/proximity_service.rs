use crate::dto::attendance_dto::ProximityReading;

/// Acceptance thresholds for a submitted Bluetooth reading. Values come
/// from configuration, never hardcoded at call sites.
#[derive(Debug, Clone)]
pub struct ProximityPolicy {
    pub signal_floor_dbm: i32,
    pub signal_ceiling_dbm: i32,
    pub distance_ceiling_m: f64,
}

impl ProximityPolicy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            signal_floor_dbm: config.signal_floor_dbm,
            signal_ceiling_dbm: config.signal_ceiling_dbm,
            distance_ceiling_m: config.distance_ceiling_m,
        }
    }

    /// Pure scorer. A reading is an untrusted client claim: the RSSI band
    /// and the distance ceiling must each pass on their own, so a good RSSI
    /// cannot paper over a contradictory computed distance.
    pub fn score(&self, reading: Option<&ProximityReading>) -> Result<(), String> {
        let Some(reading) = reading else {
            return Err("no proximity reading supplied".to_string());
        };

        if reading.rssi < self.signal_floor_dbm {
            return Err(format!(
                "signal too weak ({} dBm, floor is {} dBm)",
                reading.rssi, self.signal_floor_dbm
            ));
        }
        if reading.rssi > self.signal_ceiling_dbm {
            return Err(format!(
                "signal implausibly strong ({} dBm, ceiling is {} dBm)",
                reading.rssi, self.signal_ceiling_dbm
            ));
        }
        if reading.distance > self.distance_ceiling_m {
            return Err(format!(
                "estimated distance {:.1} m exceeds {:.1} m",
                reading.distance, self.distance_ceiling_m
            ));
        }

        Ok(())
    }

    /// Audit flags for readings that passed but sit near a threshold.
    /// Stored on the record for teacher review, never used to reject.
    pub fn audit_flags(&self, reading: &ProximityReading) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if reading.rssi <= self.signal_floor_dbm + 5 {
            flags.push("weak_signal");
        }
        if reading.distance >= self.distance_ceiling_m * 0.8 {
            flags.push("suspicious_distance");
        }
        flags
    }
}
