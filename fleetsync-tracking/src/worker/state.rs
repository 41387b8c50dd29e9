//! Phases of the sync loop and the counts each iteration reports.

use std::fmt;

use fleetsync_core::EntityId;

/// Phase the loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Between iterations.
    #[default]
    Idle,
    /// Pulling the primary feeds and refreshing caches.
    Fetching,
    /// Resolving record references.
    Hydrating,
    /// Routing records to devices and writing files.
    Distributing,
    /// Writing checkpoints.
    Persisting,
    /// Sleeping until the next iteration.
    Pacing,
    /// Stopped on request.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Hydrating => "hydrating",
            Self::Distributing => "distributing",
            Self::Persisting => "persisting",
            Self::Pacing => "pacing",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What one completed iteration did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IterationStats {
    /// Position reports fetched.
    pub gps_records: usize,
    /// Status readings fetched; zero when the feed is not needed.
    pub status_records: usize,
    /// Fault events fetched; zero when the feed is not needed.
    pub fault_records: usize,
    /// Records dropped by the tracking policy or diagnostic filter.
    pub dropped: usize,
    /// Devices that received new position reports.
    pub gps_devices: Vec<EntityId>,
    /// Devices that received new status readings.
    pub status_devices: Vec<EntityId>,
    /// Devices that received new fault events.
    pub fault_devices: Vec<EntityId>,
}

impl fmt::Display for IterationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} gps, {} status, {} fault record(s) fetched; {} dropped",
            self.gps_records, self.status_records, self.fault_records, self.dropped
        )?;
        for (label, devices) in [
            ("gps", &self.gps_devices),
            ("status", &self.status_devices),
            ("fault", &self.fault_devices),
        ] {
            if !devices.is_empty() {
                let ids: Vec<&str> = devices.iter().map(EntityId::as_str).collect();
                write!(f, "; new {label} data for {}", ids.join(", "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LoopState::Idle, "idle")]
    #[case(LoopState::Fetching, "fetching")]
    #[case(LoopState::Persisting, "persisting")]
    #[case(LoopState::Stopped, "stopped")]
    fn states_display_in_lowercase(#[case] state: LoopState, #[case] expected: &str) {
        assert_eq!(state.to_string(), expected);
    }

    #[rstest]
    fn stats_name_devices_with_new_data() {
        let stats = IterationStats {
            gps_records: 2,
            gps_devices: vec![EntityId::from("b1"), EntityId::from("b2")],
            ..IterationStats::default()
        };
        assert_eq!(
            stats.to_string(),
            "2 gps, 0 status, 0 fault record(s) fetched; 0 dropped; new gps data for b1, b2"
        );
    }
}
