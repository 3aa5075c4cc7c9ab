use std::collections::{BTreeMap, BTreeSet};

/// Bookkeeping for one vehicle while it is in the network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VehicleRecord {
    /// Step at which the vehicle was last credited to a detector, or first seen
    pub last_credited_step: u64,
    pub last_credited_detector: Option<String>,
    pub stop_count: u32,
    pub is_stopped: bool,
    pub last_stop_step: Option<u64>,
}

impl VehicleRecord {
    fn new(step: u64) -> Self {
        Self {
            last_credited_step: step,
            last_credited_detector: None,
            stop_count: 0,
            is_stopped: false,
            last_stop_step: None,
        }
    }

    /// Penalty owed for the time since the last credit
    pub fn outstanding(&self, step: u64) -> f64 {
        step.saturating_sub(self.last_credited_step) as f64 + self.stop_count as f64
    }
}

/// Result of crediting a vehicle seen on a detector
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Credit {
    /// First sighting on this detector
    Arrival { elapsed: u64, stops: u32 },
    /// Still on the detector it was last credited to
    Repeat,
}

impl Credit {
    pub fn penalty(self) -> f64 {
        match self {
            Self::Arrival { elapsed, stops } => elapsed as f64 + stops as f64,
            Self::Repeat => 1.0,
        }
    }
}

/// Per-vehicle records of one scoring round
#[derive(Clone, Debug, Default)]
pub struct VehicleTracker {
    records: BTreeMap<String, VehicleRecord>,
}

impl VehicleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record on first sight and counts stop transitions
    pub fn observe(&mut self, id: &str, step: u64, stopped: bool) {
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| VehicleRecord::new(step));
        match (record.is_stopped, stopped) {
            (false, true) => {
                record.is_stopped = true;
                record.stop_count += 1;
                record.last_stop_step = Some(step);
            }
            (true, false) => record.is_stopped = false,
            _ => {}
        }
    }

    /// Credits `id` to `detector` at `step`. Returns `None` for a vehicle that
    /// was never observed.
    pub fn credit(&mut self, id: &str, detector: &str, step: u64) -> Option<Credit> {
        let record = self.records.get_mut(id)?;
        let credit = if record.last_credited_detector.as_deref() != Some(detector) {
            record.last_credited_detector = Some(detector.to_string());
            Credit::Arrival {
                elapsed: step.saturating_sub(record.last_credited_step),
                stops: record.stop_count,
            }
        } else {
            Credit::Repeat
        };
        record.last_credited_step = step;
        Some(credit)
    }

    /// Drops the records of vehicles that are no longer in the network
    pub fn forget_departed(&mut self, live: &[String]) {
        let live = live.iter().map(String::as_str).collect::<BTreeSet<_>>();
        self.records.retain(|id, _| live.contains(id.as_str()));
    }

    pub fn get(&self, id: &str) -> Option<&VehicleRecord> {
        self.records.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
