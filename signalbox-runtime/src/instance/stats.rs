use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::train::TrainId;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainStats {
    pub distance: f64,  //m
    pub wait_time: f64, //s，被阻擋
    pub idle_time: f64, //s，等待發車
    pub stops: u32,
    pub arrived: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainOutcome {
    Exited,
    Misrouted,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainRecord {
    pub id: TrainId,
    pub entry: String,
    pub destination: String,
    pub exit: Option<String>,
    pub coaches: u32,
    pub outcome: TrainOutcome,
    pub stats: TrainStats,
}

/// Run totals, snapshotted by whoever scores or stores the run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub elapsed: f64,
    pub distance: f64,
    pub wait_time: f64,
    pub idle_time: f64,
    pub stops: u32,
    pub created: u32,
    pub exited: u32,
    pub misrouted: u32,
    pub arrivals: u32,
    pub cancelled: u32,
    pub finished: Vec<TrainRecord>,
}

impl RunStats {
    pub(crate) fn accumulate(&mut self, before: &TrainStats, after: &TrainStats) {
        self.distance += after.distance - before.distance;
        self.wait_time += after.wait_time - before.wait_time;
        self.idle_time += after.idle_time - before.idle_time;
        self.stops += after.stops - before.stops;
        if after.arrived && !before.arrived {
            self.arrivals += 1;
        }
    }

    pub(crate) fn record(&mut self, record: TrainRecord) {
        match record.outcome {
            TrainOutcome::Exited => self.exited += 1,
            TrainOutcome::Misrouted => {
                self.exited += 1;
                self.misrouted += 1;
            }
            TrainOutcome::Cancelled => self.cancelled += 1,
        }
        self.finished.push(record);
    }

    /// Trains leaving the network per hour of simulated time.
    pub fn throughput(&self) -> f64 {
        if self.elapsed > 0. {
            self.exited as f64 * 3600. / self.elapsed
        } else {
            0.
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: TrainId, outcome: TrainOutcome) -> TrainRecord {
        TrainRecord {
            id,
            entry: "E1".to_string(),
            destination: "X1".to_string(),
            exit: Some("X1".to_string()),
            coaches: 3,
            outcome,
            stats: TrainStats::default(),
        }
    }

    #[test]
    fn test_accumulate_deltas() {
        let mut run = RunStats::default();
        let before = TrainStats {
            distance: 100.,
            wait_time: 1.,
            ..Default::default()
        };
        let after = TrainStats {
            distance: 130.,
            wait_time: 1.5,
            stops: 1,
            arrived: true,
            ..Default::default()
        };
        run.accumulate(&before, &after);
        run.accumulate(&after, &after);
        assert_eq!(run.distance, 30.);
        assert_eq!(run.wait_time, 0.5);
        assert_eq!(run.stops, 1);
        assert_eq!(run.arrivals, 1);
    }

    #[test]
    fn test_records_and_throughput() {
        let mut run = RunStats::default();
        assert_eq!(run.throughput(), 0.);
        run.record(record(1, TrainOutcome::Exited));
        run.record(record(2, TrainOutcome::Misrouted));
        run.record(record(3, TrainOutcome::Cancelled));
        run.elapsed = 1800.;
        assert_eq!(run.exited, 2);
        assert_eq!(run.misrouted, 1);
        assert_eq!(run.cancelled, 1);
        assert_eq!(run.throughput(), 4.);

        let json: serde_json::Value = serde_json::from_str(&run.to_json().unwrap()).unwrap();
        assert_eq!(json["finished"][1]["outcome"], "MISROUTED");
        assert_eq!(json["exited"], 2);
    }
}
