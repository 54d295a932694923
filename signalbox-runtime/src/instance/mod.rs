pub mod fsm;
pub(crate) mod graph;
pub(crate) mod interlocking;
pub(crate) mod movement;
pub mod station;
pub mod stats;
pub mod topo;
pub mod train;


use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::{Rejected, SimError};
use crate::raw_station::RawStation;

use self::fsm::TrainState;
use self::graph::StationGraph;
use self::station::{SignalView, StationData, SwitchView, TrackOccupancy};
use self::stats::{RunStats, TrainOutcome, TrainRecord};
use self::topo::{Element, Network, NodeId};
use self::train::{Train, TrainId, TrainSummary};

/// One run of the station: network, trains and statistics.
pub struct Simulation {
    network: Network,
    graph: StationGraph,
    trains: BTreeMap<TrainId, Train>,
    config: SimConfig,
    stats: RunStats,
    next_train_id: TrainId,
    elapsed: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExitReport {
    pub train: TrainId,
    pub node: String,
    pub misrouted: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct TickReport {
    pub elapsed: f64,
    pub trains: Vec<TrainSummary>,
    pub occupancy: Vec<TrackOccupancy>,
    pub exits: Vec<ExitReport>,
}

impl Simulation {
    pub fn load_topology(station: &RawStation, config: SimConfig) -> Result<Self, SimError> {
        let mut network = Network::new(station)?;
        let graph = StationGraph::new(&network);
        interlocking::refresh(&mut network);
        info!("station {} loaded", station.title);
        Ok(Simulation {
            network,
            graph,
            trains: BTreeMap::new(),
            config,
            stats: RunStats::default(),
            next_train_id: 1,
            elapsed: 0.,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn tick(&mut self, dt: f64) -> Result<TickReport, SimError> {
        if !(dt.is_finite() && dt > 0.) {
            return Err(SimError::InvalidTick(dt));
        }
        self.elapsed += dt;
        self.stats.elapsed = self.elapsed;

        let ids: Vec<TrainId> = self.trains.keys().copied().collect();
        let mut exits = Vec::new();
        for id in ids {
            let train = match self.trains.get_mut(&id) {
                Some(train) => train,
                None => continue,
            };
            let before = train.stats.clone();
            let exit = fsm::dispatch(train, &mut self.network, &self.config, dt)?;
            self.stats.accumulate(&before, &train.stats);

            if let Some(node) = exit {
                if let Some(train) = self.trains.remove(&id) {
                    exits.push(self.finish(train, node));
                }
            }
            //後車須看到前車本周期的占用
            interlocking::refresh(&mut self.network);
        }

        Ok(TickReport {
            elapsed: self.elapsed,
            trains: self.trains(),
            occupancy: station::occupancy(&self.network),
            exits,
        })
    }

    fn finish(&mut self, train: Train, node: NodeId) -> ExitReport {
        let misrouted = node != train.destination;
        let name = self.network.node(node).name().to_string();
        if misrouted {
            warn!(
                "train {} left by {} instead of {}",
                train.id,
                name,
                self.network.node(train.destination).name()
            );
        } else {
            info!("train {} left by {}", train.id, name);
        }
        self.stats.record(TrainRecord {
            id: train.id,
            entry: self.network.node(train.entry).name().to_string(),
            destination: self.network.node(train.destination).name().to_string(),
            exit: Some(name.clone()),
            coaches: train.coaches,
            outcome: if misrouted {
                TrainOutcome::Misrouted
            } else {
                TrainOutcome::Exited
            },
            stats: train.stats,
        });
        ExitReport {
            train: train.id,
            node: name,
            misrouted,
        }
    }

    fn entry_id(&self, name: &str) -> Result<NodeId, Rejected> {
        self.network
            .node_id(name)
            .filter(|&id| matches!(self.network.node(id).element, Element::Line))
            .ok_or_else(|| Rejected::UnknownEntry(name.to_string()))
    }

    fn destination_id(&self, name: &str) -> Result<NodeId, Rejected> {
        self.network
            .node_id(name)
            .filter(|&id| {
                matches!(
                    self.network.node(id).element,
                    Element::Line | Element::Platform
                )
            })
            .ok_or_else(|| Rejected::UnknownDestination(name.to_string()))
    }

    fn train_mut(&mut self, id: TrainId) -> Result<&mut Train, Rejected> {
        self.trains.get_mut(&id).ok_or(Rejected::UnknownTrain(id))
    }

    /// Queues a train at a line entry; it enters once the entry delay has passed
    /// and the first track is free.
    pub fn create_train(
        &mut self,
        entry: &str,
        destination: &str,
        coaches: u32,
    ) -> Result<TrainId, Rejected> {
        let entry_id = self.entry_id(entry)?;
        let dest_id = self.destination_id(destination)?;
        if coaches == 0 {
            return Err(Rejected::NoCoaches);
        }
        let route = self.network.outcome(entry_id, 0);
        if !self.graph.can_reach(&self.network, route, dest_id) {
            warn!("no path from {} to {}", entry, destination);
            return Err(Rejected::Unreachable {
                entry: entry.to_string(),
                destination: destination.to_string(),
            });
        }

        let id = self.next_train_id;
        self.next_train_id += 1;
        let train = Train::new(id, entry_id, route, dest_id, coaches, &self.config);
        self.trains.insert(id, train);
        self.stats.created += 1;
        info!(
            "train {} ({} coaches) queued at {} for {}",
            id, coaches, entry, destination
        );
        Ok(id)
    }

    pub fn cancel_train(&mut self, id: TrainId) -> Result<(), Rejected> {
        let state = self.train_mut(id)?.state;
        if state != TrainState::Entering {
            return Err(Rejected::WrongState { train: id, state });
        }
        if let Some(train) = self.trains.remove(&id) {
            info!("train {} cancelled", id);
            self.stats.record(TrainRecord {
                id,
                entry: self.network.node(train.entry).name().to_string(),
                destination: self.network.node(train.destination).name().to_string(),
                exit: None,
                coaches: train.coaches,
                outcome: TrainOutcome::Cancelled,
                stats: train.stats,
            });
        }
        Ok(())
    }

    /// Brakes a moving train to a standstill; it then waits for `depart_train`.
    pub fn stop_train(&mut self, id: TrainId) -> Result<(), Rejected> {
        let train = self.train_mut(id)?;
        if !(train.state.is_running() || train.state == TrainState::WaitingForSignal) {
            return Err(Rejected::WrongState {
                train: id,
                state: train.state,
            });
        }
        train.held = true;
        train.state = TrainState::Braking;
        info!("train {} stopped by operator", id);
        Ok(())
    }

    pub fn depart_train(&mut self, id: TrainId, destination: &str) -> Result<(), Rejected> {
        let dest_id = self.destination_id(destination)?;
        let (state, head) = {
            let train = self.train_mut(id)?;
            (train.state, train.head)
        };
        if state != TrainState::WaitingForRun {
            return Err(Rejected::WrongState { train: id, state });
        }
        if !self.graph.can_reach(&self.network, head.route, dest_id) {
            let entry = self.network.node(self.network.end_of(head.route).node).name();
            return Err(Rejected::Unreachable {
                entry: entry.to_string(),
                destination: destination.to_string(),
            });
        }

        let train = self.train_mut(id)?;
        train.destination = dest_id;
        train.loaded = false;
        train.load_timer = 0.;
        train.held = false;
        train.state = TrainState::RunningFast;
        info!("train {} departs for {}", id, destination);
        Ok(())
    }

    pub fn reverse_train(&mut self, id: TrainId) -> Result<(), Rejected> {
        let train = self.trains.get_mut(&id).ok_or(Rejected::UnknownTrain(id))?;
        if train.state != TrainState::WaitingForRun
            || !movement::reverse(&mut self.network, train)
        {
            return Err(Rejected::WrongState {
                train: id,
                state: train.state,
            });
        }
        info!("train {} reversed", id);
        interlocking::refresh(&mut self.network);
        Ok(())
    }

    pub fn set_switch_deviated(&mut self, id: &str, deviated: bool) -> Result<(), Rejected> {
        interlocking::set_switch_deviated(&mut self.network, id, deviated)
            .map_err(log_rejection)
    }

    pub fn set_signal_locked(&mut self, id: &str, index: usize, locked: bool) -> Result<(), Rejected> {
        interlocking::set_signal_locked(&mut self.network, id, index, locked)
            .map_err(log_rejection)
    }

    pub fn set_auto_lock(&mut self, id: &str, on: bool) -> Result<(), Rejected> {
        interlocking::set_auto_lock(&mut self.network, id, on).map_err(log_rejection)
    }

    pub fn signals(&self) -> Vec<SignalView> {
        station::signal_views(&self.network)
    }

    pub fn switches(&self) -> Vec<SwitchView> {
        station::switch_views(&self.network)
    }

    pub fn station_layout(&self) -> StationData {
        StationData::from(&self.network)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn trains(&self) -> Vec<TrainSummary> {
        self.trains
            .values()
            .map(|t| t.summary(&self.network))
            .collect()
    }

    pub fn train(&self, id: TrainId) -> Option<TrainSummary> {
        self.trains.get(&id).map(|t| t.summary(&self.network))
    }
}

fn log_rejection(e: Rejected) -> Rejected {
    warn!("rejected: {}", e);
    e
}

/// A train the driver creates once the clock reaches `at`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrainRequest {
    pub at: f64,
    pub entry: String,
    pub destination: String,
    #[serde(default = "default_coaches")]
    pub coaches: u32,
}

fn default_coaches() -> u32 {
    3
}

/// Headless run description read by the driver binary.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub id: String,
    pub station: RawStation,
    #[serde(default)]
    pub sim: Option<SimConfig>,
    #[serde(default)]
    pub schedule: Vec<TrainRequest>,
    pub duration: f64,
    #[serde(default = "default_dt")]
    pub dt: f64,
}

fn default_dt() -> f64 {
    0.5
}

impl InstanceConfig {
    pub fn from_yaml(yaml: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(yaml)
    }
}
