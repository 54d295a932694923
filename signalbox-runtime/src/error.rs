use thiserror::Error;

use crate::instance::fsm::TrainState;
use crate::instance::topo::{NodeId, RouteId};
use crate::instance::train::TrainId;

/// Failures the simulation cannot continue past.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("missing track at node {node} slot {slot}")]
    MissingTrack { node: String, slot: usize },

    #[error("invalid distance {distance} from offset {offset} on route {route}")]
    InvalidDistance {
        route: RouteId,
        offset: f64,
        distance: f64,
    },

    #[error("invalid tick duration {0}")]
    InvalidTick(f64),

    #[error("unknown route {0}")]
    UnknownRoute(RouteId),

    #[error(
        "train {train} (speed {speed:.2} m/s, offset {offset:.2} on route {route}) \
         found route held by {occupant:?}"
    )]
    OccupantMismatch {
        train: TrainId,
        speed: f64,
        route: RouteId,
        offset: f64,
        occupant: Option<TrainId>,
    },

    #[error("train {train} (speed {speed:.2} m/s on route {route}) overran node {node}")]
    Overrun {
        train: TrainId,
        speed: f64,
        route: RouteId,
        node: NodeId,
    },
}

/// Commands declined without touching simulation state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("unknown entry: {0}")]
    UnknownEntry(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("unknown switch: {0}")]
    UnknownSwitch(String),

    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    #[error("unknown train: {0}")]
    UnknownTrain(TrainId),

    #[error("signal {id} has no direction {index}")]
    SignalIndex { id: String, index: usize },

    #[error("{0} is busy")]
    Busy(String),

    #[error("{0} is locked")]
    Locked(String),

    #[error("a train needs at least one coach")]
    NoCoaches,

    #[error("{destination} cannot be reached from {entry}")]
    Unreachable { entry: String, destination: String },

    #[error("train {train} cannot do that while {state}")]
    WrongState { train: TrainId, state: TrainState },
}
