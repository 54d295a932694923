use std::collections::VecDeque;

use serde::Serialize;

use crate::config::SimConfig;

use super::fsm::TrainState;
use super::station::Point;
use super::stats::TrainStats;
use super::topo::{Network, NodeId, RouteId, RoutePoint};

pub type TrainId = usize;

pub(crate) struct Train {
    pub(crate) id: TrainId,
    pub(crate) coaches: u32,
    pub(crate) length: f64,
    pub(crate) speed: f64,
    pub(crate) state: TrainState,
    pub(crate) entry: NodeId,
    pub(crate) destination: NodeId,
    pub(crate) head: RoutePoint,
    pub(crate) path: VecDeque<RouteId>, //從車尾到車頭所占進路
    pub(crate) tail_offset: f64,        //車尾在 path.front() 上的位置，進站前為負
    pub(crate) entry_timer: f64,
    pub(crate) load_timer: f64,
    pub(crate) loaded: bool,
    pub(crate) held: bool, //人工停車
    pub(crate) stats: TrainStats,
}

impl Train {
    pub(crate) fn new(
        id: TrainId,
        entry: NodeId,
        entry_route: RouteId,
        destination: NodeId,
        coaches: u32,
        cfg: &SimConfig,
    ) -> Self {
        Train {
            id,
            coaches,
            length: coaches as f64 * cfg.coach_length,
            speed: 0.,
            state: TrainState::Entering,
            entry,
            destination,
            head: RoutePoint {
                route: entry_route,
                offset: 0.,
                visible: false,
            },
            path: VecDeque::new(),
            tail_offset: 0.,
            entry_timer: cfg.entry_delay,
            load_timer: 0.,
            loaded: false,
            held: false,
            stats: Default::default(),
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        !self.path.is_empty()
    }

    pub(crate) fn tail(&self) -> RoutePoint {
        match self.path.front() {
            Some(&route) => RoutePoint {
                route,
                offset: self.tail_offset,
                visible: self.tail_offset >= 0.,
            },
            None => self.head,
        }
    }

    pub(crate) fn summary(&self, net: &Network) -> TrainSummary {
        let tail = self.tail();
        TrainSummary {
            id: self.id,
            state: self.state,
            speed: self.speed,
            coaches: self.coaches,
            head: self.head,
            head_pos: net.location_at(self.head.route, self.head.offset).ok(),
            tail_pos: net.location_at(tail.route, tail.offset).ok(),
            visible: self.is_attached() && (self.head.visible || tail.visible),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainSummary {
    pub id: TrainId,
    pub state: TrainState,
    pub speed: f64,
    pub coaches: u32,
    pub head: RoutePoint,
    pub head_pos: Option<Point>,
    pub tail_pos: Option<Point>,
    pub visible: bool,
}

pub fn stop_distance(speed: f64, deceleration: f64) -> f64 {
    if speed <= 0. {
        0.
    } else {
        speed * speed / (2. * deceleration.abs())
    }
}

pub(crate) fn approach(speed: f64, target: f64, cfg: &SimConfig, dt: f64) -> f64 {
    let delta = (target - speed)
        .max(-cfg.braking() * dt)
        .min(cfg.acceleration * dt);
    (speed + delta).max(0.).min(cfg.max_speed)
}

/// Distance a running train must be able to see ahead this tick.
pub(crate) fn lookahead(speed: f64, cfg: &SimConfig, dt: f64) -> f64 {
    stop_distance(speed, cfg.deceleration) + speed * dt + cfg.lookahead_margin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_distance_is_monotonic() {
        let mut last = 0.;
        for i in 0..=400 {
            let v = i as f64 * 0.1;
            let d = stop_distance(v, -2.);
            assert!(d >= 0.);
            assert!(d >= last);
            last = d;
        }
        assert_eq!(stop_distance(20., -2.), 100.);
        assert_eq!(stop_distance(20., 2.), 100.);
        assert_eq!(stop_distance(-1., -2.), 0.);
    }

    #[test]
    fn test_approach_is_bounded() {
        let cfg = SimConfig::default();
        assert_eq!(approach(0., cfg.max_speed, &cfg, 1.), 1.);
        assert_eq!(approach(10., 0., &cfg, 1.), 8.);
        assert_eq!(approach(1., 0., &cfg, 1.), 0.);
        assert_eq!(approach(38.5, 100., &cfg, 1.), cfg.max_speed);
        assert_eq!(approach(5., 5.5, &cfg, 1.), 5.5);
    }

    #[test]
    fn test_train_length_from_coaches() {
        let cfg = SimConfig::default();
        let route = RouteId::new(0, super::super::topo::Heading::Forward);
        let train = Train::new(1, 0, route, 1, 3, &cfg);
        assert_eq!(train.length, 75.);
        assert_eq!(train.state, TrainState::Entering);
        assert!(!train.is_attached());
        assert!(!train.tail().visible);
    }
}
