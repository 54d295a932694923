// 站場拓撲：節點與軌道的陣列，以下標互相引用
// 每條軌道有正反兩個方向的進路(route)，占用狀態按軌道記錄，走行距離按進路記錄
// 形狀在載入後不再變化，運行時只改變占用、鎖閉和道岔位置

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::{debug, warn};
use serde::Serialize;

use crate::error::SimError;
use crate::raw_station::{RawNode, RawNodeKind, RawStation};

use super::station::Point;
use super::train::TrainId;

pub type NodeId = usize;
pub type TrackId = usize;

const OFFSET_EPSILON: f64 = 1e-6;
const CURVE_SAMPLES: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Heading {
    Forward,  //from -> to
    Backward, //to -> from
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteId {
    pub track: TrackId,
    pub heading: Heading,
}

impl RouteId {
    pub fn new(track: TrackId, heading: Heading) -> Self {
        RouteId { track, heading }
    }

    pub fn opposite(self) -> Self {
        let heading = match self.heading {
            Heading::Forward => Heading::Backward,
            Heading::Backward => Heading::Forward,
        };
        RouteId { heading, ..self }
    }

    fn index(self) -> usize {
        match self.heading {
            Heading::Forward => self.track * 2,
            Heading::Backward => self.track * 2 + 1,
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.heading {
            Heading::Forward => '+',
            Heading::Backward => '-',
        };
        write!(f, "t{}{}", self.track, sign)
    }
}

/// An exact location: `offset` metres along `route`.
/// Points past a line boundary are outside the network and not visible.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct RoutePoint {
    pub route: RouteId,
    pub offset: f64,
    pub visible: bool,
}

impl RoutePoint {
    pub fn new(route: RouteId, offset: f64) -> Self {
        RoutePoint {
            route,
            offset,
            visible: true,
        }
    }

    fn outside(route: RouteId, offset: f64) -> Self {
        RoutePoint {
            route,
            offset,
            visible: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SignalState {
    pub(crate) locked: [bool; 2], //按進入槽位索引，人工關閉
    pub(crate) busy: [bool; 2],   //前方區段占用或不通
}

impl SignalState {
    pub(crate) fn is_clear(&self, income: usize) -> bool {
        !self.locked[income] && !self.busy[income]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SwitchState {
    pub(crate) deviated: bool,    //反位
    pub(crate) locked: bool,      //人工鎖閉
    pub(crate) auto_lock: bool,   //自動鎖閉策略
    pub(crate) auto_locked: bool, //由聯鎖推導
}

impl SwitchState {
    pub(crate) fn is_locked(&self) -> bool {
        self.locked || self.auto_locked
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    Line,
    DeadEnd,
    Point,
    Platform,
    Signal(SignalState),
    Switch(SwitchState),
    Crossing,
    CrossingDeviator(SwitchState),
}

impl Element {
    fn new(raw: &RawNode) -> Self {
        let switch = || SwitchState {
            deviated: raw.deviated,
            auto_lock: raw.auto_lock,
            ..Default::default()
        };
        match raw.kind {
            RawNodeKind::Line => Element::Line,
            RawNodeKind::DeadEnd => Element::DeadEnd,
            RawNodeKind::Point => Element::Point,
            RawNodeKind::Platform => Element::Platform,
            RawNodeKind::Signal => Element::Signal(SignalState::default()),
            RawNodeKind::Switch => Element::Switch(switch()),
            RawNodeKind::Crossing => Element::Crossing,
            RawNodeKind::CrossingDeviator => Element::CrossingDeviator(switch()),
        }
    }

    pub fn kind(&self) -> RawNodeKind {
        match self {
            Element::Line => RawNodeKind::Line,
            Element::DeadEnd => RawNodeKind::DeadEnd,
            Element::Point => RawNodeKind::Point,
            Element::Platform => RawNodeKind::Platform,
            Element::Signal(_) => RawNodeKind::Signal,
            Element::Switch(_) => RawNodeKind::Switch,
            Element::Crossing => RawNodeKind::Crossing,
            Element::CrossingDeviator(_) => RawNodeKind::CrossingDeviator,
        }
    }

    /// Outcome slot a train arriving on `income` leaves by, under the current position.
    pub(crate) fn wiring(&self, income: usize) -> Option<usize> {
        match self {
            Element::Line | Element::DeadEnd => None,
            Element::Point | Element::Platform | Element::Signal(_) => Some(1 - income),
            Element::Switch(sw) => match (income, sw.deviated) {
                (0, false) => Some(1),
                (0, true) => Some(2),
                (1, false) | (2, true) => Some(0),
                _ => None,
            },
            Element::Crossing => Some((income + 2) % 4),
            Element::CrossingDeviator(sw) if sw.deviated => Some(3 - income),
            Element::CrossingDeviator(_) => Some((income + 2) % 4),
        }
    }

    pub(crate) fn any_wiring(&self, income: usize) -> Vec<usize> {
        match self {
            Element::Switch(_) if income == 0 => vec![1, 2],
            Element::Switch(_) => vec![0],
            Element::CrossingDeviator(_) => vec![(income + 2) % 4, 3 - income],
            other => other.wiring(income).into_iter().collect(),
        }
    }

    pub(crate) fn switch(&self) -> Option<&SwitchState> {
        match self {
            Element::Switch(sw) | Element::CrossingDeviator(sw) => Some(sw),
            _ => None,
        }
    }

    pub(crate) fn switch_mut(&mut self) -> Option<&mut SwitchState> {
        match self {
            Element::Switch(sw) | Element::CrossingDeviator(sw) => Some(sw),
            _ => None,
        }
    }

    pub(crate) fn signal(&self) -> Option<&SignalState> {
        match self {
            Element::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn signal_mut(&mut self) -> Option<&mut SignalState> {
        match self {
            Element::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn is_junction(&self) -> bool {
        self.kind().is_junction()
    }

    //區段邊界
    pub(crate) fn is_boundary(&self) -> bool {
        matches!(self, Element::Line | Element::DeadEnd | Element::Signal(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Slot {
    pub(crate) track: TrackId,
    pub(crate) outcome: RouteId, //離開本節點的方向，反向即進入
}

#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) element: Element,
    pub(crate) pos: Point,
    pub(crate) slots: Vec<Slot>,
    pub(crate) transits: u32, //正在跨越本節點的列車數
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.transits > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct End {
    pub(crate) node: NodeId,
    pub(crate) slot: usize,
}

#[derive(Clone, Debug)]
pub struct Track {
    pub(crate) name: String,
    pub(crate) ends: [End; 2],
    pub(crate) length: f64,
    pub(crate) curve: Option<Point>,
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> f64 {
        self.length
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Next {
    Route(RouteId, NodeId),
    Boundary(NodeId),
    Blocked(NodeId),
}

pub struct Network {
    pub(crate) title: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) tracks: Vec<Track>,
    pub(crate) occupancy: Vec<Option<TrainId>>, //按軌道
    pub(crate) transited: Vec<f64>,             //按進路，最前占用位置
    names: HashMap<String, NodeId>,
}

impl Network {
    pub fn new(station: &RawStation) -> Result<Self, SimError> {
        let mut names = HashMap::new();
        for (i, n) in station.nodes.iter().enumerate() {
            if names.insert(n.id.clone(), i).is_some() {
                return Err(SimError::InvalidTopology(format!(
                    "duplicate node id: {}",
                    n.id
                )));
            }
            if (n.deviated || n.auto_lock) && !n.kind.has_deviation() {
                warn!("node {} is a {} and cannot deviate, ignoring switch flags", n.id, n.kind);
            }
        }

        let mut slots: Vec<Vec<Option<Slot>>> = station
            .nodes
            .iter()
            .map(|n| vec![None; n.kind.arity()])
            .collect();

        let mut tracks = Vec::with_capacity(station.tracks.len());
        for (t, raw) in station.tracks.iter().enumerate() {
            let mut ends = [End { node: 0, slot: 0 }; 2];
            for (i, joint) in [&raw.from, &raw.to].iter().enumerate() {
                let node = *names.get(&joint.node).ok_or_else(|| {
                    SimError::InvalidTopology(format!(
                        "track {} references unknown node {}",
                        raw.id, joint.node
                    ))
                })?;
                let node_slots = &mut slots[node];
                if joint.slot >= node_slots.len() {
                    return Err(SimError::InvalidTopology(format!(
                        "track {}: node {} has no slot {}",
                        raw.id, joint.node, joint.slot
                    )));
                }
                if node_slots[joint.slot].is_some() {
                    return Err(SimError::InvalidTopology(format!(
                        "slot {} of node {} is connected twice",
                        joint.slot, joint.node
                    )));
                }
                let heading = if i == 0 {
                    Heading::Forward
                } else {
                    Heading::Backward
                };
                node_slots[joint.slot] = Some(Slot {
                    track: t,
                    outcome: RouteId::new(t, heading),
                });
                ends[i] = End {
                    node,
                    slot: joint.slot,
                };
            }

            let a = Point::from(station.nodes[ends[0].node].pos);
            let b = Point::from(station.nodes[ends[1].node].pos);
            let curve = raw.curve.map(Point::from);
            let length = raw.length.unwrap_or_else(|| geometric_length(a, b, curve));
            if !(length.is_finite() && length > 0.) {
                return Err(SimError::InvalidTopology(format!(
                    "track {} has invalid length {}",
                    raw.id, length
                )));
            }

            tracks.push(Track {
                name: raw.id.clone(),
                ends,
                length,
                curve,
            });
        }

        let mut nodes = Vec::with_capacity(station.nodes.len());
        for (raw, raw_slots) in station.nodes.iter().zip(slots) {
            let mut node_slots = Vec::with_capacity(raw_slots.len());
            for (s, slot) in raw_slots.into_iter().enumerate() {
                match slot {
                    Some(slot) => node_slots.push(slot),
                    None => {
                        return Err(SimError::MissingTrack {
                            node: raw.id.clone(),
                            slot: s,
                        })
                    }
                }
            }
            nodes.push(Node {
                name: raw.id.clone(),
                element: Element::new(raw),
                pos: raw.pos.into(),
                slots: node_slots,
                transits: 0,
            });
        }

        debug!(
            "loaded station {}: {} nodes, {} tracks",
            station.title,
            nodes.len(),
            tracks.len()
        );

        Ok(Network {
            title: station.title.clone(),
            occupancy: vec![None; tracks.len()],
            transited: vec![0.; tracks.len() * 2],
            nodes,
            tracks,
            names,
        })
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn track(&self, id: TrackId) -> &Track {
        &self.tracks[id]
    }

    pub fn length(&self, route: RouteId) -> f64 {
        self.tracks[route.track].length
    }

    pub(crate) fn check_route(&self, route: RouteId) -> Result<(), SimError> {
        if route.track < self.tracks.len() {
            Ok(())
        } else {
            Err(SimError::UnknownRoute(route))
        }
    }

    pub(crate) fn end_of(&self, route: RouteId) -> End {
        let track = &self.tracks[route.track];
        match route.heading {
            Heading::Forward => track.ends[1],
            Heading::Backward => track.ends[0],
        }
    }

    pub(crate) fn outcome(&self, node: NodeId, slot: usize) -> RouteId {
        self.nodes[node].slots[slot].outcome
    }

    pub(crate) fn next_route(&self, route: RouteId) -> Next {
        let End { node, slot } = self.end_of(route);
        let n = &self.nodes[node];
        if let Element::Line = n.element {
            return Next::Boundary(node);
        }
        match n.element.wiring(slot) {
            Some(out) => Next::Route(n.slots[out].outcome, node),
            None => Next::Blocked(node),
        }
    }

    pub(crate) fn previous_route(&self, route: RouteId) -> Option<RouteId> {
        match self.next_route(route.opposite()) {
            Next::Route(prev, _) => Some(prev.opposite()),
            _ => None,
        }
    }

    /// True iff the wiring ahead of `route` is set through up to the next
    /// boundary (line, dead end or signal). Occupancy is not considered.
    pub fn is_transitable(&self, route: RouteId) -> bool {
        let mut visited = HashSet::new();
        let mut current = route;
        loop {
            if !visited.insert(current) {
                return true;
            }
            match self.next_route(current) {
                Next::Boundary(_) => return true,
                Next::Blocked(node) => {
                    return matches!(self.nodes[node].element, Element::DeadEnd);
                }
                Next::Route(next, node) => {
                    if let Element::Signal(_) = self.nodes[node].element {
                        return true;
                    }
                    current = next;
                }
            }
        }
    }

    pub fn location_at(&self, route: RouteId, offset: f64) -> Result<Point, SimError> {
        self.check_route(route)?;
        let track = &self.tracks[route.track];
        let mut t = (offset / track.length).max(0.).min(1.);
        if route.heading == Heading::Backward {
            t = 1. - t;
        }
        let a = self.nodes[track.ends[0].node].pos;
        let b = self.nodes[track.ends[1].node].pos;
        Ok(match track.curve {
            Some(c) => Point::quadratic(a, c, b, t),
            None => Point::lerp(a, b, t),
        })
    }

    /// Moves `point` by `distance` along the current wiring; negative distances
    /// move backwards. Leaving the network yields an invisible point.
    pub fn advance(&self, point: RoutePoint, distance: f64) -> Result<RoutePoint, SimError> {
        self.check_route(point.route)?;
        let len = self.length(point.route);
        let inconsistent = !point.offset.is_finite()
            || (point.visible
                && (point.offset < -OFFSET_EPSILON || point.offset > len + OFFSET_EPSILON));
        if !distance.is_finite() || inconsistent {
            return Err(SimError::InvalidDistance {
                route: point.route,
                offset: point.offset,
                distance,
            });
        }

        let mut route = point.route;
        let mut offset = point.offset + distance;
        loop {
            let len = self.length(route);
            if offset > len {
                match self.next_route(route) {
                    Next::Route(next, _) => {
                        offset -= len;
                        route = next;
                    }
                    _ => return Ok(RoutePoint::outside(route, offset)),
                }
            } else if offset < 0. {
                match self.previous_route(route) {
                    Some(prev) => {
                        offset += self.length(prev);
                        route = prev;
                    }
                    None => return Ok(RoutePoint::outside(route, offset)),
                }
            } else {
                return Ok(RoutePoint::new(route, offset));
            }
        }
    }

    pub fn occupant(&self, track: TrackId) -> Option<TrainId> {
        self.occupancy[track]
    }

    pub(crate) fn transited(&self, route: RouteId) -> f64 {
        self.transited[route.index()]
    }

    pub(crate) fn set_transited(&mut self, route: RouteId, offset: f64) {
        self.transited[route.index()] = offset;
    }

    pub(crate) fn occupy(&mut self, route: RouteId, train: TrainId) {
        self.occupancy[route.track] = Some(train);
        self.set_transited(route, 0.);
    }

    pub(crate) fn release(&mut self, route: RouteId) {
        self.occupancy[route.track] = None;
        self.set_transited(route, 0.);
        self.set_transited(route.opposite(), 0.);
    }
}

fn geometric_length(a: Point, b: Point, curve: Option<Point>) -> f64 {
    match curve {
        None => a.distance(b),
        Some(c) => {
            let mut len = 0.;
            let mut prev = a;
            for i in 1..=CURVE_SAMPLES {
                let p = Point::quadratic(a, c, b, i as f64 / CURVE_SAMPLES as f64);
                len += prev.distance(p);
                prev = p;
            }
            len
        }
    }
}
