use serde::Serialize;

use crate::raw_station::RawNodeKind;

use super::topo::{Element, Heading, Network, NodeId, RouteId, TrackId};
use super::train::TrainId;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl<T: Into<f64>> From<(T, T)> for Point {
    fn from(p: (T, T)) -> Self {
        Point {
            x: p.0.into(),
            y: p.1.into(),
        }
    }
}

impl Point {
    pub fn distance(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn lerp(a: Point, b: Point, t: f64) -> Point {
        Point {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        }
    }

    /// Quadratic Bézier through control point `c`.
    pub fn quadratic(a: Point, c: Point, b: Point, t: f64) -> Point {
        let u = 1. - t;
        Point {
            x: u * u * a.x + 2. * u * t * c.x + t * t * b.x,
            y: u * u * a.y + 2. * u * t * c.y + t * t * b.y,
        }
    }
}

// front models
#[derive(Clone, Debug, Serialize)]
pub struct NodeData {
    pub node_id: NodeId,
    pub name: String,
    pub kind: RawNodeKind,
    pub pos: Point,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackData {
    pub track_id: TrackId,
    pub name: String,
    pub start: Point,
    pub end: Point,
    pub curve: Option<Point>,
    pub length: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct StationData {
    pub title: String,
    pub nodes: Vec<NodeData>,
    pub tracks: Vec<TrackData>,
}

impl From<&Network> for StationData {
    fn from(net: &Network) -> Self {
        StationData {
            title: net.title.clone(),
            nodes: net
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| NodeData {
                    node_id: i,
                    name: n.name.clone(),
                    kind: n.element.kind(),
                    pos: n.pos,
                })
                .collect(),
            tracks: net
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| TrackData {
                    track_id: i,
                    name: t.name.clone(),
                    start: net.nodes[t.ends[0].node].pos,
                    end: net.nodes[t.ends[1].node].pos,
                    curve: t.curve,
                    length: t.length,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignalView {
    pub name: String,
    pub locked: [bool; 2],
    pub busy: [bool; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SwitchView {
    pub name: String,
    pub kind: RawNodeKind,
    pub deviated: bool,
    pub locked: bool,
    pub auto_lock: bool,
    pub auto_locked: bool,
    pub busy: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackOccupancy {
    pub track_id: TrackId,
    pub train: Option<TrainId>,
    pub transited: [f64; 2], //正向、反向的最前占用位置
}

pub(crate) fn signal_views(net: &Network) -> Vec<SignalView> {
    net.nodes
        .iter()
        .filter_map(|n| match &n.element {
            Element::Signal(s) => Some(SignalView {
                name: n.name.clone(),
                locked: s.locked,
                busy: s.busy,
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn switch_views(net: &Network) -> Vec<SwitchView> {
    net.nodes
        .iter()
        .filter_map(|n| {
            n.element.switch().map(|sw| SwitchView {
                name: n.name.clone(),
                kind: n.element.kind(),
                deviated: sw.deviated,
                locked: sw.locked,
                auto_lock: sw.auto_lock,
                auto_locked: sw.auto_locked,
                busy: n.is_busy(),
            })
        })
        .collect()
}

pub(crate) fn occupancy(net: &Network) -> Vec<TrackOccupancy> {
    net.occupancy
        .iter()
        .enumerate()
        .map(|(i, train)| TrackOccupancy {
            track_id: i,
            train: *train,
            transited: [
                net.transited(RouteId::new(i, Heading::Forward)),
                net.transited(RouteId::new(i, Heading::Backward)),
            ],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_station::test_station;

    #[test]
    fn test_station_data() {
        let net = Network::new(&test_station()).unwrap();
        let data = StationData::from(&net);
        assert_eq!(data.title, "Test Junction");
        assert_eq!(data.nodes.len(), 8);
        let t8 = data.tracks.iter().find(|t| t.name == "t8").unwrap();
        assert_eq!(t8.start, Point::from((2200., 0.)));
        assert_eq!(t8.end, Point::from((3000., 0.)));
        assert_eq!(signal_views(&net).len(), 2);
        assert_eq!(switch_views(&net).len(), 2);
        assert!(switch_views(&net)[0].auto_lock);
        assert!(occupancy(&net).iter().all(|o| o.train.is_none()));
    }

    #[test]
    fn test_point_helpers() {
        let a = Point::from((0, 0));
        let b = Point::from((3, 4));
        assert_eq!(a.distance(b), 5.);
        assert_eq!(Point::lerp(a, b, 0.5), Point::from((1.5, 2.)));
        assert_eq!(Point::quadratic(a, b, b, 1.), b);
    }
}
