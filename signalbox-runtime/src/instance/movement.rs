// 兩階段走行
// calculate 只讀站場，沿進路鏈求出本周期能走的距離
// commit 按算出的距離移動車頭車尾，更新占用

use log::debug;

use crate::error::SimError;

use super::topo::{Element, End, Network, Next, NodeId, RouteId, RoutePoint, TrackId};
use super::train::{Train, TrainId};

const COMMIT_EPSILON: f64 = 1e-9;

pub(crate) struct MovementContext {
    pub(crate) train: TrainId,
    pub(crate) dt: f64,
    pub(crate) budget: f64,
    pub(crate) transited: f64,
}

impl MovementContext {
    pub(crate) fn new(train: TrainId, dt: f64, budget: f64) -> Self {
        MovementContext {
            train,
            dt,
            budget: budget.max(0.),
            transited: 0.,
        }
    }

    fn available(&self) -> f64 {
        (self.budget - self.transited).max(0.)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Obstruction {
    Occupied(TrackId),
    Junction(NodeId),
    Blocked(NodeId),
    Signal(NodeId),
    StopPoint(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Movement {
    pub(crate) distance: f64,
    pub(crate) obstruction: Option<Obstruction>,
}

impl Movement {
    fn free(distance: f64) -> Self {
        Movement {
            distance,
            obstruction: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Committed {
    Moved,
    Exited(NodeId),
}

enum Crossing {
    Enter(RouteId),
    Leave,
    Stop(Obstruction),
}

pub(crate) fn calculate(net: &Network, train: &Train, ctx: &mut MovementContext) -> Movement {
    if !train.is_attached() {
        return Movement::free(0.);
    }
    //已出站的車頭不受約束
    if !train.head.visible {
        ctx.transited = ctx.budget;
        return Movement::free(ctx.budget);
    }

    let mut route = train.head.route;
    let mut offset = train.head.offset;
    loop {
        let room = (net.length(route) - offset).max(0.);
        if ctx.available() <= room {
            ctx.transited = ctx.budget;
            return Movement::free(ctx.budget);
        }
        ctx.transited += room;
        match crossing(net, train, route) {
            Crossing::Enter(next) => {
                route = next;
                offset = 0.;
            }
            Crossing::Leave => {
                ctx.transited = ctx.budget;
                return Movement::free(ctx.budget);
            }
            Crossing::Stop(obstruction) => {
                debug!(
                    "train {} stops after {:.1}m of {:.1}m in {}s: {:?}",
                    ctx.train, ctx.transited, ctx.budget, ctx.dt, obstruction
                );
                return Movement {
                    distance: ctx.transited,
                    obstruction: Some(obstruction),
                };
            }
        }
    }
}

pub(crate) fn probe(net: &Network, train: &Train, distance: f64) -> Movement {
    let mut ctx = MovementContext::new(train.id, 0., distance);
    calculate(net, train, &mut ctx)
}

fn crossing(net: &Network, train: &Train, route: RouteId) -> Crossing {
    let End { node, slot } = net.end_of(route);
    let n = net.node(node);

    if node == train.destination && !train.loaded {
        if let Element::Platform = n.element {
            return Crossing::Stop(Obstruction::StopPoint(node));
        }
    }
    if let Element::Signal(s) = &n.element {
        if !s.is_clear(slot) {
            return Crossing::Stop(Obstruction::Signal(node));
        }
    }
    if n.element.is_junction() && n.is_busy() {
        return Crossing::Stop(Obstruction::Junction(node));
    }

    match net.next_route(route) {
        Next::Boundary(_) => Crossing::Leave,
        Next::Blocked(node) => Crossing::Stop(Obstruction::Blocked(node)),
        Next::Route(next, _) => match net.occupant(next.track) {
            Some(_) => Crossing::Stop(Obstruction::Occupied(next.track)),
            None => Crossing::Enter(next),
        },
    }
}

fn check_occupant(net: &Network, train: &Train, route: RouteId) -> Result<(), SimError> {
    let occupant = net.occupant(route.track);
    if occupant != Some(train.id) {
        return Err(SimError::OccupantMismatch {
            train: train.id,
            speed: train.speed,
            route,
            offset: train.head.offset,
            occupant,
        });
    }
    Ok(())
}

pub(crate) fn can_enter(net: &Network, train: &Train) -> bool {
    net.occupant(train.head.route.track).is_none()
}

pub(crate) fn attach(net: &mut Network, train: &mut Train) -> Result<(), SimError> {
    let route = train.head.route;
    if let Some(other) = net.occupant(route.track) {
        return Err(SimError::OccupantMismatch {
            train: train.id,
            speed: train.speed,
            route,
            offset: 0.,
            occupant: Some(other),
        });
    }
    net.occupy(route, train.id);
    train.path.push_back(route);
    train.head = RoutePoint::new(route, 0.);
    train.tail_offset = -train.length;
    Ok(())
}

pub(crate) fn commit(
    net: &mut Network,
    train: &mut Train,
    distance: f64,
) -> Result<Committed, SimError> {
    if distance <= 0. {
        return Ok(Committed::Moved);
    }

    //車頭
    let mut left = distance;
    while left > 0. {
        if !train.head.visible {
            train.head.offset += left;
            break;
        }
        let route = train.head.route;
        check_occupant(net, train, route)?;
        let len = net.length(route);
        let room = len - train.head.offset;
        if left <= room + COMMIT_EPSILON {
            train.head.offset = (train.head.offset + left).min(len);
            net.set_transited(route, train.head.offset);
            break;
        }
        left -= room;
        train.head.offset = len;
        net.set_transited(route, len);

        match net.next_route(route) {
            Next::Route(next, node) => {
                if let Some(other) = net.occupant(next.track) {
                    return Err(SimError::OccupantMismatch {
                        train: train.id,
                        speed: train.speed,
                        route: next,
                        offset: 0.,
                        occupant: Some(other),
                    });
                }
                net.occupy(next, train.id);
                net.nodes[node].transits += 1;
                train.path.push_back(next);
                train.head = RoutePoint::new(next, 0.);
            }
            Next::Boundary(node) => {
                debug!("train {} leaving by {}", train.id, net.node(node).name());
                train.head.visible = false;
                train.head.offset = len + left;
                left = 0.;
            }
            Next::Blocked(node) => {
                return Err(SimError::Overrun {
                    train: train.id,
                    speed: train.speed,
                    route,
                    node,
                });
            }
        }
    }

    //車尾
    train.tail_offset += distance;
    while let Some(&front) = train.path.front() {
        let len = net.length(front);
        if train.tail_offset < len {
            break;
        }
        if train.path.len() == 1 && train.head.visible {
            break;
        }
        check_occupant(net, train, front)?;
        train.path.pop_front();
        net.release(front);
        train.tail_offset -= len;

        let node = net.end_of(front).node;
        if train.path.is_empty() {
            return Ok(Committed::Exited(node));
        }
        let n = &mut net.nodes[node];
        n.transits = n.transits.saturating_sub(1);
    }
    Ok(Committed::Moved)
}

//調頭，列車須完全在站內
pub(crate) fn reverse(net: &mut Network, train: &mut Train) -> bool {
    let (front, back) = match (train.path.front(), train.path.back()) {
        (Some(&f), Some(&b)) => (f, b),
        _ => return false,
    };
    if !train.head.visible || train.tail_offset < 0. {
        return false;
    }

    let head_offset = net.length(front) - train.tail_offset;
    let tail_offset = net.length(back) - train.head.offset;
    for &r in &train.path {
        net.set_transited(r, 0.);
    }
    let path: Vec<RouteId> = train.path.iter().rev().map(|r| r.opposite()).collect();
    for &r in &path {
        net.set_transited(r, net.length(r));
    }
    let head = front.opposite();
    net.set_transited(head, head_offset);

    train.path = path.into_iter().collect();
    train.head = RoutePoint::new(head, head_offset);
    train.tail_offset = tail_offset;
    true
}
