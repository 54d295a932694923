// 列車狀態機
// 每個狀態一個處理函數，按狀態查表分派

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::config::SimConfig;
use crate::error::SimError;

use super::movement::{self, Committed, MovementContext, Obstruction};
use super::topo::{Element, Network, NodeId};
use super::train::{approach, lookahead, Train};

const MAX_REDISPATCH: usize = 4;
const STOP_TOLERANCE: f64 = 1.0; //m
const SIGNAL_PROBE: f64 = 1.0; //m

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainState {
    Entering,         //入口排隊
    RunningFast,      //目標速度最高
    RunningMin,       //目標速度低速
    Braking,          //目標速度零
    WaitingForSignal, //停在障礙前
    WaitingForRun,    //等待發車
    WaitingForLoaded, //乘降中
}

impl TrainState {
    //含人工指令引起的轉移
    pub fn successors(self) -> &'static [TrainState] {
        use TrainState::*;
        match self {
            Entering => &[RunningFast],
            RunningFast => &[RunningMin, Braking, WaitingForSignal],
            RunningMin => &[RunningFast, Braking, WaitingForSignal],
            Braking => &[WaitingForRun, WaitingForLoaded, WaitingForSignal],
            WaitingForSignal => &[RunningFast, Braking],
            WaitingForRun => &[RunningFast],
            WaitingForLoaded => &[WaitingForRun],
        }
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            TrainState::RunningFast | TrainState::RunningMin | TrainState::Braking
        )
    }

    fn handler(self) -> Handler {
        match self {
            TrainState::Entering => entering,
            TrainState::RunningFast => running_fast,
            TrainState::RunningMin => running_min,
            TrainState::Braking => braking,
            TrainState::WaitingForSignal => waiting_for_signal,
            TrainState::WaitingForRun => waiting_for_run,
            TrainState::WaitingForLoaded => waiting_for_loaded,
        }
    }
}

type Handler = fn(&mut Train, &mut Network, &SimConfig, f64) -> Result<Step, SimError>;

enum Step {
    Stay,
    //本周期結束
    Goto(TrainState),
    //以同一 dt 立即執行新狀態
    Redispatch(TrainState),
    Exit(NodeId),
}

enum Run {
    Free,
    Blocked(Obstruction),
    Exited(NodeId),
}

pub(crate) fn dispatch(
    train: &mut Train,
    net: &mut Network,
    cfg: &SimConfig,
    dt: f64,
) -> Result<Option<NodeId>, SimError> {
    let mut redispatched = 0;
    loop {
        let handler = train.state.handler();
        match handler(train, net, cfg, dt)? {
            Step::Stay => return Ok(None),
            Step::Goto(to) => {
                transition(train, to);
                return Ok(None);
            }
            Step::Redispatch(to) => {
                transition(train, to);
                redispatched += 1;
                if redispatched > MAX_REDISPATCH {
                    warn!("train {} keeps redispatching, holding at {}", train.id, to);
                    return Ok(None);
                }
            }
            Step::Exit(node) => return Ok(Some(node)),
        }
    }
}

fn transition(train: &mut Train, to: TrainState) {
    if train.state == to {
        return;
    }
    debug_assert!(
        train.state.successors().contains(&to),
        "undeclared transition {} -> {}",
        train.state,
        to
    );
    debug!("train {}: {} -> {}", train.id, train.state, to);
    train.state = to;
}

fn run(train: &mut Train, net: &mut Network, dt: f64) -> Result<Run, SimError> {
    let requested = train.speed * dt;
    let mut ctx = MovementContext::new(train.id, dt, requested);
    let m = movement::calculate(net, train, &mut ctx);
    let committed = movement::commit(net, train, m.distance)?;
    train.stats.distance += m.distance;

    if let Committed::Exited(node) = committed {
        return Ok(Run::Exited(node));
    }
    match m.obstruction {
        Some(obstruction) if m.distance < requested => {
            train.stats.wait_time += dt * (requested - m.distance) / requested;
            train.stats.stops += 1;
            train.speed = 0.;
            Ok(Run::Blocked(obstruction))
        }
        _ => Ok(Run::Free),
    }
}

fn after_run(run: Run) -> Step {
    match run {
        Run::Free => Step::Stay,
        Run::Exited(node) => Step::Exit(node),
        Run::Blocked(Obstruction::StopPoint(_)) => Step::Goto(TrainState::Braking),
        Run::Blocked(_) => Step::Goto(TrainState::WaitingForSignal),
    }
}

fn at_destination_platform(net: &Network, train: &Train) -> bool {
    if train.loaded || !train.head.visible || !train.is_attached() {
        return false;
    }
    let node = net.end_of(train.head.route).node;
    node == train.destination
        && matches!(net.node(node).element, Element::Platform)
        && net.length(train.head.route) - train.head.offset < STOP_TOLERANCE
}

fn entering(
    train: &mut Train,
    net: &mut Network,
    _cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    if train.entry_timer > 0. {
        train.entry_timer -= dt;
        if train.entry_timer > 0. {
            return Ok(Step::Stay);
        }
    }
    if !movement::can_enter(net, train) {
        train.stats.wait_time += dt;
        return Ok(Step::Stay);
    }
    movement::attach(net, train)?;
    debug!("train {} attached at {}", train.id, train.head.route);
    Ok(Step::Goto(TrainState::RunningFast))
}

fn running_fast(
    train: &mut Train,
    net: &mut Network,
    cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    let ahead = movement::probe(net, train, lookahead(train.speed, cfg, dt));
    match ahead.obstruction {
        Some(Obstruction::StopPoint(_)) => Ok(Step::Redispatch(TrainState::Braking)),
        Some(_) => Ok(Step::Redispatch(TrainState::RunningMin)),
        None => {
            train.speed = approach(train.speed, cfg.max_speed, cfg, dt);
            Ok(after_run(run(train, net, dt)?))
        }
    }
}

fn running_min(
    train: &mut Train,
    net: &mut Network,
    cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    let ahead = movement::probe(net, train, lookahead(train.speed, cfg, dt));
    match ahead.obstruction {
        None => Ok(Step::Redispatch(TrainState::RunningFast)),
        Some(Obstruction::StopPoint(_)) => Ok(Step::Redispatch(TrainState::Braking)),
        Some(_) => {
            train.speed = approach(train.speed, cfg.min_speed, cfg, dt);
            Ok(after_run(run(train, net, dt)?))
        }
    }
}

fn braking(
    train: &mut Train,
    net: &mut Network,
    cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    let ahead = movement::probe(net, train, lookahead(train.speed, cfg, dt));
    //停車點前按制動曲線追隨
    let target = match ahead.obstruction {
        Some(Obstruction::StopPoint(_)) if !train.held => {
            (2. * cfg.braking() * ahead.distance).sqrt().min(cfg.max_speed)
        }
        _ => 0.,
    };

    if train.speed <= 0. && target <= 0. {
        train.speed = 0.;
        let next = if at_destination_platform(net, train) {
            TrainState::WaitingForLoaded
        } else if ahead.obstruction.is_some() && !train.held {
            TrainState::WaitingForSignal
        } else {
            TrainState::WaitingForRun
        };
        return Ok(Step::Goto(next));
    }

    train.speed = approach(train.speed, target, cfg, dt);
    match run(train, net, dt)? {
        Run::Exited(node) => Ok(Step::Exit(node)),
        _ => Ok(Step::Stay),
    }
}

fn waiting_for_signal(
    train: &mut Train,
    net: &mut Network,
    _cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    let ahead = movement::probe(net, train, SIGNAL_PROBE);
    match ahead.obstruction {
        None | Some(Obstruction::StopPoint(_)) => Ok(Step::Redispatch(TrainState::RunningFast)),
        Some(_) => {
            train.stats.wait_time += dt;
            Ok(Step::Stay)
        }
    }
}

fn waiting_for_run(
    train: &mut Train,
    _net: &mut Network,
    _cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    train.stats.idle_time += dt;
    Ok(Step::Stay)
}

fn waiting_for_loaded(
    train: &mut Train,
    _net: &mut Network,
    cfg: &SimConfig,
    dt: f64,
) -> Result<Step, SimError> {
    train.load_timer += dt;
    if train.load_timer < cfg.loading_time {
        return Ok(Step::Stay);
    }
    train.loaded = true;
    train.stats.arrived = true;
    debug!("train {} loaded", train.id);
    Ok(Step::Goto(TrainState::WaitingForRun))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::instance::topo::{Heading, RouteId};
    use crate::raw_station::{builder::StationBuilder, RawNodeKind};

    // A --t1(1000)-- S --t2(200)-- P --t3(1000)-- B
    fn layout() -> Network {
        let station = StationBuilder::default()
            .node("A", RawNodeKind::Line, 0.)
            .node("S", RawNodeKind::Signal, 1000.)
            .node("P", RawNodeKind::Platform, 1200.)
            .node("B", RawNodeKind::Line, 2200.)
            .track(("A", 0), ("S", 0), 1000.)
            .track(("S", 1), ("P", 0), 200.)
            .track(("P", 1), ("B", 0), 1000.)
            .build();
        Network::new(&station).unwrap()
    }

    fn train_to(net: &Network, destination: &str, cfg: &SimConfig) -> Train {
        let a = net.node_id("A").unwrap();
        let dest = net.node_id(destination).unwrap();
        Train::new(1, a, net.outcome(a, 0), dest, 3, cfg)
    }

    fn running_at(net: &mut Network, train: &mut Train, offset: f64, speed: f64) {
        movement::attach(net, train).unwrap();
        movement::commit(net, train, offset).unwrap();
        train.speed = speed;
        train.state = TrainState::RunningFast;
    }

    fn lock_signal(net: &mut Network, locked: bool) {
        let s = net.node_id("S").unwrap();
        net.nodes[s].element.signal_mut().unwrap().locked[0] = locked;
    }

    #[test]
    fn test_successor_table_is_closed() {
        let mut seen = HashSet::new();
        let mut stack = vec![TrainState::Entering];
        while let Some(s) = stack.pop() {
            if seen.insert(s) {
                stack.extend(s.successors().iter().copied());
            }
        }
        for state in TrainState::iter() {
            assert!(seen.contains(&state), "{} unreachable", state);
            assert!(!state.successors().contains(&TrainState::Entering));
        }
        assert_eq!(TrainState::WaitingForLoaded.to_string(), "WAITING_FOR_LOADED");
        assert_eq!(
            "RUNNING_MIN".parse::<TrainState>().unwrap(),
            TrainState::RunningMin
        );
    }

    #[test]
    fn test_entering_waits_for_timer() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        for _ in 0..4 {
            dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
            assert_eq!(train.state, TrainState::Entering);
        }
        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::RunningFast);
        assert!(train.is_attached());
        assert_eq!(net.occupant(0), Some(1));
    }

    #[test]
    fn test_entering_queues_behind_occupied_entry() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        net.occupancy[0] = Some(9);
        for _ in 0..8 {
            dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        }
        assert_eq!(train.state, TrainState::Entering);
        assert_eq!(train.stats.wait_time, 4.);

        net.occupancy[0] = None;
        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::RunningFast);
    }

    #[test]
    fn test_lookahead_on_locked_signal_slows_down() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        lock_signal(&mut net, true);
        running_at(&mut net, &mut train, 800., 30.);

        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::RunningMin);
        assert_eq!(train.speed, 28.);
        assert_eq!(train.head.offset, 828.);
    }

    #[test]
    fn test_reaching_signal_then_release() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        lock_signal(&mut net, true);
        running_at(&mut net, &mut train, 997., 5.5);
        train.state = TrainState::RunningMin;

        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::WaitingForSignal);
        assert_eq!(train.speed, 0.);
        assert_eq!(train.head.offset, 1000.);
        assert_eq!(train.stats.stops, 1);

        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::WaitingForSignal);

        lock_signal(&mut net, false);
        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::RunningFast);
        assert_eq!(train.speed, 1.);
        assert_eq!(train.head.route, RouteId::new(1, Heading::Forward));
    }

    #[test]
    fn test_brakes_onto_destination_platform_and_loads() {
        let cfg = SimConfig {
            loading_time: 3.,
            ..SimConfig::default()
        };
        let mut net = layout();
        let mut train = train_to(&net, "P", &cfg);
        running_at(&mut net, &mut train, 900., 20.);

        let mut states = vec![];
        for _ in 0..60 {
            dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
            states.push(train.state);
            if train.state == TrainState::WaitingForLoaded {
                break;
            }
        }
        assert!(states.contains(&TrainState::Braking));
        assert_eq!(train.state, TrainState::WaitingForLoaded);
        assert_eq!(train.head.route, RouteId::new(1, Heading::Forward));
        assert!((train.head.offset - 200.).abs() < 1e-9);
        assert_eq!(train.speed, 0.);

        for _ in 0..3 {
            dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        }
        assert!(train.loaded);
        assert!(train.stats.arrived);
        assert_eq!(train.state, TrainState::WaitingForRun);

        dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        assert_eq!(train.state, TrainState::WaitingForRun);
        assert_eq!(train.stats.idle_time, 1.);
    }

    #[test]
    fn test_operator_hold_ends_in_waiting_for_run() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        running_at(&mut net, &mut train, 100., 10.);
        train.held = true;
        train.state = TrainState::Braking;

        for _ in 0..10 {
            dispatch(&mut train, &mut net, &cfg, 1.).unwrap();
        }
        assert_eq!(train.state, TrainState::WaitingForRun);
        // 8 + 6 + 4 + 2
        assert!((train.head.offset - 120.).abs() < 1e-9);
    }

    #[test]
    fn test_exit_through_boundary() {
        let cfg = SimConfig::default();
        let mut net = layout();
        let mut train = train_to(&net, "B", &cfg);
        running_at(&mut net, &mut train, 0., 0.);

        let b = net.node_id("B").unwrap();
        let mut exit = None;
        for _ in 0..400 {
            if let Some(node) = dispatch(&mut train, &mut net, &cfg, 1.).unwrap() {
                exit = Some(node);
                break;
            }
        }
        assert_eq!(exit, Some(b));
        assert!(net.occupancy.iter().all(Option::is_none));
        assert!(train.stats.distance >= 2200.);
    }
}
