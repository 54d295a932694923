// 聯鎖
// 區段 = 兩架信號機之間按當前道岔位置連通的軌道
// 只有這裏的函數改變道岔位置和信號機鎖閉

use std::collections::HashSet;

use log::{debug, info};

use crate::error::Rejected;

use super::topo::{Element, End, Network, Next, NodeId, RouteId, TrackId};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Section {
    pub(crate) tracks: Vec<TrackId>,
    pub(crate) junctions: Vec<NodeId>,
    pub(crate) signals: usize, //邊界信號機
    pub(crate) held: usize,    //進入方向已鎖閉的邊界信號機
    pub(crate) occupied: bool,
}

impl Section {
    pub(crate) fn is_held(&self) -> bool {
        self.signals > 0 && self.held == self.signals
    }

    pub(crate) fn is_busy(&self, net: &Network) -> bool {
        self.occupied || self.junctions.iter().any(|&j| net.node(j).is_busy())
    }
}

pub(crate) fn compute_needed_lock(net: &Network, track: TrackId) -> Section {
    let mut section = Section::default();
    let mut seen_tracks = HashSet::new();
    let mut seen_junctions = HashSet::new();
    let mut stack = vec![track];

    while let Some(t) = stack.pop() {
        if !seen_tracks.insert(t) {
            continue;
        }
        section.tracks.push(t);
        if net.occupant(t).is_some() {
            section.occupied = true;
        }

        for &End { node, slot } in net.track(t).ends.iter() {
            let n = net.node(node);
            match &n.element {
                Element::Signal(s) => {
                    section.signals += 1;
                    //從另一側進入本區段的方向
                    if s.locked[1 - slot] {
                        section.held += 1;
                    }
                    continue;
                }
                Element::Line | Element::DeadEnd => continue,
                _ => {}
            }
            if n.element.is_junction() && seen_junctions.insert(node) {
                section.junctions.push(node);
            }
            for other in linked_slots(&n.element, slot, n.slots.len()) {
                stack.push(n.slots[other].track);
            }
        }
    }
    section
}

fn linked_slots(element: &Element, slot: usize, arity: usize) -> Vec<usize> {
    (0..arity)
        .filter(|&o| {
            o != slot && (element.wiring(slot) == Some(o) || element.wiring(o) == Some(slot))
        })
        .collect()
}

//對準後方的對向道岔，占用或鎖閉的不動
pub(crate) fn propagate_deviation(net: &mut Network, changed: NodeId) {
    let starts: Vec<RouteId> = {
        let n = net.node(changed);
        (0..n.slots.len())
            .filter(|&s| n.element.wiring(s).is_some())
            .map(|s| n.slots[s].outcome)
            .collect()
    };

    let mut visited = HashSet::new();
    for start in starts {
        let mut route = start;
        while visited.insert(route) {
            let End { node, slot } = net.end_of(route);
            let n = net.node(node);
            if n.element.is_boundary() {
                break;
            }
            //環線上會回到被操作的道岔本身
            let trailing = match &n.element {
                Element::Switch(sw) if node != changed => {
                    slot > 0 && n.element.wiring(slot).is_none() && !n.is_busy() && !sw.is_locked()
                }
                _ => false,
            };
            if trailing {
                if let Some(sw) = net.nodes[node].element.switch_mut() {
                    sw.deviated = slot == 2;
                }
                debug!("aligned trailing switch {}", net.node(node).name());
            }
            match net.next_route(route) {
                Next::Route(next, _) => route = next,
                _ => break,
            }
        }
    }
}

fn switch_id(net: &Network, name: &str) -> Result<NodeId, Rejected> {
    net.node_id(name)
        .filter(|&id| net.node(id).element.switch().is_some())
        .ok_or_else(|| Rejected::UnknownSwitch(name.to_string()))
}

fn signal_id(net: &Network, name: &str) -> Result<NodeId, Rejected> {
    net.node_id(name)
        .filter(|&id| net.node(id).element.signal().is_some())
        .ok_or_else(|| Rejected::UnknownSignal(name.to_string()))
}

pub(crate) fn set_switch_deviated(
    net: &mut Network,
    name: &str,
    deviated: bool,
) -> Result<(), Rejected> {
    let id = switch_id(net, name)?;
    {
        let node = net.node(id);
        if node.is_busy() {
            return Err(Rejected::Busy(name.to_string()));
        }
        match node.element.switch() {
            Some(sw) if sw.is_locked() => return Err(Rejected::Locked(name.to_string())),
            Some(sw) if sw.deviated == deviated => return Ok(()),
            _ => {}
        }
    }

    if let Some(sw) = net.nodes[id].element.switch_mut() {
        sw.deviated = deviated;
    }
    info!(
        "switch {} -> {}",
        name,
        if deviated { "deviated" } else { "direct" }
    );
    propagate_deviation(net, id);
    refresh(net);
    Ok(())
}

pub(crate) fn set_signal_locked(
    net: &mut Network,
    name: &str,
    index: usize,
    locked: bool,
) -> Result<(), Rejected> {
    let id = signal_id(net, name)?;
    if index >= 2 {
        return Err(Rejected::SignalIndex {
            id: name.to_string(),
            index,
        });
    }
    {
        let node = net.node(id);
        if node.element.signal().map(|s| s.locked[index]) == Some(locked) {
            return Ok(());
        }
        //列車正在通過時不能關閉
        if locked && node.is_busy() {
            return Err(Rejected::Busy(name.to_string()));
        }
    }

    if let Some(s) = net.nodes[id].element.signal_mut() {
        s.locked[index] = locked;
    }
    info!(
        "signal {}[{}] {}",
        name,
        index,
        if locked { "locked" } else { "released" }
    );
    refresh(net);
    Ok(())
}

pub(crate) fn set_auto_lock(net: &mut Network, name: &str, on: bool) -> Result<(), Rejected> {
    let id = switch_id(net, name)?;
    if let Some(sw) = net.nodes[id].element.switch_mut() {
        sw.auto_lock = on;
        if !on {
            sw.auto_locked = false;
        }
    }
    info!("switch {} auto lock {}", name, on);
    refresh(net);
    Ok(())
}

/// Re-derives signal `busy` flags and auto-lock state from occupancy and wiring.
pub(crate) fn refresh(net: &mut Network) {
    let mut signals = Vec::new();
    let mut switches = Vec::new();

    for (id, node) in net.nodes.iter().enumerate() {
        match &node.element {
            Element::Signal(_) => {
                let mut busy = [false; 2];
                for (income, flag) in busy.iter_mut().enumerate() {
                    let out = &node.slots[1 - income];
                    *flag = compute_needed_lock(net, out.track).is_busy(net)
                        || !net.is_transitable(out.outcome);
                }
                signals.push((id, busy));
            }
            Element::Switch(sw) | Element::CrossingDeviator(sw) if sw.auto_lock => {
                let section = compute_needed_lock(net, node.slots[0].track);
                switches.push((id, section.occupied || section.is_held()));
            }
            _ => {}
        }
    }

    for (id, busy) in signals {
        if let Some(s) = net.nodes[id].element.signal_mut() {
            s.busy = busy;
        }
    }
    for (id, locked) in switches {
        if let Some(sw) = net.nodes[id].element.switch_mut() {
            if sw.auto_locked != locked {
                sw.auto_locked = locked;
                debug!("switch {} auto locked: {}", id, locked);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::topo::Heading;
    use crate::raw_station::{builder::StationBuilder, test_station, RawNodeKind};

    fn station() -> Network {
        Network::new(&test_station()).unwrap()
    }

    fn id(net: &Network, name: &str) -> NodeId {
        net.node_id(name).unwrap()
    }

    fn deviated(net: &Network, name: &str) -> bool {
        net.node(id(net, name)).element.switch().unwrap().deviated
    }

    fn signal_busy(net: &Network, name: &str) -> [bool; 2] {
        net.node(id(net, name)).element.signal().unwrap().busy
    }

    #[test]
    fn test_section_between_signals() {
        let mut net = station();
        let section = compute_needed_lock(&net, 1);
        let mut tracks = section.tracks.clone();
        tracks.sort();
        assert_eq!(tracks, vec![1, 2, 3, 6]);
        assert_eq!(section.junctions.len(), 2);
        assert_eq!(section.signals, 2);
        assert!(!section.is_held());
        assert!(!section.occupied);

        set_signal_locked(&mut net, "S1", 0, true).unwrap();
        assert!(!compute_needed_lock(&net, 1).is_held());
        set_signal_locked(&mut net, "S2", 1, true).unwrap();
        assert!(compute_needed_lock(&net, 2).is_held());

        // 出站方向的鎖閉不保持本區段
        let outer = compute_needed_lock(&net, 0);
        assert_eq!(outer.tracks, vec![0]);
        assert_eq!(outer.signals, 1);
        assert_eq!(outer.held, 0);
    }

    #[test]
    fn test_busy_switch_is_rejected() {
        let mut net = station();
        let sw1 = id(&net, "SW1");
        net.nodes[sw1].transits = 1;
        assert_eq!(
            set_switch_deviated(&mut net, "SW1", true),
            Err(Rejected::Busy("SW1".to_string()))
        );
        assert!(!deviated(&net, "SW1"));
        assert!(!deviated(&net, "SW2"));
    }

    #[test]
    fn test_unknown_targets() {
        let mut net = station();
        assert_eq!(
            set_switch_deviated(&mut net, "S1", true),
            Err(Rejected::UnknownSwitch("S1".to_string()))
        );
        assert_eq!(
            set_signal_locked(&mut net, "SW1", 0, true),
            Err(Rejected::UnknownSignal("SW1".to_string()))
        );
        assert_eq!(
            set_signal_locked(&mut net, "S1", 2, true),
            Err(Rejected::SignalIndex {
                id: "S1".to_string(),
                index: 2
            })
        );
        assert!(set_auto_lock(&mut net, "nope", true).is_err());
    }

    #[test]
    fn test_deviation_aligns_trailing_switch() {
        let mut net = station();
        set_switch_deviated(&mut net, "SW1", true).unwrap();
        assert!(deviated(&net, "SW1"));
        assert!(deviated(&net, "SW2"));
        assert!(net.is_transitable(RouteId::new(1, Heading::Forward)));
        assert_eq!(signal_busy(&net, "S1"), [false, false]);

        // 未變化時不傳播
        let sw2 = id(&net, "SW2");
        net.nodes[sw2].element.switch_mut().unwrap().deviated = false;
        set_switch_deviated(&mut net, "SW1", true).unwrap();
        assert!(!deviated(&net, "SW2"));
    }

    #[test]
    fn test_trailing_switch_kept_when_locked() {
        let mut net = station();
        let sw2 = id(&net, "SW2");
        net.nodes[sw2].element.switch_mut().unwrap().locked = true;
        set_switch_deviated(&mut net, "SW1", true).unwrap();
        assert!(!deviated(&net, "SW2"));
        // SW1 反位而 SW2 定位，進路不通
        assert_eq!(signal_busy(&net, "S1"), [true, false]);
        assert_eq!(
            set_switch_deviated(&mut net, "SW2", true),
            Err(Rejected::Locked("SW2".to_string()))
        );
    }

    #[test]
    fn test_refresh_from_occupancy() {
        let mut net = station();
        net.occupancy[2] = Some(1);
        refresh(&mut net);
        assert_eq!(signal_busy(&net, "S1"), [true, false]);
        assert_eq!(signal_busy(&net, "S2"), [false, true]);

        // SW1 配置了自動鎖閉
        let sw1 = id(&net, "SW1");
        assert!(net.node(sw1).element.switch().unwrap().auto_locked);
        assert_eq!(
            set_switch_deviated(&mut net, "SW1", true),
            Err(Rejected::Locked("SW1".to_string()))
        );

        set_auto_lock(&mut net, "SW1", false).unwrap();
        assert!(set_switch_deviated(&mut net, "SW1", true).is_ok());

        net.occupancy[2] = None;
        refresh(&mut net);
        assert_eq!(signal_busy(&net, "S2"), [false, false]);
    }

    #[test]
    fn test_locking_signal_under_train() {
        let mut net = station();
        let s1 = id(&net, "S1");
        net.nodes[s1].transits = 1;
        assert_eq!(
            set_signal_locked(&mut net, "S1", 0, true),
            Err(Rejected::Busy("S1".to_string()))
        );
        net.nodes[s1].transits = 0;
        set_signal_locked(&mut net, "S1", 0, true).unwrap();
        assert!(net.node(s1).element.signal().unwrap().locked[0]);
        set_signal_locked(&mut net, "S1", 0, false).unwrap();
        assert!(!net.node(s1).element.signal().unwrap().locked[0]);
    }

    // A --t0-- SW(0)
    //          SW(1) --t1-- P --t2-- SW(2)
    // R1 --t3-- R2 --t4-- R1
    fn loops() -> Network {
        let station = StationBuilder::default()
            .node("A", RawNodeKind::Line, 0.)
            .node("SW", RawNodeKind::Switch, 500.)
            .node("P", RawNodeKind::Platform, 900.)
            .node("R1", RawNodeKind::Point, 0.)
            .node("R2", RawNodeKind::Point, 100.)
            .track(("A", 0), ("SW", 0), 500.)
            .track(("SW", 1), ("P", 0), 400.)
            .track(("P", 1), ("SW", 2), 400.)
            .track(("R1", 1), ("R2", 0), 100.)
            .track(("R2", 1), ("R1", 0), 100.)
            .build();
        Network::new(&station).unwrap()
    }

    #[test]
    fn test_cyclic_layouts_terminate() {
        let mut net = loops();
        refresh(&mut net);

        let section = compute_needed_lock(&net, 1);
        let mut tracks = section.tracks.clone();
        tracks.sort();
        assert_eq!(tracks, vec![0, 1, 2]);
        assert_eq!(section.junctions, vec![id(&net, "SW")]);
        assert_eq!(section.signals, 0);
        assert!(!section.is_held());
        assert!(!net.is_transitable(RouteId::new(1, Heading::Forward)));

        // 環線繞回時不改變剛操作的道岔
        set_switch_deviated(&mut net, "SW", true).unwrap();
        assert!(deviated(&net, "SW"));
        assert!(net.is_transitable(RouteId::new(1, Heading::Forward)));
        set_switch_deviated(&mut net, "SW", false).unwrap();
        assert!(!deviated(&net, "SW"));

        let ring = compute_needed_lock(&net, 3);
        let mut tracks = ring.tracks.clone();
        tracks.sort();
        assert_eq!(tracks, vec![3, 4]);
        assert!(ring.junctions.is_empty());
        assert!(net.is_transitable(RouteId::new(3, Heading::Forward)));
        assert!(net.is_transitable(RouteId::new(4, Heading::Backward)));
        let r1 = id(&net, "R1");
        propagate_deviation(&mut net, r1);
        refresh(&mut net);
    }
}
