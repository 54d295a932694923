pub use signalbox_common::station::{Joint, Node, NodeKind, Station, Track};

pub type RawStation = Station;
pub type RawNode = Node;
pub type RawNodeKind = NodeKind;
pub type RawTrack = Track;
pub type RawJoint = Joint;

#[cfg(test)]
pub(crate) fn test_station() -> RawStation {
    let yaml = include_str!("../../signalbox-common/test_data.yml");
    RawStation::from_yaml(yaml).expect("test_data.yml is a valid station")
}
