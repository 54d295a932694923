use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Debug, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Line,             //出入口，列車從這裏進出站場
    DeadEnd,          //尽头
    Point,            //普通連接點
    Signal,           //信號機
    Platform,         //站台
    Switch,           //道岔 0:岔尖 1:定位 2:反位
    Crossing,         //交叉渡線
    CrossingDeviator, //交分道岔
}

impl NodeKind {
    /// Number of track slots a node of this kind exposes.
    pub fn arity(&self) -> usize {
        match self {
            NodeKind::Line | NodeKind::DeadEnd => 1,
            NodeKind::Point | NodeKind::Signal | NodeKind::Platform => 2,
            NodeKind::Switch => 3,
            NodeKind::Crossing | NodeKind::CrossingDeviator => 4,
        }
    }

    pub fn is_junction(&self) -> bool {
        matches!(
            self,
            NodeKind::Switch | NodeKind::Crossing | NodeKind::CrossingDeviator
        )
    }

    pub fn has_deviation(&self) -> bool {
        matches!(self, NodeKind::Switch | NodeKind::CrossingDeviator)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub pos: (f64, f64), //位置 渲染用
    #[serde(default)]
    pub deviated: bool, //道岔初始位置，false為定位
    #[serde(default)]
    pub auto_lock: bool, //列車進入區段時自動鎖閉
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Joint {
    pub node: String,
    pub slot: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Track {
    pub id: String,
    pub from: Joint,
    pub to: Joint,
    #[serde(default)]
    pub length: Option<f64>, //缺省時按幾何長度計算
    #[serde(default)]
    pub curve: Option<(f64, f64)>, //曲線控制點，無則為直線
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Station {
    pub title: String,
    pub nodes: Vec<Node>,
    pub tracks: Vec<Track>,
}

impl Station {
    pub fn from_yaml(yaml: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
