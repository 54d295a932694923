use std::{env, str::FromStr};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Kinematic constants and timers of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub max_speed: f64,        //m/s
    pub acceleration: f64,     //m/s²
    pub deceleration: f64,     //m/s²，負值
    pub min_speed: f64,        //接近限速
    pub coach_length: f64,     //m
    pub entry_delay: f64,      //s
    pub loading_time: f64,     //s
    pub lookahead_margin: f64, //m
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            max_speed: 38.9,
            acceleration: 1.0,
            deceleration: -2.0,
            min_speed: 5.5,
            coach_length: 25.0,
            entry_delay: 5.0,
            loading_time: 30.0,
            lookahead_margin: 10.0,
        }
    }
}

impl SimConfig {
    pub fn from_yaml(yaml: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(yaml)
    }

    /// Defaults overridden by `SIGNALBOX_*` variables, e.g. `SIGNALBOX_MAX_SPEED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = SimConfig::default();
        override_with(&lookup, "SIGNALBOX_MAX_SPEED", &mut cfg.max_speed);
        override_with(&lookup, "SIGNALBOX_ACCELERATION", &mut cfg.acceleration);
        override_with(&lookup, "SIGNALBOX_DECELERATION", &mut cfg.deceleration);
        override_with(&lookup, "SIGNALBOX_MIN_SPEED", &mut cfg.min_speed);
        override_with(&lookup, "SIGNALBOX_COACH_LENGTH", &mut cfg.coach_length);
        override_with(&lookup, "SIGNALBOX_ENTRY_DELAY", &mut cfg.entry_delay);
        override_with(&lookup, "SIGNALBOX_LOADING_TIME", &mut cfg.loading_time);
        override_with(&lookup, "SIGNALBOX_LOOKAHEAD_MARGIN", &mut cfg.lookahead_margin);
        cfg
    }

    /// Magnitude of the braking rate.
    pub fn braking(&self) -> f64 {
        self.deceleration.abs()
    }
}

fn override_with<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Debug,
{
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!("{} = {:?}", key, value);
                *slot = value;
            }
            Err(_) => warn!("ignoring {}: cannot parse {:?}", key, raw),
        }
    }
}
