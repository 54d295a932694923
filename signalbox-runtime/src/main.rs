use std::{env, fs};

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::{info, warn};
use signalbox_runtime::{InstanceConfig, SimConfig, Simulation};

fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("SIGNALBOX_INSTANCE").ok())
        .context("usage: signalbox-runtime <instance.yml>")?;
    let yaml = fs::read_to_string(&path).with_context(|| format!("cannot read {}", path))?;
    let cfg = InstanceConfig::from_yaml(&yaml).with_context(|| format!("invalid instance {}", path))?;

    let sim_cfg = cfg.sim.clone().unwrap_or_else(SimConfig::from_env);
    let mut sim = Simulation::load_topology(&cfg.station, sim_cfg)?;
    info!("instance {} on {}", cfg.id, cfg.station.title);

    let mut schedule = cfg.schedule.clone();
    schedule.sort_by(|a, b| a.at.partial_cmp(&b.at).unwrap_or(std::cmp::Ordering::Equal));
    let mut pending = schedule.into_iter().peekable();

    while sim.elapsed() < cfg.duration {
        while let Some(req) = pending.next_if(|r| r.at <= sim.elapsed()) {
            if let Err(e) = sim.create_train(&req.entry, &req.destination, req.coaches) {
                warn!("skipping train {} -> {}: {}", req.entry, req.destination, e);
            }
        }
        let report = sim.tick(cfg.dt)?;
        for exit in &report.exits {
            info!("{:.1}s: train {} left by {}", report.elapsed, exit.train, exit.node);
        }
    }

    println!("{}", sim.stats().to_json()?);
    Ok(())
}
