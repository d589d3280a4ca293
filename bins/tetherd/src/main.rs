// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tether daemon (tetherd)
//!
//! Headless skeleton that hosts the coordination core: it paces the
//! coordinator at the configured tick rate, logs cycle summaries, and shuts
//! down cleanly on ctrl-c. The memory actuator here is an in-process
//! loopback; production embeds the core next to a real game-process
//! actuator and a network transport instead.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tether_core::{
    ActuatorError, CoreConfig, Coordinator, MemoryActuator, MemoryHandle, Quat, Vec3,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Simulation tick rate in Hz
    #[clap(short, long, default_value_t = 20.0)]
    tick_rate: f64,

    /// Maximum observations drained per cycle
    #[clap(short, long, default_value_t = 1000)]
    max_infos: usize,

    /// Cycles between summary log lines
    #[clap(short, long, default_value_t = 100)]
    summary_every: u64,
}

/// In-process loopback actuator: writes land in a map, reads serve it back.
#[derive(Default)]
struct LoopbackActuator {
    transforms: Mutex<HashMap<MemoryHandle, (Vec3, Quat)>>,
    healths: Mutex<HashMap<MemoryHandle, (f32, f32)>>,
}

impl MemoryActuator for LoopbackActuator {
    fn read_transform(
        &self,
        handle: MemoryHandle,
    ) -> Result<Option<(Vec3, Quat)>, ActuatorError> {
        Ok(self.transforms.lock().get(&handle).copied())
    }

    fn read_health(&self, handle: MemoryHandle) -> Result<Option<(f32, f32)>, ActuatorError> {
        Ok(self.healths.lock().get(&handle).copied())
    }

    fn write_transform(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError> {
        self.transforms.lock().insert(handle, (position, rotation));
        Ok(())
    }

    fn write_transform_immediate(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError> {
        self.transforms.lock().insert(handle, (position, rotation));
        Ok(())
    }

    fn write_health(
        &self,
        handle: MemoryHandle,
        current: f32,
        maximum: f32,
    ) -> Result<(), ActuatorError> {
        self.healths.lock().insert(handle, (current, maximum));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CoreConfig {
        tick_rate_hz: args.tick_rate,
        max_infos_per_cycle: args.max_infos,
        ..CoreConfig::default()
    }
    .validated()?;

    info!("Starting Tether daemon (tetherd)...");
    info!("Tick rate: {} Hz", config.tick_rate_hz);
    info!("Drain cap: {} infos/cycle", config.max_infos_per_cycle);

    let coordinator = Arc::new(Coordinator::new(
        config,
        Arc::new(LoopbackActuator::default()),
    ));

    let mut pacer = tokio::time::interval(coordinator.clock().tick_duration());
    pacer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = pacer.tick() => {
                let report = coordinator.run_cycle();
                if report.cycle_count % args.summary_every == 0 {
                    info!(
                        tick = report.tick,
                        processed = report.observations_processed,
                        committed = report.committed,
                        rejected = report.rejected,
                        verifications_failed = report.verifications_failed,
                        drift = coordinator.clock().tick_drift(),
                        "cycle summary"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                coordinator.cancel();
                break;
            }
        }
    }

    info!(
        cycles = coordinator.recent_cycles().len(),
        "Tether daemon stopped"
    );
    Ok(())
}
