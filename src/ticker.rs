//! Fixed-rate driving of the simulation.

use crate::Simulation;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the loop sleeps between checks while paused.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Configuration parameters for the [`Ticker`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// The number of simulation steps per second of real time at speed 1.
    pub ticks_per_second: f64,
    /// When the loop falls behind real time by more than this, the backlog
    /// is discarded and stepping resumes from the current time instead of
    /// trying to catch up.
    pub tick_skip_threshold: Duration,
}

impl TickerConfig {
    fn validate(&self) -> Result<()> {
        if self.ticks_per_second <= 0.0 {
            bail!("Invalid tick rate: {}", self.ticks_per_second);
        }
        Ok(())
    }

    /// The fixed duration of one simulation step.
    pub fn tick_duration(&self) -> f64 {
        1.0 / self.ticks_per_second
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 120.0,
            tick_skip_threshold: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct TickerState {
    speed: f64,
    stop_requested: bool,
}

/// Drives a [`Simulation`] at a fixed tick rate on a dedicated thread.
///
/// The simulation time step is always `1 / ticks_per_second`; the speed
/// multiplier stretches or compresses how much real time passes between
/// steps. A speed of zero pauses the loop while leaving the world free for
/// observers. Stopping waits for the tick in flight to finish; a tick is
/// never interrupted.
#[derive(Debug)]
pub struct Ticker {
    simulation: Simulation,
    config: TickerConfig,
    state: Arc<Mutex<TickerState>>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Creates a new ticker for the given simulation.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(simulation: Simulation, config: TickerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            simulation,
            config,
            state: Arc::new(Mutex::new(TickerState {
                speed: 1.0,
                stop_requested: false,
            })),
            thread: None,
        })
    }

    /// Returns the configuration of the ticker.
    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    /// Starts the simulation thread. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.state.lock().stop_requested = false;

        let simulation = self.simulation.clone();
        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        self.thread = Some(
            thread::Builder::new()
                .name("kinetic-ticker".to_owned())
                .spawn(move || run_loop(&simulation, &config, &state))
                .expect("Failed spawning simulation thread"),
        );
    }

    /// Stops the simulation thread, waiting for the tick in flight to
    /// finish. Does nothing if it is not running.
    pub fn stop(&mut self) {
        self.state.lock().stop_requested = true;
        if let Some(thread) = self.thread.take() {
            thread.join().expect("Simulation thread panicked");
        }
    }

    /// Sets the simulation speed multiplier. A multiplier of zero pauses
    /// the loop.
    pub fn set_speed(&self, multiplier: f64) {
        assert!(
            multiplier >= 0.0,
            "Tried setting a negative simulation speed"
        );
        self.state.lock().speed = multiplier;
    }

    /// Returns the current simulation speed multiplier.
    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Whether the loop is currently paused (speed zero or not started).
    pub fn is_paused(&self) -> bool {
        self.thread.is_none() || self.state.lock().speed == 0.0
    }

    /// Runs a single tick immediately on the calling thread. Intended for
    /// stepping the simulation manually while paused.
    pub fn run_tick(&self) {
        let dt = self.config.tick_duration();
        self.simulation.world().write().tick(dt);
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(simulation: &Simulation, config: &TickerConfig, state: &Mutex<TickerState>) {
    let dt = config.tick_duration();
    let mut next_tick_time = Instant::now();

    loop {
        let (speed, stop_requested) = {
            let state = state.lock();
            (state.speed, state.stop_requested)
        };
        if stop_requested {
            return;
        }
        if speed == 0.0 {
            thread::sleep(PAUSE_POLL_INTERVAL);
            next_tick_time = Instant::now();
            continue;
        }

        let now = Instant::now();
        if now < next_tick_time {
            thread::sleep((next_tick_time - now).min(PAUSE_POLL_INTERVAL));
            continue;
        }

        if now - next_tick_time > config.tick_skip_threshold {
            log::warn!(
                "Simulation fell {:.0?} behind real time; discarding backlog",
                now - next_tick_time
            );
            next_tick_time = now;
        }

        simulation.world().write().tick(dt);

        next_tick_time += Duration::from_secs_f64(dt / speed);
    }
}
