//! # Axle Simulator
//!
//! Runs the motion-control engine against virtual motors, paced by a timer
//! thread that stands in for the hardware tick interrupt. The interrupt
//! surrogate performs only the bookkeeping a real handler is allowed to do:
//! it advances the millisecond counter and sets the poll-request flag.
//!
//! The scenario (tick rate, motors, commands) comes from a TOML file; see
//! `config/scenario.toml` for an example.

mod plant;
mod stats;

use std::cell::RefCell;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use axle_common::actuation::{ExecMode, StopAction};
use axle_common::angle::Angle;
use axle_common::config::{CommandConfig, MotorConfig, ScenarioConfig};
use axle_common::error::MotionError;
use axle_motion::control::Control;
use axle_motion::scheduler::{
    PollFlag, Process, ProcessRequest, ProcessStatus, Scheduler, TaskSlot, Timer,
};

use crate::plant::{Driver, Encoder, Plant};
use crate::stats::TickStats;

/// Most motors one hub services.
const MAX_MOTORS: usize = 8;

/// Axle Simulator: the motion engine against virtual motors
#[derive(Parser, Debug)]
#[command(name = "axle_sim")]
#[command(version)]
#[command(about = "Runs the axle motion engine against a simulated motor set")]
struct Args {
    /// Path to the scenario TOML.
    #[arg(default_value = "axle_sim/config/scenario.toml")]
    scenario: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("axle_sim v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("axle_sim run complete");
}

/// One motor: controller, plant halves, and the per-tick drive logic,
/// registered with the scheduler as a resumable task.
struct MotorTask {
    port: String,
    control: Control,
    encoder: Encoder,
    driver: Driver,
    plant: Rc<RefCell<Plant>>,
    command: CommandConfig,
    started: bool,
    timer: Timer,
    tick_s: f64,
    reported_done: bool,
}

impl MotorTask {
    fn from_config(config: &MotorConfig, tick_ms: u32) -> Result<MotorTask, MotionError> {
        let (settings, observer) = config
            .resolve_settings()
            .map_err(|_| MotionError::InvalidArgument("unresolvable motor settings"))?;
        let mut plant_state = Plant::for_device(config.device);
        if let Some(load) = config.load_torque {
            plant_state.load = load as f64;
        }
        if let Some(stop_deg) = config.end_stop_deg {
            plant_state.end_stop = Some(stop_deg as f64 * 1_000_000.0);
        }
        let plant = Rc::new(RefCell::new(plant_state));
        Ok(MotorTask {
            port: config.port.clone(),
            control: Control::new(settings, observer, tick_ms)?,
            encoder: Encoder(plant.clone()),
            driver: Driver(plant.clone()),
            plant,
            command: config.command,
            started: false,
            timer: Timer::set(0, tick_ms),
            tick_s: tick_ms as f64 / 1000.0,
            reported_done: false,
        })
    }

    fn issue_command(&mut self, now: u32) -> Result<(), MotionError> {
        let default_speed = self.control.settings().speed_default;
        let scale = self.control.settings().ctl_steps_per_app_step;
        match self.command {
            CommandConfig::Run { speed } => {
                self.control
                    .run(now, &mut self.encoder, speed, ExecMode::Background)
            }
            CommandConfig::RunForDuration {
                speed,
                duration_ms,
                then,
            } => self.control.run_for_duration(
                now,
                &mut self.encoder,
                speed,
                duration_ms,
                then,
                ExecMode::Background,
            ),
            CommandConfig::RunUntilStalled { speed, then } => self.control.run_until_stalled(
                now,
                &mut self.encoder,
                speed,
                then,
                ExecMode::Background,
            ),
            CommandConfig::RunToTarget {
                target_deg,
                speed,
                then,
            } => {
                let target = Angle::from_low_res(target_deg, scale)?;
                self.control.run_to_target(
                    now,
                    &mut self.encoder,
                    target,
                    speed.unwrap_or(default_speed),
                    then,
                    ExecMode::Background,
                )
            }
        }
    }

    fn summary(&self) {
        let plant = self.plant.borrow();
        let degrees = plant.position_mdeg() as f64 / 1000.0;
        info!(
            port = %self.port,
            angle_deg = degrees,
            state = ?self.control.state(),
            stalled = ?self.control.is_stalled(),
            "motor summary"
        );
    }
}

impl Process for MotorTask {
    fn poll(&mut self, now: u32, request: Option<ProcessRequest>) -> ProcessStatus {
        if matches!(request, Some(ProcessRequest::Cancel)) {
            self.control.stop(StopAction::Coast);
        }

        if !self.started {
            self.started = true;
            if let Err(e) = self.issue_command(now) {
                error!(port = %self.port, error = %e, "command rejected");
                return ProcessStatus::Failed(e);
            }
        }

        // One control update per elapsed tick; the timer keeps the cadence
        // drift-free even if a pass arrives late.
        while self.timer.is_expired(now) {
            self.timer.extend();
            match self.control.tick(now, &mut self.encoder, &mut self.driver) {
                Err(e) => {
                    error!(port = %self.port, error = %e, "controller fault");
                    return ProcessStatus::Failed(e);
                }
                Ok(status) => {
                    if self.control.is_done() && !self.reported_done {
                        self.reported_done = true;
                        debug!(port = %self.port, ?status, at_ms = now, "maneuver finished");
                    }
                }
            }
            self.plant.borrow_mut().step(self.tick_s);
        }

        // A motor that has gone fully idle needs no more turns; holding
        // or open-ended motors keep running until the scenario ends.
        if self.control.is_done() && self.control.is_idle() {
            ProcessStatus::Complete
        } else {
            ProcessStatus::Again
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ScenarioConfig::load(&args.scenario)?;
    info!(
        "scenario OK: tick={}ms, run_time={}ms, motors={}",
        config.tick_ms,
        config.run_time_ms,
        config.motors.len()
    );
    if config.motors.len() > MAX_MOTORS {
        return Err(format!("at most {MAX_MOTORS} motors are supported").into());
    }

    let mut tasks: heapless::Vec<MotorTask, MAX_MOTORS> = heapless::Vec::new();
    for motor in &config.motors {
        let task = MotorTask::from_config(motor, config.tick_ms)?;
        tasks.push(task).ok();
    }

    let flag = PollFlag::new();
    let millis = AtomicU32::new(0);
    let shutdown = AtomicBool::new(false);
    let tick_ms = config.tick_ms;
    let run_time = config.run_time_ms;
    let budget_ns = tick_ms as i64 * 1_000_000;
    let mut stats = TickStats::new();

    std::thread::scope(|scope| {
        // Stand-in for the hardware tick interrupt: bounded bookkeeping
        // only (advance the clock, request a poll).
        scope.spawn(|| {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(tick_ms as u64));
                millis.fetch_add(tick_ms, Ordering::SeqCst);
                flag.request_poll();
            }
        });

        let mut scheduler = Scheduler::new(&flag);
        let mut slots: heapless::Vec<TaskSlot<'_>, MAX_MOTORS> = heapless::Vec::new();
        for task in tasks.iter_mut() {
            slots.push(TaskSlot::new(task as &mut dyn Process)).ok();
        }

        loop {
            let now = millis.load(Ordering::SeqCst);
            if now >= run_time || slots.iter().all(|s| s.is_finished()) {
                break;
            }
            if flag.is_pending() {
                let pass_start = Instant::now();
                scheduler.run_until_idle(now, &mut slots);
                stats.record(pass_start.elapsed().as_nanos() as i64, budget_ns);
            }
            // Low-power wait stand-in, guarded against a lost wake-up.
            if scheduler.can_sleep() {
                std::thread::sleep(Duration::from_micros(500));
            }
        }

        shutdown.store(true, Ordering::Relaxed);
    });

    info!(
        "scheduler: {} passes, avg {}µs, max {}µs, {} overruns",
        stats.pass_count,
        stats.avg_ns() / 1_000,
        stats.max_ns / 1_000,
        stats.overruns
    );
    for task in &tasks {
        task.summary();
    }
    Ok(())
}

/// Set up the tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
