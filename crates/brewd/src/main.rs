//! # brewd
//!
//! This is the supervisor process for an automated brewing rig. It owns
//! the current limiter, the temperature manager, the PID loops for the
//! hot liquor tank (HLT) and boil kettle (BK) heaters, and the valve
//! controller, and wires them together.
//!
//! ## Responsibilities
//!
//! The supervisor is responsible for:
//!
//! *   Assembling the pin wiring table and registering it with the current limiter.
//! *   Starting the temperature manager and the PID loops that consume its readings.
//! *   Starting the valve controller.
//! *   Shutting every component down cleanly, in reverse-dependency order, on Ctrl+C.
//!
//! ## Concurrency
//!
//! Every component here runs on its own preemptively scheduled OS thread
//! with explicit mutexes, not on an async runtime: the control loops are
//! soft-real-time and long-lived, not request/response.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use power_arbiter::{CurrentLimiter, PinConfiguration};
use thermal::Pid;
use tracing::info;

mod control_loop;
mod error;
mod providers;
mod sensor;
mod status;
mod temperature;
mod valve;

use control_loop::PidLoop;
use providers::{OneWireSensorProvider, SimulatedSensorProvider, SimulatedSwitch};
use sensor::SystemClock;
use temperature::TemperatureManager;
use valve::{ValveController, ValveMode};

/// Supervisor process for an automated brewing rig.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run entirely against in-memory simulated switches and sensors,
    /// instead of real GPIO and 1-wire hardware.
    #[arg(long)]
    simulate: bool,

    /// Base (overhead) current draw in milliamps, subtracted from the budget.
    #[arg(long, default_value_t = 700.0)]
    base_milli_amps: f64,

    /// Total supply current budget in milliamps.
    #[arg(long, default_value_t = 35_000.0)]
    max_milli_amps: f64,

    /// Target temperature for the hot liquor tank, in degrees Celsius.
    #[arg(long, default_value_t = 168.0)]
    hlt_setpoint_c: f64,

    /// Target temperature for the boil kettle, in degrees Celsius.
    #[arg(long, default_value_t = 100.0)]
    bk_setpoint_c: f64,

    /// Probe id of the hot liquor tank's temperature sensor.
    #[arg(long, default_value = "hlt")]
    hlt_probe_id: String,

    /// Probe id of the boil kettle's temperature sensor.
    #[arg(long, default_value = "bk")]
    bk_probe_id: String,
}

// Pin wiring. These are not loaded from a config file: the rig's wiring
// is fixed hardware, assembled here the same way the original firmware
// assembled it in code.
const HLT_HEATER_PIN: u32 = 5;
const BK_HEATER_PIN: u32 = 6;
const PUMP_1_PIN: u32 = 17;
const PUMP_2_PIN: u32 = 27;
const VALVE_PIN: u32 = 22;
const FLOAT_SWITCH_PIN: u32 = 14;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    info!("starting brewd");

    let limiter = Arc::new(CurrentLimiter::new(cli.base_milli_amps, cli.max_milli_amps));

    if cli.simulate {
        info!("running in simulated mode: no real GPIO or 1-wire hardware will be touched");
        run_simulated(cli, limiter)
    } else {
        run_hardware(cli, limiter)
    }
}

fn configure_pins(limiter: &Arc<CurrentLimiter>, make_switch: impl Fn(u32) -> Arc<dyn power_arbiter::Switch>) -> Result<()> {
    let pumps = [("pump-1", PUMP_1_PIN), ("pump-2", PUMP_2_PIN)];
    for (name, pin) in pumps {
        limiter
            .add_pin_configuration(
                PinConfiguration {
                    name: name.into(),
                    id: name.into(),
                    pin_number: pin,
                    milli_amps: 1400.0,
                    critical: true,
                    pwm: false,
                    pwm_frequency: 0.0,
                    pwm_load: 0.0,
                },
                make_switch(pin),
            )
            .context("registering pump pin")?;
    }

    limiter
        .add_pin_configuration(
            PinConfiguration {
                name: "valve".into(),
                id: "valve".into(),
                pin_number: VALVE_PIN,
                milli_amps: 200.0,
                critical: true,
                pwm: false,
                pwm_frequency: 0.0,
                pwm_load: 0.0,
            },
            make_switch(VALVE_PIN),
        )
        .context("registering valve pin")?;

    let heaters = [("hlt", HLT_HEATER_PIN), ("bk", BK_HEATER_PIN)];
    for (name, pin) in heaters {
        limiter
            .add_pin_configuration(
                PinConfiguration {
                    name: name.into(),
                    id: name.into(),
                    pin_number: pin,
                    milli_amps: 23_000.0,
                    critical: false,
                    pwm: true,
                    pwm_frequency: 10.0,
                    pwm_load: 0.0,
                },
                make_switch(pin),
            )
            .context("registering heater pin")?;
    }

    Ok(())
}

fn make_pid(setpoint_c: f64) -> Pid<f64> {
    let mut pid = Pid::new(15.0, 1.0, 3.0, setpoint_c, -100.0, 100.0);
    pid.set_error_accumulation_cap(1.5);
    pid
}

fn run_simulated(cli: Cli, limiter: Arc<CurrentLimiter>) -> Result<()> {
    configure_pins(&limiter, |_pin| SimulatedSwitch::new() as Arc<dyn power_arbiter::Switch>)?;

    let sensor_provider = Arc::new(SimulatedSensorProvider::new(
        "sim",
        vec![cli.hlt_probe_id.clone(), cli.bk_probe_id.clone()],
    ));
    let clock = Arc::new(SystemClock::default());
    let temperature_manager = Arc::new(TemperatureManager::new(sensor_provider, clock));

    let float_switch = SimulatedSwitch::new();
    run_common(cli, limiter, temperature_manager, float_switch)
}

fn run_hardware(cli: Cli, limiter: Arc<CurrentLimiter>) -> Result<()> {
    let gpio = rppal::gpio::Gpio::new().context("opening gpio")?;
    configure_pins(&limiter, |pin| {
        Arc::new(
            providers::GpioSwitch::new(&gpio, pin as u8)
                .unwrap_or_else(|e| panic!("failed to claim gpio pin {pin}: {e}")),
        ) as Arc<dyn power_arbiter::Switch>
    })?;

    let sensor_provider = Arc::new(OneWireSensorProvider::new("onewire"));
    let clock = Arc::new(SystemClock::default());
    let temperature_manager = Arc::new(TemperatureManager::new(sensor_provider, clock));

    let float_switch: Arc<dyn power_arbiter::Switch> = Arc::new(
        providers::GpioInput::new(&gpio, FLOAT_SWITCH_PIN as u8)
            .context("claiming float switch input pin")?,
    );

    run_common(cli, limiter, temperature_manager, float_switch)
}

fn run_common(
    cli: Cli,
    limiter: Arc<CurrentLimiter>,
    temperature_manager: Arc<TemperatureManager>,
    float_switch: Arc<dyn power_arbiter::Switch>,
) -> Result<()> {
    temperature_manager.start();
    info!("temperature manager started");

    let hlt_pid = Arc::new(PidLoop::new(
        temperature_manager.clone(),
        cli.hlt_probe_id.clone(),
        limiter.clone(),
        HLT_HEATER_PIN,
        make_pid(cli.hlt_setpoint_c),
    ));
    hlt_pid.start();

    let bk_pid = Arc::new(PidLoop::new(
        temperature_manager.clone(),
        cli.bk_probe_id.clone(),
        limiter.clone(),
        BK_HEATER_PIN,
        make_pid(cli.bk_setpoint_c),
    ));
    bk_pid.start();
    info!("pid loops started");

    let valve = Arc::new(ValveController::new(limiter.clone(), VALVE_PIN, float_switch));
    valve.set_mode(ValveMode::Off);
    valve.start();
    info!("valve controller started");

    let status_running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let status_handle = {
        let status_running = status_running.clone();
        let limiter = limiter.clone();
        let valve = valve.clone();
        let temperature_manager = temperature_manager.clone();
        std::thread::Builder::new()
            .name("status-log".into())
            .spawn(move || {
                let mut elapsed = std::time::Duration::ZERO;
                let interval = std::time::Duration::from_secs(30);
                let poll = std::time::Duration::from_millis(100);
                while status_running.load(std::sync::atomic::Ordering::SeqCst) {
                    std::thread::sleep(poll);
                    elapsed += poll;
                    if elapsed < interval {
                        continue;
                    }
                    elapsed = std::time::Duration::ZERO;
                    let snapshot = status::build_status(&limiter, &valve, &temperature_manager);
                    if let Ok(json) = serde_json::to_string(&snapshot) {
                        info!(status = %json, "rig status");
                    }
                }
            })
            .expect("failed to spawn status log worker")
    };

    ctrlc_wait();
    info!("shutdown signal received, stopping components");

    // Reverse-dependency order: PID loops and the valve controller stop
    // first since they call into the limiter; the limiter's own teardown
    // (stopping every PWM engine, driving every switch low) runs via
    // `Drop` once the last `Arc<CurrentLimiter>` here goes out of scope.
    hlt_pid.stop();
    bk_pid.stop();
    temperature_manager.stop();
    valve.stop();
    status_running.store(false, std::sync::atomic::Ordering::SeqCst);
    let _ = status_handle.join();

    info!("brewd stopped");
    Ok(())
}

fn ctrlc_wait() {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("failed to install ctrl+c handler");
    let _ = rx.recv();
}
