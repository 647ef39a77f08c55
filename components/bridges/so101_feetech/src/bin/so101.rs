//! Command line tool for SO-101 arms on a Feetech serial bus.
//!
//! ```sh
//! so101 --port /dev/ttyACM0 calibrate
//! so101 --role leader --port /dev/ttyACM1 calibrate --mode batch
//! so101 positions --units deg
//! so101 goto shoulder_pan=2048 gripper=2600
//! so101 stop
//! ```
//!
//! Calibration and the port of each arm live in one JSON document
//! (`so101.json` by default). `--port` overrides the stored port and is
//! remembered after a successful calibration.

use clap::{Parser, Subcommand, ValueEnum};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use so101_calibration::store::DEFAULT_STORE_PATH;
use so101_calibration::{ArmCalibration, CalibrationStore, MotorSpec, Role, Units, so101_motors};
use so101_feetech::registers::DEFAULT_BAUD;
use so101_feetech::{
    Arm, CalibrationMode, CalibrationSession, ConsoleOperator, ServoBus, SessionConfig,
    SharedBus, readdress,
};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Bound on every serial read.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(author, version, about = "Calibrate and drive SO-101 arms over a Feetech bus")]
struct Cli {
    /// Calibration document.
    #[arg(long, global = true, default_value = DEFAULT_STORE_PATH)]
    config: PathBuf,

    /// Which arm of the pair.
    #[arg(long, global = true, default_value = "follower")]
    role: Role,

    /// Serial device. Defaults to the one stored for the role.
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// More output; repeat for trace level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactively calibrate the arm and store the result.
    Calibrate {
        #[arg(long, default_value = "sequential")]
        mode: CalibrationMode,

        /// Only these motors (comma separated). Others keep their stored values.
        #[arg(long, value_delimiter = ',')]
        motors: Vec<String>,
    },
    /// Write the stored calibration to the motors.
    Apply,
    /// Position mode and default gains on every motor.
    Setup,
    /// Print present positions once.
    Positions {
        #[arg(long, default_value = "raw")]
        units: Units,

        /// One JSON object instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Stream present positions until Ctrl-C.
    Watch {
        #[arg(long, default_value = "raw")]
        units: Units,

        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        /// One JSON object per frame.
        #[arg(long)]
        json: bool,
    },
    /// Move motors, e.g. `goto shoulder_pan=2048 gripper=2600`.
    Goto {
        #[arg(required = true, value_parser = parse_goal)]
        goals: Vec<(String, f32)>,

        #[arg(long, default_value = "raw")]
        units: Units,
    },
    /// Enable or release torque on every motor.
    Torque { state: Switch },
    /// Hold position, then release torque.
    Stop,
    /// List the motors answering on the bus.
    Identify {
        #[arg(long, default_value_t = 10)]
        max_id: u8,
    },
    /// Change the bus address of a motor.
    SetId {
        #[arg(long)]
        from: u8,
        /// New address, 1..=252 and not in use.
        #[arg(long)]
        to: u8,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn parse_goal(s: &str) -> Result<(String, f32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=position, got '{s}'"))?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("bad position for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Debug)
        .build();
    if TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto).is_err() {
        eprintln!("logger already initialized");
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    if let Err(err) = try_main(cli) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn try_main(cli: Cli) -> CliResult<()> {
    let mut store = CalibrationStore::load(&cli.config)?;
    let port = match cli.port.clone().or_else(|| store.port(cli.role).map(str::to_string)) {
        Some(port) => port,
        None => {
            return Err(format!(
                "no serial port stored for the {} arm in {}; pass --port",
                cli.role,
                cli.config.display()
            )
            .into());
        }
    };
    let bus = SharedBus::new(so101_feetech::open(&port, cli.baud, READ_TIMEOUT)?);

    match cli.command {
        Command::Calibrate { mode, motors } => {
            let motors = select_motors(&motors)?;
            let config = SessionConfig {
                mode,
                ..SessionConfig::default()
            };
            let mut operator = ConsoleOperator::spawn()?;
            let mut session = CalibrationSession::new(bus, motors, config)
                .with_previous(store.calibration(cli.role));
            let outcome = session.run(&mut operator);
            println!();

            for (name, err) in &outcome.failed {
                eprintln!("{name}: not calibrated ({err})");
            }
            if outcome.calibrated.is_empty() {
                return Err("no motor was calibrated, nothing saved".into());
            }
            let complete = outcome.is_complete();
            print_calibration(&outcome.calibrated);
            store.commit(cli.role, outcome.calibrated)?;
            store.set_port(cli.role, port);
            store.save(&cli.config)?;
            println!("Saved to {}", cli.config.display());
            if !complete {
                return Err("calibration incomplete, rerun for the remaining motors".into());
            }
        }
        Command::Apply => {
            let calibration = require_calibration(&store, cli.role)?;
            let report = bus.exclusive(|b| so101_feetech::apply(b, &calibration));
            if !report.failed.is_empty() {
                return Err(format!("{} motor(s) not updated", report.failed.len()).into());
            }
        }
        Command::Setup => {
            let mut arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            arm.configure()?;
        }
        Command::Positions { units, json } => {
            let mut arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            let positions: BTreeMap<String, f32> = arm
                .present_positions()?
                .into_iter()
                .map(|(name, pos)| (name, units.from_logical(pos)))
                .collect();
            if json {
                println!("{}", serde_json::to_string(&positions)?);
            } else {
                for (name, value) in positions {
                    println!("{name:>14}: {value:>9.2} {units}");
                }
            }
        }
        Command::Watch {
            units,
            interval_ms,
            json,
        } => {
            let arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            watch(&arm, units, Duration::from_millis(interval_ms), json)?;
        }
        Command::Goto { goals, units } => {
            let mut arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            let goals: BTreeMap<String, u16> = goals
                .into_iter()
                .map(|(name, value)| (name, units.to_logical(value)))
                .collect();
            arm.set_goal_positions(&goals)?;
            arm.set_torque(true)?;
        }
        Command::Torque { state } => {
            let mut arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            arm.set_torque(matches!(state, Switch::On))?;
        }
        Command::Stop => {
            let mut arm = Arm::new(bus, &require_calibration(&store, cli.role)?);
            let failures = arm.stop();
            if !failures.is_empty() {
                return Err(format!("{} motor(s) did not stop cleanly", failures.len()).into());
            }
        }
        Command::Identify { max_id } => {
            let found = bus.exclusive(|b| so101_feetech::scan(b, max_id));
            if found.is_empty() {
                println!("no motor answered on {port}");
            }
            for (id, model) in found {
                println!("  id {id:>3}: model {model}");
            }
        }
        Command::SetId { from, to } => {
            bus.exclusive(|b| readdress(b, from, to))?;
            println!("motor {from} now answers as {to}");
        }
    }
    Ok(())
}

fn select_motors(names: &[String]) -> CliResult<Vec<MotorSpec>> {
    let all = so101_motors();
    if names.is_empty() {
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            all.iter()
                .find(|m| &m.name == name)
                .cloned()
                .ok_or_else(|| format!("unknown motor '{name}'").into())
        })
        .collect()
}

fn require_calibration(store: &CalibrationStore, role: Role) -> CliResult<ArmCalibration> {
    let calibration = store.calibration(role);
    if calibration.is_empty() {
        return Err(format!("the {role} arm is not calibrated, run `so101 calibrate` first").into());
    }
    Ok(calibration)
}

fn print_calibration(calibration: &ArmCalibration) {
    for (name, cal) in calibration.iter() {
        println!(
            "  {name:>14} (id {:>2}): offset={:>5}  min={:>4}  max={:>4}  width={:>4}",
            cal.id,
            cal.homing_offset,
            cal.range_min,
            cal.range_max,
            cal.width()
        );
    }
}

fn watch<B: ServoBus + Send + 'static>(
    arm: &Arm<B>,
    units: Units,
    interval: Duration,
    json: bool,
) -> CliResult<()> {
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;
    let telemetry = arm.spawn_telemetry(interval)?;
    while stop_rx.try_recv().is_err() {
        match telemetry.frames().recv_timeout(interval * 2) {
            Ok(frame) if json => {
                let converted: BTreeMap<&str, Option<f32>> = frame
                    .iter()
                    .map(|(name, pos)| (name.as_str(), pos.map(|p| units.from_logical(p))))
                    .collect();
                println!("{}", serde_json::to_string(&converted)?);
            }
            Ok(frame) => {
                let line: Vec<String> = frame
                    .iter()
                    .map(|(name, pos)| match pos {
                        Some(p) => format!("{name}={:.1}", units.from_logical(*p)),
                        None => format!("{name}=----"),
                    })
                    .collect();
                println!("{}", line.join("  "));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    telemetry.stop();
    Ok(())
}
