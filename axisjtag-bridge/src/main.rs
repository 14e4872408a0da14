//! # AXIS-to-JTAG Bridge
//!
//! XVC (Xilinx Virtual Cable) server whose backend speaks the AXIS-to-JTAG
//! transaction protocol to FPGA firmware. The front end serves one TCP
//! client at a time; the backend transport is selected with `-D`:
//!
//! - `udp` (default): real firmware over UDP, `-t <host>[:<port>]`.
//! - `loopback`: file-driven emulator, `-t <script path>`.
//! - `udpLoopback`: the same emulator behind a UDP socket on a worker
//!   thread, for self test (`-T 1` additionally drops every 256th reply to
//!   exercise the retry machinery).
//! - a path to a loadable module exporting `axisjtag_driver_register`.

mod xvc;

use std::io;
use std::process::ExitCode;
use std::thread;

use clap::{ArgAction, CommandFactory, Parser};
use env_logger::Env;

use axisjtag_driver::backends::loopback::LoopbackTransport;
use axisjtag_driver::backends::udp::UdpTransport;
use axisjtag_driver::backends::udp_loopback::UdpLoopbackServer;
use axisjtag_driver::{AxisJtagDriver, DriverConfig, DriverRegistry, JtagDriver};
use axisjtag_server::server::Builder;
use xvc::XvcHandler;

/// UDP port the firmware endpoint listens on when `-t` gives none.
const DEFAULT_TARGET_PORT: u16 = 2543;

#[derive(Parser)]
#[command(
    name = "axisjtag-bridge",
    version,
    disable_help_flag = true,
    about = "Xilinx Virtual Cable (XVC) server for AXIS-to-JTAG firmware targets",
    long_about = None
)]
struct Args {
    /// Transport-specific target: UDP address for the udp driver, script
    /// file for the loopback drivers
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Transport driver: udp, loopback, udpLoopback, or a loadable module path
    #[arg(short = 'D', long = "driver", default_value = "udp")]
    driver: String,

    /// TCP listen port
    #[arg(short = 'p', long = "port", default_value_t = 2542)]
    port: u16,

    /// Maximum XVC vector size advertised to clients, in bytes
    #[arg(short = 'M', long = "max-vector-size", default_value_t = 32768)]
    max_vector_size: usize,

    /// Increase verbosity (repeat for more)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Test mode bits (bit 0: drop every 256th reply in udpLoopback)
    #[arg(short = 'T', long = "test-mode", default_value_t = 0)]
    test_mode: u32,

    /// Serve exactly one connection, then exit
    #[arg(short = 'o', long = "once")]
    once: bool,

    /// Print usage (driver-specific usage if -D is given) and exit
    #[arg(short = 'h', long = "help", action = ArgAction::SetTrue)]
    help: bool,
}

enum SetupError {
    /// Missing/unknown driver, failed module load, failed construction.
    Fatal(String),
    /// The self-test loopback worker thread could not be launched.
    ThreadLaunch(io::Error),
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
}

fn builtin_usage(driver: &str) -> Option<&'static str> {
    match driver {
        "udp" => Some(
            "udp driver: -t <host>[:<port>] addresses the firmware's UDP endpoint (default port 2543)",
        ),
        "loopback" => Some(
            "loopback driver: -t <path> names the expectation script driving the emulated target",
        ),
        "udpLoopback" => Some(
            "udpLoopback driver: -t <path> names the expectation script; the emulator runs on a worker thread behind a UDP socket. -T 1 drops every 256th reply",
        ),
        _ => None,
    }
}

fn is_module_path(driver: &str) -> bool {
    driver.contains(std::path::MAIN_SEPARATOR) || driver.ends_with(".so")
}

/// Loads a driver module and runs its registration entry point.
fn load_module(path: &str, registry: &mut DriverRegistry) -> Result<(), String> {
    log::info!("loading transport driver module {}", path);
    // SAFETY: loading executes the module's initializers; the operator named
    // the module on the command line and thereby trusts it.
    let lib = unsafe { libloading::Library::new(path) }
        .map_err(|e| format!("loading {}: {}", path, e))?;
    unsafe {
        let register: libloading::Symbol<unsafe extern "C" fn(*mut DriverRegistry)> = lib
            .get(b"axisjtag_driver_register\0")
            .map_err(|e| format!("{}: {}", path, e))?;
        register(registry as *mut DriverRegistry);
    }
    // The module's code must stay mapped for the process lifetime.
    std::mem::forget(lib);
    Ok(())
}

fn make_driver(
    name: &str,
    config: &DriverConfig,
    registry: &mut DriverRegistry,
) -> Result<Box<dyn JtagDriver>, SetupError> {
    match name {
        "udp" => {
            let target = if config.target.contains(':') {
                config.target.clone()
            } else {
                format!("{}:{}", config.target, DEFAULT_TARGET_PORT)
            };
            let transport = UdpTransport::connect(target.as_str())
                .map_err(|e| SetupError::Fatal(e.to_string()))?;
            Ok(Box::new(AxisJtagDriver::new(
                transport,
                config.max_vector_size,
            )))
        }
        "loopback" => {
            let transport = LoopbackTransport::open(&config.target, false)
                .map_err(|e| SetupError::Fatal(e.to_string()))?;
            Ok(Box::new(AxisJtagDriver::new(
                transport,
                config.max_vector_size,
            )))
        }
        "udpLoopback" => {
            let drop_outbound = config.test_mode & 1 != 0;
            let server = UdpLoopbackServer::bind(&config.target, drop_outbound)
                .map_err(|e| SetupError::Fatal(e.to_string()))?;
            let addr = server
                .local_addr()
                .map_err(|e| SetupError::Fatal(e.to_string()))?;
            thread::Builder::new()
                .name("udp-loopback".into())
                .spawn(move || {
                    if let Err(e) = server.run() {
                        log::error!("loopback emulator terminated: {}", e);
                    }
                })
                .map_err(SetupError::ThreadLaunch)?;
            log::info!("udp loopback emulator serving on {}", addr);
            let transport =
                UdpTransport::connect(addr).map_err(|e| SetupError::Fatal(e.to_string()))?;
            Ok(Box::new(AxisJtagDriver::new(
                transport,
                config.max_vector_size,
            )))
        }
        path if is_module_path(path) => {
            load_module(path, registry).map_err(SetupError::Fatal)?;
            registry
                .create(config)
                .map_err(|e| SetupError::Fatal(e.to_string()))
        }
        other => Err(SetupError::Fatal(format!(
            "unknown transport driver {:?}",
            other
        ))),
    }
}

fn print_usage(driver: &str, registry: &mut DriverRegistry) {
    let _ = Args::command().print_help();
    println!();
    if let Some(usage) = builtin_usage(driver) {
        println!("{}", usage);
    } else if is_module_path(driver) {
        match load_module(driver, registry) {
            Ok(()) => {
                if let Some(usage) = registry.usage() {
                    println!("{}", usage);
                }
            }
            Err(message) => println!("{}", message),
        }
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayVersion => {
            print!("{}", e);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            // unknown options and malformed values are a usage error
            eprint!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(args.verbose);

    let mut registry = DriverRegistry::new();

    if args.help {
        print_usage(&args.driver, &mut registry);
        return ExitCode::SUCCESS;
    }

    let Some(target) = args.target.clone() else {
        log::error!("missing target; use -t <target> (-h for usage)");
        return ExitCode::FAILURE;
    };

    let config = DriverConfig {
        target,
        max_vector_size: args.max_vector_size,
        test_mode: args.test_mode,
    };

    let mut driver = match make_driver(&args.driver, &config, &mut registry) {
        Ok(driver) => driver,
        Err(SetupError::Fatal(message)) => {
            log::error!("{}", message);
            return ExitCode::FAILURE;
        }
        Err(SetupError::ThreadLaunch(e)) => {
            log::error!("failed to launch the loopback worker thread: {}", e);
            return ExitCode::from(2);
        }
    };

    let negotiated = match driver.query() {
        Ok(negotiated) => negotiated,
        Err(e) => {
            log::error!("initial capability query failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.verbose > 0 {
        driver.dump_info();
    }

    let handler = XvcHandler::new(args.max_vector_size.min(negotiated));
    let mut server = Builder::new().run_once(args.once).build(handler, driver);
    if let Err(e) = server.listen(("0.0.0.0", args.port)) {
        log::error!("server failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
