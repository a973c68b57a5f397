use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, RwLock};
use std::time::Duration;
use std::{io, process, thread};

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use syslog::Facility;

use rolloff_roof::config::{Settings, DEFAULT_CONFIG_PATH};
use rolloff_roof::daemon::{Daemon, DaemonHost};
use rolloff_roof::modbus::ModbusTcp;
use rolloff_roof::roof::ParkState;
use rolloff_roof::sim::SimulatedRoof;
use rolloff_roof::{http, Bus, Controller, Status};

const FIVE_SECONDS: Duration = Duration::from_secs(5);
/// Polls a simulated panel needs to travel end to end.
const SIMULATED_TRAVEL: u32 = 10;

#[derive(Parser)]
#[command(version, about = "Roll-off roof controller")]
struct Args {
    /// Settings file; a changed motion timeout is saved back here
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Drive an in-memory roof instead of the Modbus controller
    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    if let Err(err) = syslog::init(Facility::LOG_DAEMON, args.log_level, Some("rolloff-roof")) {
        eprintln!("Unable to connect to syslog: {}", err);
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) if err.is_not_found() => {
            warn!("{} not found, using default settings", args.config.display());
            Settings::default()
        }
        Err(err) => exit_with(err),
    };
    if settings.motion_timeout_secs == 0 {
        warn!("Please set motion_timeout_secs for roof control");
    }
    let switches = match settings.switches.interpreter() {
        Ok(switches) => switches,
        Err(err) => exit_with(err),
    };

    let bus: Box<dyn Bus + Send> = if args.simulate {
        info!("driving a simulated roof");
        Box::new(SimulatedRoof::new(
            settings.switches.addresses,
            settings.coils,
            settings.switches.polarity,
            SIMULATED_TRAVEL,
        ))
    } else {
        match ModbusTcp::connect(&settings.bus) {
            Ok(bus) => Box::new(bus),
            Err(err) => exit_with(err),
        }
    };

    let mut controller = Controller::new(
        bus,
        DaemonHost::new(),
        switches,
        settings.coils,
        settings.polling,
        settings.motion_timeout_secs,
    );
    controller.connect(ParkState::Unknown);

    let status = Arc::new(RwLock::new(Status::new(controller.snapshot())));
    let (tx, rx) = mpsc::channel();
    let http_addr = settings.http.address.clone();
    let mut daemon = Daemon::new(controller, settings, Some(args.config));
    let mut threads = Vec::new();

    // Control thread
    // The only thread that touches the bus; everything else goes through the channel.
    {
        let term = Arc::clone(&term);
        let status = Arc::clone(&status);
        let thread = thread::spawn(move || {
            daemon.run(&rx, &term, &status);
            daemon.shutdown();
            info!("control thread exiting");
        });
        threads.push(thread);
    }

    // Start HTTP server
    let server = match http::Server::new(http_addr.as_str()) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!("Unable to start http server on {}: {}", http_addr, err);
            eprintln!("Unable to start http server on {}: {}", http_addr, err);
            term.store(true, Ordering::SeqCst);
            for thread in threads {
                let _ = thread.join();
            }
            process::exit(1);
        }
    };
    info!("http server running on {}", http_addr);

    // Handle HTTP requests
    {
        let status = Arc::clone(&status);
        let server = Arc::clone(&server);
        let thread = thread::spawn(move || {
            server.handle_requests(status, tx);
            info!("server thread exiting");
        });
        threads.push(thread);
    }

    // Wait for signals to exit
    while !term.load(Ordering::Relaxed) {
        thread::sleep(FIVE_SECONDS);
    }
    server.shutdown();

    for thread in threads {
        let _ = thread.join();
    }

    Ok(())
}

fn exit_with(err: impl std::fmt::Display) -> ! {
    error!("{}", err);
    eprintln!("{}", err);
    process::exit(1);
}
