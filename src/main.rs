mod config;

use config::AppConfig;
use rtbridge_engine::hw::simulated::SimulatedLoader;
use rtbridge_engine::hw::DriverSession;
use rtbridge_engine::sink::LoopbackSink;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const LOG_ENV: &str = "RTBRIDGE_LOG";

fn init_logging(config: &AppConfig) {
    let requested = std::env::var(LOG_ENV).unwrap_or_else(|_| config.log_level.clone());
    let level = Level::from_str(requested.trim()).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_names(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging already initialized: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    init_logging(&config);

    let mut session = DriverSession::acquire(SimulatedLoader::with_default_devices())?;
    let drivers = session.available_drivers(32);
    for name in &drivers {
        info!("Available driver: {name}");
    }
    let Some(name) = config.driver.clone().or_else(|| drivers.first().cloned()) else {
        warn!("No drivers installed");
        return Ok(());
    };

    let result = run(&mut session, &name, &config).await;
    let report = session.shutdown();
    for (step, e) in report.failures() {
        error!("{step}: {e}");
    }
    result
}

async fn run(
    session: &mut DriverSession,
    name: &str,
    config: &AppConfig,
) -> Result<(), Box<dyn Error>> {
    session.load(name)?;
    session.initialize()?;
    let block_length = match session.capabilities() {
        Some(caps) => {
            info!("{caps}");
            debug!("{}", caps.to_json()?);
            config.block_length.unwrap_or(caps.buffer_size.preferred)
        }
        None => return Err("driver reported no capabilities".into()),
    };

    session.bind_sink(Box::new(LoopbackSink::new()))?;
    session.create_buffers(&config.inputs, &config.outputs, block_length)?;
    session.start()?;
    info!(
        "Running {name} for {}s, ctrl-c to stop early",
        config.run_seconds
    );

    let deadline = tokio::time::sleep(Duration::from_secs(config.run_seconds));
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                session.drain_events();
                if let Some(rate) = session.pending_sample_rate() {
                    warn!("Driver changed sample rate to {rate} Hz; stopping");
                    break;
                }
            }
        }
    }

    session.stop()?;
    session.drain_events();
    info!("Processed {} blocks", session.blocks_processed());
    Ok(())
}
