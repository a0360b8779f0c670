//! Vitals BLE
//!
//! Command line front end of the BLE health device service. It scans for the configured
//! devices, connects to them and prints every decoded measurement as one JSON line on stdout.
//! Everything else is logged.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use vitals_ble::{BleService, BleServiceApi, BleServiceEvent, ServiceConfig};

#[cfg(feature = "mock")]
use vitals_ble::components::simulated::SimulatedAdapter;
#[cfg(not(feature = "mock"))]
use vitals_ble::components::btleplug::BtleplugAdapter;

#[derive(Parser)]
#[command(name = "vitals-ble", version, about = "Collect measurements from BLE health devices")]
struct Cli {
    /// JSON configuration file (defaults to the built-in device catalog)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    duration: Option<u64>,
}

/// Simulated devices producing random readings.
#[cfg(feature = "mock")]
mod demo {
    use btleplug::api::BDAddr;
    use rand::Rng;
    use std::time::Duration;
    use vitals_ble::components::simulated::{
        encode_blood_pressure, encode_weight, SimulatedAdapter, SimulatedPeripheral,
    };
    use vitals_ble::core::constants::{
        BLOOD_PRESSURE_MEASUREMENT_UUID, BLOOD_PRESSURE_SERVICE_UUID, WEIGHT_MEASUREMENT_UUID,
        WEIGHT_SCALE_SERVICE_UUID,
    };

    fn scale() -> BDAddr {
        BDAddr::from([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01])
    }

    fn cuff() -> BDAddr {
        BDAddr::from([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x02])
    }

    pub fn adapter() -> SimulatedAdapter {
        let adapter = SimulatedAdapter::new();
        adapter.add_peripheral(SimulatedPeripheral::weight_scale(scale()));
        adapter.add_peripheral(SimulatedPeripheral::blood_pressure_monitor(cuff()));
        adapter
    }

    /// Advertises both devices and sends a reading from each every couple of seconds.
    pub async fn drive(adapter: SimulatedAdapter) {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            adapter.advertise(scale());
            adapter.advertise(cuff());

            let (weight, pressure) = {
                let mut rng = rand::thread_rng();
                let systolic = rng.gen_range(105..145);
                let diastolic = rng.gen_range(65..95);
                (
                    encode_weight(rng.gen_range(55.0..95.0), Some(1)),
                    encode_blood_pressure(
                        systolic,
                        diastolic,
                        (systolic + 2 * diastolic) / 3,
                        rng.gen_range(55..100),
                    ),
                )
            };
            adapter.notify(
                scale(),
                WEIGHT_SCALE_SERVICE_UUID,
                WEIGHT_MEASUREMENT_UUID,
                weight,
            );
            adapter.notify(
                cuff(),
                BLOOD_PRESSURE_SERVICE_UUID,
                BLOOD_PRESSURE_MEASUREMENT_UUID,
                pressure,
            );
        }
    }
}

/// Main entry point of the application.
///
/// Initializes logging, loads the configuration and runs the service on an explicit runtime.
fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        Env::default()
            .filter_or("VITALS_LOG_LEVEL", "info")
            .write_style_or("VITALS_LOG_STYLE", "always"),
    )
    .init();

    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    let rt = Runtime::new()?;
    rt.block_on(run(config, cli.duration))
}

async fn run(config: ServiceConfig, duration: Option<u64>) -> Result<()> {
    #[cfg(feature = "mock")]
    let adapter = demo::adapter();
    #[cfg(not(feature = "mock"))]
    let adapter = BtleplugAdapter::first().await?;

    let criteria = config.discovery_criteria()?;
    #[cfg(feature = "mock")]
    let service = BleService::<SimulatedAdapter>::new(adapter.clone(), config);
    #[cfg(not(feature = "mock"))]
    let service = BleService::new(adapter, config);

    let mut events = service.events();
    let mut state = service.state();
    service.start(criteria).await?;
    info!("service {}", service.current_state());

    #[cfg(feature = "mock")]
    let demo = tokio::spawn(demo::drive(adapter));

    let deadline = async {
        match duration {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => futures::future::pending().await,
        }
    };
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("service {}", *state.borrow_and_update());
            }
            event = events.recv() => match event {
                Ok(event) => report(&event)?,
                Err(RecvError::Lagged(missed)) => warn!("missed {missed} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    #[cfg(feature = "mock")]
    demo.abort();
    service.stop().await;
    Ok(())
}

/// Prints decoded measurements as JSON lines and logs everything else.
fn report(event: &BleServiceEvent) -> Result<()> {
    match event {
        BleServiceEvent::MeasurementDecoded {
            address,
            measurement,
        } => {
            let line = json!({
                "address": address.to_string(),
                "received_at": OffsetDateTime::now_utc().format(&Rfc3339)?,
                "measurement": measurement,
            });
            println!("{line}");
        }
        BleServiceEvent::ScanFailed { .. } | BleServiceEvent::Error { .. } => warn!("{event}"),
        _ => info!("{event}"),
    }
    Ok(())
}
