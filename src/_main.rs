use esp_idf_svc::{
    hal::{i2c::I2cDriver, prelude::Peripherals},
    log::EspLogger,
    sys::link_patches,
};
use log::info;
use ow248x::{
    Driver, LockPolicy, Result,
    bridge::Bridge,
    timer::{EspTimer, Timer},
    topology::Topology,
};
use std::{sync::Arc, thread::sleep, time::Duration};

const BRIDGE_ADDR: u8 = 0x18;

fn main() -> Result<()> {
    link_patches();
    EspLogger::initialize_default();
    info!("initialize");

    let peripherals = Peripherals::take()?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio2,
        peripherals.pins.gpio3,
        &esp_idf_svc::hal::i2c::config::Config::new().baudrate(400_000.into()),
    )?;

    let bridge = Bridge::detect(i2c, BRIDGE_ADDR)?;
    let mut topology = Topology::new(None);
    let (lo, hi) = topology.push_bridge(bridge.kind.channel_count());
    let mut bridge = bridge;
    bridge.lo = lo;
    bridge.hi = hi;
    info!("bridge {BRIDGE_ADDR:#04x}: {:?}, channels {lo}..={hi}", bridge.kind);

    let timer: Arc<dyn Timer + Send + Sync> = Arc::new(EspTimer::new()?);
    let mut driver = Driver::new(vec![bridge], topology, LockPolicy::PerBus, Some(timer));
    let found = driver.enumerate()?;
    info!("enumerated {found} devices");

    loop {
        driver.sense_temperatures()?;
        for i in 0..driver.thermometer_count() {
            if let Some(endpoint) = driver.endpoint(i) {
                info!("thermometer[{i}] = {:.2}C", endpoint.get());
            }
        }
        sleep(Duration::from_secs(1));
    }
}
