//! Driver root (C11, ambient): owns the bridges, topology, buses,
//! thermometers, and endpoints, and wires C2..C9 together behind a small
//! public API. This is the crate's composition root.

use crate::{
    bridge::Bridge,
    endpoint::Endpoint,
    enumerate,
    error::{Error, Result},
    ibutton,
    onewire::OneWire,
    rom::Family,
    scratchpad::Scratchpad,
    thermometer::{self, Thermometer},
    timer::Timer,
    topology::{LogicalBus, Topology},
};
use embedded_hal::i2c::I2c;
use std::sync::{Arc, Mutex};

/// Compile-time-selectable bus-locking discipline (§5). This crate
/// implements `PerBus` fully; the other variants are carried for API parity
/// and documented as a limitation in DESIGN.md.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockPolicy {
    None,
    PerIo,
    PerBus,
}

impl Default for LockPolicy {
    fn default() -> LockPolicy {
        LockPolicy::PerBus
    }
}

/// Chooses between the 3-phase parallel scheduler and the blocking
/// single-thread fallback (§9, Open Question iii).
pub enum ConvertStrategy {
    ThreePhase,
    AllInOne,
}

struct Shared<I2C> {
    bridges: Vec<Bridge<I2C>>,
    topology: Topology,
    buses: Mutex<Vec<LogicalBus>>,
    thermometers: Mutex<Vec<Thermometer>>,
    endpoints: Vec<Endpoint>,
    notifications: Mutex<ibutton::Notifications>,
    ibutton_config: ibutton::Config,
    timer: Option<Arc<dyn Timer + Send + Sync>>,
}

pub struct Driver<I2C> {
    shared: Arc<Shared<I2C>>,
    lock_policy: LockPolicy,
}

impl<I2C> Driver<I2C>
where
    I2C: I2c + Send + 'static,
    Error: From<I2C::Error>,
{
    pub fn new(bridges: Vec<Bridge<I2C>>, topology: Topology, lock_policy: LockPolicy, timer: Option<Arc<dyn Timer + Send + Sync>>) -> Driver<I2C> {
        if lock_policy != LockPolicy::PerBus {
            log::warn!("lock policy {lock_policy:?} requested, only PerBus is implemented");
        }
        let bus_count = topology.bus_count();
        Driver {
            shared: Arc::new(Shared {
                bridges,
                topology,
                buses: Mutex::new(vec![LogicalBus::default(); bus_count as usize]),
                thermometers: Mutex::new(Vec::new()),
                endpoints: Vec::new(),
                notifications: Mutex::new(ibutton::Notifications::default()),
                ibutton_config: ibutton::Config::default(),
                timer,
            }),
            lock_policy,
        }
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    pub fn bridges(&self) -> &[Bridge<I2C>] {
        &self.shared.bridges
    }

    pub fn thermometer_count(&self) -> usize {
        self.shared.thermometers.lock().unwrap().len()
    }

    pub fn endpoint(&self, idx: usize) -> Option<&Endpoint> {
        self.shared.endpoints.get(idx)
    }

    /// Scans every logical bus and populates the thermometer array, sorted
    /// (bridge, bus, ROM) by construction since the scan itself walks
    /// buses in that order.
    pub fn enumerate(&mut self) -> Result<u32> {
        let shared = Arc::get_mut(&mut self.shared).expect("enumerate() requires exclusive access before sensing starts");
        let mut thermometers = Vec::new();
        let mut buses = vec![LogicalBus::default(); shared.topology.bus_count() as usize];
        let count = enumerate::scan(&shared.bridges, &shared.topology, None, |rom, logical| {
            match rom.family() {
                Some(Family::Ds18b20) => {
                    buses[logical as usize].ds18b20_count += 1;
                }
                Some(Family::Ds18s20) => {
                    buses[logical as usize].ds18s20_count += 1;
                }
                _ => return 0,
            }
            let (bridge_idx, channel) = shared.topology.l2p(logical).expect("scanned bus must map");
            thermometers.push(Thermometer {
                rom,
                bridge_idx,
                channel,
                endpoint_idx: thermometers.len(),
                scratchpad: Scratchpad::default(),
                cached_resolution: 9,
                parasitic: false,
            });
            1
        })?;

        // Initialize (§4.6): recall EEPROM, read the scratchpad, and read
        // the power-supply bit for every device found, so the endpoint
        // publishes a real first temperature rather than a NaN sentinel.
        let mut endpoints = Vec::with_capacity(thermometers.len());
        for thermometer in thermometers.iter_mut() {
            let bridge = &shared.bridges[thermometer.bridge_idx];
            let mut guard = bridge.bus_select(thermometer.channel)?;
            let mut link = OneWire::new(&mut guard);
            let family = thermometer.family();
            let celsius = match thermometer::initialize(&mut link, &thermometer.rom) {
                Ok((scratchpad, parasitic)) => {
                    thermometer.cached_resolution = scratchpad.resolution(family);
                    thermometer.scratchpad = scratchpad;
                    thermometer.parasitic = parasitic;
                    scratchpad.temperature_celsius(family)
                }
                Err(e) => {
                    log::warn!("thermometer init: bridge {} channel {}: {e}", thermometer.bridge_idx, thermometer.channel);
                    f32::NAN
                }
            };
            endpoints.push(Endpoint::new(celsius));
        }

        shared.endpoints = endpoints;
        *shared.thermometers.lock().unwrap() = thermometers;
        *shared.buses.lock().unwrap() = buses;
        Ok(count)
    }

    /// Triggers a full temperature-acquisition cycle, using the 3-phase
    /// scheduler if a timer was supplied at construction, else the blocking
    /// all-in-one fallback.
    pub fn sense_temperatures(&self) -> Result<()> {
        let len = self.shared.thermometers.lock().unwrap().len();
        let mut i = 0;
        while i < len {
            let bridge_idx = self.shared.thermometers.lock().unwrap()[i].bridge_idx;
            run_bus(self.shared.clone(), bridge_idx, i)?;
            let span = {
                let thermometers = self.shared.thermometers.lock().unwrap();
                thermometers.iter().skip(i).take_while(|t| t.bridge_idx == bridge_idx).count()
            };
            i += span.max(1);
        }
        Ok(())
    }

    /// Runs one iButton presence scan, debounces against prior state, and
    /// folds fresh detections into the notification bitmap.
    pub fn sense_ibuttons(&self, now_s: u64) -> Result<ibutton::Notifications> {
        let config = self.shared.ibutton_config;
        let mut buses = self.shared.buses.lock().unwrap();
        enumerate::scan(&self.shared.bridges, &self.shared.topology, Some(crate::rom::FAMILY_IBUTTON), |rom, logical| {
            if ibutton::observe(&mut buses[logical as usize], rom, now_s, config) {
                self.shared.notifications.lock().unwrap().set(logical);
            }
            1
        })?;
        Ok(*self.shared.notifications.lock().unwrap())
    }

    pub fn take_notifications(&self) -> ibutton::Notifications {
        std::mem::take(&mut self.shared.notifications.lock().unwrap())
    }

    /// Applies resolution/alarm changes to one or every thermometer,
    /// writing the scratchpad and optionally committing to EEPROM.
    pub fn config_mode(&self, idx: Option<usize>, lo: i8, hi: i8, res: u8, persist: bool) -> Result<()> {
        let mut thermometers = self.shared.thermometers.lock().unwrap();
        let range: Box<dyn Iterator<Item = usize>> = match idx {
            Some(i) => Box::new(std::iter::once(i)),
            None => Box::new(0..thermometers.len()),
        };
        for i in range {
            let thermometer = thermometers.get_mut(i).ok_or(Error::InvalidValue("thermometer index out of range"))?;
            let family = thermometer.family();
            let mut changed = thermometer::set_alarms(&mut thermometer.scratchpad, lo, hi)?;
            if family == Family::Ds18b20 {
                changed |= thermometer::set_resolution(&mut thermometer.scratchpad, family, res)?;
                thermometer.cached_resolution = thermometer.scratchpad.resolution(family);
            }
            if !changed {
                continue;
            }
            let bridge = &self.shared.bridges[thermometer.bridge_idx];
            let mut guard = bridge.bus_select(thermometer.channel)?;
            let mut link = OneWire::new(&mut guard);
            thermometer::write_sp(&mut link, &thermometer.rom, family, &thermometer.scratchpad)?;
            if persist {
                thermometer::copy_sp(&mut link, &thermometer.rom)?;
            }
        }
        Ok(())
    }
}

fn run_bus<I2C>(shared: Arc<Shared<I2C>>, bridge_idx: usize, start_idx: usize) -> Result<()>
where
    I2C: I2c + Send + 'static,
    Error: From<I2C::Error>,
{
    let channel = {
        let thermometers = shared.thermometers.lock().unwrap();
        if start_idx >= thermometers.len() {
            return Ok(());
        }
        thermometers[start_idx].channel
    };
    let (triggered, logical) = {
        let bridge = &shared.bridges[bridge_idx];
        let mut guard = bridge.bus_select(channel)?;
        let logical = guard.logical_bus();
        let mut link = OneWire::new(&mut guard);
        let triggered = link.reset_command(thermometer::CONVERT_T, None, true)?;
        (triggered, logical)
    };
    let count = {
        let thermometers = shared.thermometers.lock().unwrap();
        thermometers.iter().skip(start_idx).take_while(|t| t.bridge_idx == bridge_idx && t.channel == channel).count()
    };
    if !triggered {
        log::warn!("bridge {bridge_idx} channel {channel}: no presence, skipping convert");
        return after_bus(shared, bridge_idx, start_idx, count);
    }
    let res = {
        let thermometers = shared.thermometers.lock().unwrap();
        thermometers
            .iter()
            .skip(start_idx)
            .take(count)
            .filter(|t| t.family() == Family::Ds18b20)
            .map(Thermometer::resolution)
            .max()
            .unwrap_or(12)
    };
    let bus_is_all_ds18b20 = shared.buses.lock().unwrap()[logical as usize].ds18s20_count == 0;
    let delay = thermometer::calc_delay(None, bus_is_all_ds18b20, res);

    match shared.timer.clone() {
        Some(timer) => {
            let shared_cb = shared.clone();
            timer.start(delay, Box::new(move || {
                if let Err(e) = phase3(&shared_cb, bridge_idx, channel, start_idx, count) {
                    log::error!("thermometer read phase failed: {e}");
                }
                if let Err(e) = after_bus(shared_cb.clone(), bridge_idx, start_idx, count) {
                    log::error!("bus chaining failed: {e}");
                }
            }));
            Ok(())
        }
        None => {
            std::thread::sleep(delay);
            phase3(&shared, bridge_idx, channel, start_idx, count)?;
            after_bus(shared, bridge_idx, start_idx, count)
        }
    }
}

fn after_bus<I2C>(shared: Arc<Shared<I2C>>, bridge_idx: usize, start_idx: usize, count: usize) -> Result<()>
where
    I2C: I2c + Send + 'static,
    Error: From<I2C::Error>,
{
    let next_idx = start_idx + count.max(1);
    let continues = {
        let thermometers = shared.thermometers.lock().unwrap();
        next_idx < thermometers.len() && thermometers[next_idx].bridge_idx == bridge_idx
    };
    if continues {
        run_bus(shared, bridge_idx, next_idx)
    } else {
        Ok(())
    }
}

fn phase3<I2C>(shared: &Arc<Shared<I2C>>, bridge_idx: usize, channel: u8, start_idx: usize, count: usize) -> Result<()>
where
    I2C: I2c + Send + 'static,
    Error: From<I2C::Error>,
{
    let bridge = &shared.bridges[bridge_idx];
    let mut guard = bridge.bus_select(channel)?;
    let mut link = OneWire::new(&mut guard);
    for i in start_idx..start_idx + count {
        let rom = shared.thermometers.lock().unwrap()[i].rom;
        match thermometer::read_sp(&mut link, &rom) {
            Ok(scratchpad) => {
                let family = rom.family().unwrap_or(Family::Ds18b20);
                let celsius = scratchpad.temperature_celsius(family);
                let mut thermometers = shared.thermometers.lock().unwrap();
                thermometers[i].cached_resolution = scratchpad.resolution(family);
                thermometers[i].scratchpad = scratchpad;
                drop(thermometers);
                shared.endpoints[i].set(celsius);
            }
            Err(e) => log::warn!("thermometer {i}: read failed, endpoint keeps previous value: {e}"),
        }
    }
    Ok(())
}
