//! Enumeration (C5): scan all logical buses for all or a single device
//! family, dispatching a callback per discovered, CRC-verified ROM.

use crate::{
    bridge::Bridge,
    error::{Error, Result},
    onewire::OneWire,
    rom::Rom,
    topology::Topology,
};
use embedded_hal::i2c::I2c;

/// Scans every logical bus in `topology`, restricting to `family` when
/// given. `cb(rom, logical_bus)` is invoked for every CRC-valid ROM found;
/// a negative return aborts the whole scan, a non-negative return is added
/// to the running count. Returns the total count.
pub fn scan<I2C>(
    bridges: &[Bridge<I2C>],
    topology: &Topology,
    family: Option<u8>,
    mut cb: impl FnMut(Rom, u8) -> i32,
) -> Result<u32>
where
    I2C: I2c,
    Error: From<I2C::Error>,
{
    let mut count = 0u32;
    for logical in 0..topology.bus_count() {
        let Some((bridge_idx, physical)) = topology.l2p(logical) else { continue };
        let bridge = &bridges[bridge_idx];
        let mut guard = bridge.bus_select(physical)?;
        let mut link = OneWire::new(&mut guard);

        let mut next = link.first(family)?;
        while let Some(rom) = next {
            if let Some(family) = family {
                if rom.family_code() != family {
                    // target_setup only guarantees the first hit is in-family;
                    // AN187 keeps climbing into higher families afterwards.
                    break;
                }
            }
            if rom.check_crc().is_err() {
                log::warn!("bus {logical}: ROM {rom:?} failed CRC, aborting this bus");
                break;
            }
            let delta = cb(rom, logical);
            if delta < 0 {
                return Err(Error::InvalidOperation("enumeration callback aborted scan"));
            }
            count += delta as u32;
            next = link.next()?;
        }
    }
    Ok(count)
}
