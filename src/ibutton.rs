//! iButton presence pipeline (C7): debounced scan over the `0x01` family.

use crate::{rom::Rom, topology::LogicalBus};

/// Default debounce window, seconds: a repeat read of the same ROM on the
/// same bus within this window is suppressed.
pub const DEFAULT_DEBOUNCE_S: u64 = 5;

/// Per-driver iButton configuration.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub debounce_s: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config { debounce_s: DEFAULT_DEBOUNCE_S }
    }
}

/// Notification bitmap: bit *k* set means "a new, debounced tag was
/// observed on logical bus *k*" since the last time it was read.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Notifications(pub u64);

impl Notifications {
    pub fn set(&mut self, bus: u8) {
        self.0 |= 1 << bus;
    }

    pub fn is_set(&self, bus: u8) -> bool {
        self.0 & (1 << bus) != 0
    }
}

/// Folds one observed ROM on `bus` at `now_s` into the bus's debounce
/// state, returning whether this is a fresh (non-suppressed) presence.
pub fn observe(bus: &mut LogicalBus, rom: Rom, now_s: u64, config: Config) -> bool {
    let fresh = match bus.last_rom {
        Some(last) if last == rom && now_s.saturating_sub(bus.last_read_s) <= config.debounce_s => false,
        _ => true,
    };
    bus.last_rom = Some(rom);
    bus.last_read_s = now_s;
    fresh
}

#[cfg(test)]
mod test {
    use super::*;

    fn rom(serial: u8) -> Rom {
        Rom([0x01, serial, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn debounces_repeated_rom_within_window() {
        let mut bus = LogicalBus::default();
        let config = Config { debounce_s: 5 };
        assert!(observe(&mut bus, rom(1), 0, config));
        assert!(!observe(&mut bus, rom(1), 3, config));
        assert!(observe(&mut bus, rom(1), 6, config));
    }

    #[test]
    fn different_rom_is_always_fresh() {
        let mut bus = LogicalBus::default();
        let config = Config::default();
        assert!(observe(&mut bus, rom(1), 0, config));
        assert!(observe(&mut bus, rom(2), 1, config));
    }

    #[test]
    fn notifications_bitmap_tracks_bus_index() {
        let mut notifications = Notifications::default();
        notifications.set(2);
        assert!(notifications.is_set(2));
        assert!(!notifications.is_set(3));
    }
}
