//! Endpoint publication (C11, ambient): a minimal last-value cell a caller
//! polls or is notified through, replacing a global publish table with an
//! explicit, owned type.

use std::sync::atomic::{AtomicU32, Ordering};

/// Last converted Celsius value for one thermometer.
pub struct Endpoint(AtomicU32);

impl Endpoint {
    pub fn new(value: f32) -> Endpoint {
        Endpoint(AtomicU32::new(value.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for Endpoint {
    fn default() -> Endpoint {
        Endpoint::new(f32::NAN)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stores_and_reads_back() {
        let endpoint = Endpoint::default();
        assert!(endpoint.get().is_nan());
        endpoint.set(21.5);
        assert_eq!(endpoint.get(), 21.5);
    }
}
