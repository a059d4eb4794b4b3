//! One-shot per-bridge timers driving the thermometer pipeline's phase-2
//! wait (§5). Two implementations: a portable `std::thread` one used by
//! tests and the all-in-one fallback, and an ESP-IDF one backed by
//! `esp_idf_svc::timer::EspTimerService`.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// Abstracts "run this closure once, after a delay, on some other context".
/// The thermometer pipeline calls this once per bridge per convert cycle;
/// the callback captures the triggering array index as a plain `usize`.
pub trait Timer {
    fn start(&self, delay: Duration, callback: Box<dyn FnOnce() + Send + 'static>);
}

/// `std::thread`-backed timer: spawns a detached thread that sleeps then
/// runs the callback. Used in tests and whenever no RTOS timer service is
/// available.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn start(&self, delay: Duration, callback: Box<dyn FnOnce() + Send + 'static>) {
        thread::spawn(move || {
            thread::sleep(delay);
            callback();
        });
    }
}

/// ESP-IDF-backed timer using the platform's high-resolution timer service,
/// matching the teacher's `esp_idf_svc::timer` usage elsewhere in this
/// dependency stack.
pub struct EspTimer {
    service: esp_idf_svc::timer::EspTimerService<esp_idf_svc::timer::Task>,
}

impl EspTimer {
    pub fn new() -> Result<EspTimer, esp_idf_svc::sys::EspError> {
        Ok(EspTimer { service: esp_idf_svc::timer::EspTimerService::new()? })
    }
}

impl Timer for EspTimer {
    fn start(&self, delay: Duration, callback: Box<dyn FnOnce() + Send + 'static>) {
        let callback = Arc::new(Mutex::new(Some(callback)));
        let timer = self.service.timer(move || {
            if let Some(callback) = callback.lock().unwrap().take() {
                callback();
            }
        });
        match timer {
            Ok(timer) => {
                if let Err(e) = timer.after(delay) {
                    log::error!("failed to arm one-shot timer: {e}");
                } else {
                    // The timer must outlive this call; leaking it is the
                    // one-shot contract (it self-disarms after firing).
                    std::mem::forget(timer);
                }
            }
            Err(e) => log::error!("failed to create one-shot timer: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn thread_timer_fires_once() {
        let (tx, rx) = mpsc::channel();
        let timer = ThreadTimer;
        timer.start(Duration::from_millis(5), Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(1)).expect("timer should fire");
    }
}
