use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use power_arbiter::{PwmEngine, Switch, SwitchError};

struct CountingSwitch {
    on_count: AtomicU32,
    off_count: AtomicU32,
}

impl Switch for CountingSwitch {
    fn set_state(&self, state: bool) -> Result<(), SwitchError> {
        if state {
            self.on_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.off_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn zero_duty_never_drives_high() {
    let switch = Arc::new(CountingSwitch {
        on_count: AtomicU32::new(0),
        off_count: AtomicU32::new(0),
    });
    let engine = PwmEngine::new(switch.clone(), 200.0, "test".into());
    engine.set_load_cycle(0.0);
    engine.unpause();
    thread::sleep(Duration::from_millis(50));
    engine.stop();
    engine.join();
    assert_eq!(switch.on_count.load(Ordering::SeqCst), 0);
}

#[test]
fn full_duty_never_drives_low_while_running() {
    let switch = Arc::new(CountingSwitch {
        on_count: AtomicU32::new(0),
        off_count: AtomicU32::new(0),
    });
    let engine = PwmEngine::new(switch.clone(), 200.0, "test".into());
    engine.set_load_cycle(1.0);
    engine.unpause();
    thread::sleep(Duration::from_millis(50));
    let off_before_stop = switch.off_count.load(Ordering::SeqCst);
    engine.stop();
    engine.join();
    // One final drive-low is permitted on exit, but none while running.
    assert_eq!(off_before_stop, 0);
    assert!(switch.off_count.load(Ordering::SeqCst) <= 1);
}

#[test]
fn join_after_stop_is_a_noop() {
    let switch = Arc::new(CountingSwitch {
        on_count: AtomicU32::new(0),
        off_count: AtomicU32::new(0),
    });
    let engine = PwmEngine::new(switch, 500.0, "test".into());
    engine.stop();
    let start = Instant::now();
    engine.join();
    engine.join();
    assert!(start.elapsed() < Duration::from_secs(1));
}
