//! Runtime-modifiable tunables (§6), represented as plain atomics with
//! typed getter/setter wrappers — the "sysctl-like, globally readable,
//! runtime-writable" knob model, without an actual sysctl or config-file
//! loader (that loader is the out-of-scope "configuration surface").

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

macro_rules! atomic_usize_tunable {
    ($field:ident, $getter:ident, $setter:ident) => {
        pub fn $getter(&self) -> usize {
            self.$field.load(Ordering::Relaxed)
        }
        pub fn $setter(&self, value: usize) {
            self.$field.store(value, Ordering::Relaxed);
        }
    };
}

macro_rules! atomic_bool_tunable {
    ($field:ident, $getter:ident, $setter:ident) => {
        pub fn $getter(&self) -> bool {
            self.$field.load(Ordering::Relaxed)
        }
        pub fn $setter(&self, value: bool) {
            self.$field.store(value, Ordering::Relaxed);
        }
    };
}

pub struct Tunables {
    enable_prezero: AtomicBool,
    enable_compact: AtomicBool,
    enable_sleep: AtomicBool,
    verbose: AtomicBool,
    wakeup_frequency: AtomicUsize,
    wakeup_time: AtomicUsize,
    pop_budget: AtomicUsize,
    pop_threshold: AtomicUsize,
    sync_popthreshold: AtomicUsize,
    zero_budget: AtomicUsize,
    inactive_thre: AtomicUsize,
    migrate_budget: AtomicUsize,
}

impl Default for Tunables {
    fn default() -> Tunables {
        Tunables {
            enable_prezero: AtomicBool::new(false),
            enable_compact: AtomicBool::new(false),
            enable_sleep: AtomicBool::new(true),
            verbose: AtomicBool::new(false),
            wakeup_frequency: AtomicUsize::new(1),
            wakeup_time: AtomicUsize::new(1),
            pop_budget: AtomicUsize::new(2),
            pop_threshold: AtomicUsize::new(63),
            sync_popthreshold: AtomicUsize::new(31),
            zero_budget: AtomicUsize::new(512),
            inactive_thre: AtomicUsize::new(10_000),
            migrate_budget: AtomicUsize::new(2560),
        }
    }
}

impl Tunables {
    atomic_bool_tunable!(enable_prezero, enable_prezero, set_enable_prezero);
    atomic_bool_tunable!(enable_compact, enable_compact, set_enable_compact);
    atomic_bool_tunable!(enable_sleep, enable_sleep, set_enable_sleep);
    atomic_bool_tunable!(verbose, verbose, set_verbose);

    atomic_usize_tunable!(wakeup_frequency, wakeup_frequency, set_wakeup_frequency);
    atomic_usize_tunable!(wakeup_time, wakeup_time, set_wakeup_time);
    atomic_usize_tunable!(pop_budget, pop_budget, set_pop_budget);
    atomic_usize_tunable!(pop_threshold, pop_threshold, set_pop_threshold);
    atomic_usize_tunable!(sync_popthreshold, sync_popthreshold, set_sync_popthreshold);
    atomic_usize_tunable!(zero_budget, zero_budget, set_zero_budget);
    atomic_usize_tunable!(inactive_thre, inactive_thre, set_inactive_thre);
    atomic_usize_tunable!(migrate_budget, migrate_budget, set_migrate_budget);

    /// `wakeup_frequency * tick_hz / wakeup_time`, the daemon's per-cycle
    /// sleep duration in ticks (§4.6 step 3).
    pub fn sleep_ticks(&self, tick_hz: usize) -> usize {
        let time = self.wakeup_time().max(1);
        self.wakeup_frequency().saturating_mul(tick_hz) / time
    }
}
