//! Per-worker runtime construction.
//!
//! The driver choice lives in [`RuntimeType::effective`]; this wrapper only
//! applies the io_uring tuning knobs and erases the driver type so the
//! worker loop can `block_on` either flavor.

use std::future::Future;

#[cfg(target_os = "linux")]
use monoio::IoUringDriver;
use monoio::{time::TimeDriver, LegacyDriver, Runtime, RuntimeBuilder};
use trellis_core::config::{RuntimeConfig, RuntimeType};

// sqpoll idle times under a second thrash the kernel thread
#[cfg(target_os = "linux")]
const MIN_SQPOLL_IDLE: u32 = 1000;

pub(crate) enum WorkerRuntime {
    #[cfg(target_os = "linux")]
    Uring(Runtime<TimeDriver<IoUringDriver>>),
    Poll(Runtime<TimeDriver<LegacyDriver>>),
}

impl WorkerRuntime {
    pub(crate) fn build(config: &RuntimeConfig) -> std::io::Result<Self> {
        match config.runtime_type.effective() {
            #[cfg(target_os = "linux")]
            RuntimeType::IoUring => {
                let mut builder = RuntimeBuilder::<IoUringDriver>::new();
                if let Some(idle) = config.sqpoll_idle {
                    let mut uring = io_uring::IoUring::builder();
                    uring.setup_sqpoll(idle.max(MIN_SQPOLL_IDLE));
                    builder = builder.uring_builder(uring);
                }
                let runtime = builder
                    .enable_timer()
                    .with_entries(config.entries)
                    .build()?;
                Ok(WorkerRuntime::Uring(runtime))
            }
            RuntimeType::Legacy => {
                let runtime = RuntimeBuilder::<LegacyDriver>::new().enable_timer().build()?;
                Ok(WorkerRuntime::Poll(runtime))
            }
        }
    }

    pub(crate) fn block_on<F>(&mut self, future: F) -> F::Output
    where
        F: Future,
    {
        match self {
            #[cfg(target_os = "linux")]
            WorkerRuntime::Uring(runtime) => runtime.block_on(future),
            WorkerRuntime::Poll(runtime) => runtime.block_on(future),
        }
    }
}
