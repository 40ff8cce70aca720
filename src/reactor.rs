//! Background Runtime
//!
//! The bus loops need a running tokio runtime. When the gateway is embedded
//! in a host that has none, a dedicated multi-thread runtime is started the
//! first time one is asked for, and never more than once.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{const_mutex, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

/// Worker threads of the background runtime
pub const REACTOR_WORKER_THREADS: usize = 2;

static GLOBAL: Reactor = Reactor::new();

pub struct Reactor {
    runtime: Mutex<Option<Runtime>>,
    starts: AtomicUsize,
}

impl Reactor {
    pub const fn new() -> Self {
        Self {
            runtime: const_mutex(None),
            starts: AtomicUsize::new(0),
        }
    }

    /// Process-wide reactor
    pub fn global() -> &'static Reactor {
        &GLOBAL
    }

    /// Start the background runtime unless it is already running
    pub fn ensure_running(&self) -> io::Result<Handle> {
        let mut runtime = self.runtime.lock();
        if let Some(runtime) = runtime.as_ref() {
            return Ok(runtime.handle().clone());
        }

        let started = Builder::new_multi_thread()
            .worker_threads(REACTOR_WORKER_THREADS)
            .thread_name("gateway-reactor")
            .enable_all()
            .build()?;
        let handle = started.handle().clone();
        *runtime = Some(started);
        self.starts.fetch_add(1, Ordering::SeqCst);

        info!(workers = REACTOR_WORKER_THREADS, "Started background runtime");
        Ok(handle)
    }

    /// Handle to the ambient runtime, or to the background one
    pub fn handle(&self) -> io::Result<Handle> {
        match Handle::try_current() {
            Ok(handle) => Ok(handle),
            Err(_) => self.ensure_running(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// How many times the background runtime was started
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}
