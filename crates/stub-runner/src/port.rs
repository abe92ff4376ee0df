//! Port allocation for stub servers.
//!
//! The allocator only does bookkeeping. It never binds a socket, so a port it
//! hands out can still be taken by another process before the stub server
//! binds it; the lifecycle manager treats that bind failure as retryable.

use crate::error::PortError;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const DEFAULT_MIN_PORT: u16 = 10000;
pub const DEFAULT_MAX_PORT: u16 = 15000;

/// Hands out unique ports from `[min, max]`.
///
/// One instance per fleet. Safe to share across concurrent starts.
#[derive(Debug)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    allocated: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Result<Self, PortError> {
        if min == 0 || min > max {
            return Err(PortError::InvalidRange { min, max });
        }
        Ok(Self {
            min,
            max,
            allocated: Mutex::new(HashSet::new()),
        })
    }

    pub fn min_port(&self) -> u16 {
        self.min
    }

    pub fn max_port(&self) -> u16 {
        self.max
    }

    /// Allocate a port.
    ///
    /// A preferred port is returned verbatim, inside the managed range or not;
    /// it is only refused when this allocator already handed it out.
    pub fn allocate(&self, preferred: Option<u16>) -> Result<u16, PortError> {
        match preferred {
            Some(port) => self.reserve(port),
            None => self.allocate_excluding(&HashSet::new()),
        }
    }

    /// Allocate a port from the range, skipping `excluded` as well as every
    /// port currently allocated.
    pub fn allocate_excluding(&self, excluded: &HashSet<u16>) -> Result<u16, PortError> {
        let mut allocated = self.allocated.lock();
        let span = u32::from(self.max) - u32::from(self.min) + 1;
        let offset = rand::thread_rng().gen_range(0..span);

        // Random starting point, then a sequential sweep so exhaustion is
        // detected deterministically.
        let port = (0..span)
            .map(|i| (u32::from(self.min) + (offset + i) % span) as u16)
            .find(|p| !allocated.contains(p) && !excluded.contains(p))
            .ok_or(PortError::Exhausted {
                min: self.min,
                max: self.max,
            })?;

        allocated.insert(port);
        debug!("Allocated port {}", port);
        Ok(port)
    }

    fn reserve(&self, port: u16) -> Result<u16, PortError> {
        let mut allocated = self.allocated.lock();
        if !allocated.insert(port) {
            return Err(PortError::AlreadyAllocated(port));
        }
        debug!("Reserved pinned port {}", port);
        Ok(port)
    }

    /// Return a port to the pool. Returns `false` (and logs) if it was not allocated.
    pub fn release(&self, port: u16) -> bool {
        let released = self.allocated.lock().remove(&port);
        if released {
            debug!("Released port {}", port);
        } else {
            warn!("Attempted to release port {} which is not allocated", port);
        }
        released
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        self.allocated.lock().contains(&port)
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_PORT,
            max: DEFAULT_MAX_PORT,
            allocated: Mutex::new(HashSet::new()),
        }
    }
}
