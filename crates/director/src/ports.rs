//! Port allocator — hands out distinct ports from a fixed range, keeping an
//! in-memory reservation set so concurrent `run` attempts don't collide.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::DirectorError;

#[derive(Debug)]
pub struct PortAllocator {
    start_port: u16,
    end_port: u16,
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(start_port: u16, end_port: u16) -> Self {
        Self {
            start_port,
            end_port,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Ports in `[start_port, end_port)` not already in use by the engine or
    /// currently reserved by this allocator.
    pub fn available(&self, used_by_engine: &HashSet<u16>) -> HashSet<u16> {
        let reserved = self.reserved.lock().expect("port allocator mutex poisoned");
        (self.start_port..self.end_port)
            .filter(|p| !used_by_engine.contains(p) && !reserved.contains(p))
            .collect()
    }

    /// Reserve `count` distinct ports out of `available(used_by_engine)`.
    /// Fails with `ResourceExhausted` if fewer than `count` are free.
    pub fn reserve(
        &self,
        count: usize,
        used_by_engine: &HashSet<u16>,
    ) -> Result<Vec<u16>, DirectorError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.available(used_by_engine);
        if candidates.len() < count {
            return Err(DirectorError::ResourceExhausted { wanted: count });
        }

        let chosen: Vec<u16> = candidates.into_iter().take(count).collect();
        let mut reserved = self.reserved.lock().expect("port allocator mutex poisoned");
        reserved.extend(&chosen);
        Ok(chosen)
    }

    /// Release previously-reserved ports back into the available pool.
    /// Idempotent: releasing a port not currently held is a no-op.
    pub fn release(&self, ports: &[u16]) {
        let mut reserved = self.reserved.lock().expect("port allocator mutex poisoned");
        for port in ports {
            reserved.remove(port);
        }
    }
}
