//! Port-offset allocation for coexisting projects.
//!
//! Each running project holds one nonnegative offset that is added to every
//! base port it binds. Offsets are multiples of a global step and are handed
//! out lowest-first, so starting project B while A runs always produces the
//! same predictable ports.

use std::{collections::HashMap, sync::Mutex};

/// Assigns and releases per-project port offsets.
pub struct PortAllocator {
    step: u16,
    held: Mutex<HashMap<String, u16>>,
}

impl PortAllocator {
    /// Creates an allocator with the given offset step (clamped to >= 1).
    pub fn new(step: u16) -> Self {
        Self {
            step: step.max(1),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves an offset for `project` and returns it.
    ///
    /// A project that already holds an offset keeps it. `exclusive` reserves
    /// offset 0; otherwise the lowest multiple of the step not held by any
    /// other project is chosen.
    pub fn assign(&self, project: &str, exclusive: bool) -> u16 {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = held.get(project) {
            return *existing;
        }

        let offset = if exclusive {
            0
        } else {
            let mut candidate = 0u16;
            while held.values().any(|held_offset| *held_offset == candidate) {
                candidate = candidate.saturating_add(self.step);
            }
            candidate
        };

        held.insert(project.to_string(), offset);
        offset
    }

    /// Drops the reservation for `project`, if any.
    pub fn release(&self, project: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(project);
    }

    /// Returns the offset held by `project`, or 0 if unknown.
    pub fn get(&self, project: &str) -> u16 {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.get(project).copied().unwrap_or(0)
    }

    /// Recovery-only override restoring a previously recorded offset.
    pub fn set(&self, project: &str, offset: u16) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(project.to_string(), offset);
    }

    /// Applies the project's offset to `base`; a zero base stays zero.
    pub fn apply(&self, project: &str, base: u16) -> u16 {
        if base == 0 {
            return 0;
        }
        base.saturating_add(self.get(project))
    }
}
