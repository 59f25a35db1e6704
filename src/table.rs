// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Static Schedule Table
//!
//! This module provides the fixed-capacity schedule table: an ordered list
//! of minor frames, each naming the providers that may execute its service.
//! The whole table footprint is known at compile time and nothing on the
//! dispatch path allocates.
//!
//! # Design
//!
//! - **Bounded**: at most `MAX_SCHED_ENTRIES` minor frames with at most
//!   `MAX_PROVIDERS` providers each, stored inline
//! - **Feasible**: the runtimes of all entries never exceed the major frame
//! - **Bound cache**: each provider caches its registry lookup; the cache
//!   is refreshed after every registry change and every install

use arrayvec::ArrayVec;

use crate::err::{Result, SchedError};
use crate::host::HostVcpu;
use crate::registry::Registry;
use crate::types::{DomainHandle, Nanos};

/// Maximum number of minor frames in a schedule
pub const MAX_SCHED_ENTRIES: usize = 64;

/// Maximum number of providers per minor frame
pub const MAX_PROVIDERS: usize = 8;

/// Default time slice (in nanoseconds)
pub const DEFAULT_TIMESLICE: Nanos = 10_000_000; // 10ms

/// Provider key as supplied by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSpec {
    /// Identity handle of the providing domain
    pub dom_handle: DomainHandle,

    /// VCPU id within that domain
    pub vcpu_id: i32,
}

/// One minor frame as supplied by the control plane
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    /// Service executed during this minor frame
    pub service_id: i32,

    /// Length of the minor frame in nanoseconds
    pub runtime: Nanos,

    /// Candidate providers in primary-first order
    pub providers: ArrayVec<ProviderSpec, MAX_PROVIDERS>,
}

/// A full schedule as carried by the control plane
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulePayload {
    /// Major frame length in nanoseconds
    pub major_frame: Nanos,

    /// Minor frames in dispatch order
    pub entries: ArrayVec<EntrySpec, MAX_SCHED_ENTRIES>,
}

impl SchedulePayload {
    /// Check shape and feasibility
    ///
    /// Must pass before any installed state is touched: a rejected payload
    /// leaves the current table byte-identical.
    pub fn validate(&self) -> Result {
        if self.major_frame == 0 || self.entries.is_empty() {
            return Err(SchedError::InvalidArgs);
        }

        let mut total: Nanos = 0;
        for entry in &self.entries {
            if entry.runtime == 0 || entry.providers.is_empty() {
                return Err(SchedError::InvalidArgs);
            }
            total = total
                .checked_add(entry.runtime)
                .ok_or(SchedError::InvalidArgs)?;
        }

        if total > self.major_frame {
            return Err(SchedError::InvalidArgs);
        }
        Ok(())
    }
}

/// A candidate executor for one minor frame
#[derive(Debug, Clone)]
pub struct Provider<V> {
    /// Identity handle of the providing domain
    pub dom_handle: DomainHandle,

    /// VCPU id within that domain
    pub vcpu_id: i32,

    /// Cached registry resolution of `(dom_handle, vcpu_id)`
    ///
    /// Only valid under the instance lock; refreshed by `rebind`.
    pub(crate) bound: Option<V>,
}

impl<V: HostVcpu> Provider<V> {
    fn from_spec(spec: &ProviderSpec) -> Self {
        Self {
            dom_handle: spec.dom_handle,
            vcpu_id: spec.vcpu_id,
            bound: None,
        }
    }

    /// The cached VCPU binding, if the key currently resolves
    pub fn bound(&self) -> Option<&V> {
        self.bound.as_ref()
    }
}

/// One minor frame of the installed schedule
#[derive(Debug, Clone)]
pub struct ScheduleEntry<V> {
    /// Service executed during this minor frame
    pub service_id: i32,

    /// Length of the minor frame in nanoseconds
    pub runtime: Nanos,

    /// Candidate providers in primary-first order
    pub providers: ArrayVec<Provider<V>, MAX_PROVIDERS>,
}

impl<V: HostVcpu> ScheduleEntry<V> {
    fn from_spec(spec: &EntrySpec) -> Self {
        let mut providers = ArrayVec::new();
        for p in &spec.providers {
            providers.push(Provider::from_spec(p));
        }
        Self {
            service_id: spec.service_id,
            runtime: spec.runtime,
            providers,
        }
    }
}

/// The installed schedule table plus frame accounting
#[derive(Debug)]
pub struct ScheduleTable<V> {
    /// Minor frames in dispatch order
    pub(crate) entries: ArrayVec<ScheduleEntry<V>, MAX_SCHED_ENTRIES>,

    /// Major frame length in nanoseconds
    pub(crate) major_frame: Nanos,

    /// Monotonic start time of the next major frame
    pub(crate) next_major_frame: Nanos,
}

impl<V: HostVcpu> ScheduleTable<V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
            major_frame: 0,
            next_major_frame: 0,
        }
    }

    /// Number of minor frames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no schedule is installed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Major frame length
    pub fn major_frame(&self) -> Nanos {
        self.major_frame
    }

    /// Sum of all minor frame runtimes
    pub fn runtime_sum(&self) -> Nanos {
        self.entries.iter().map(|e| e.runtime).sum()
    }

    /// Installed minor frames in dispatch order
    pub fn entries(&self) -> &[ScheduleEntry<V>] {
        &self.entries
    }

    /// Replace the table with a validated payload
    ///
    /// Snapping `next_major_frame` to `now` makes the very next dispatch
    /// start the new schedule's first major frame.
    pub fn install(&mut self, payload: &SchedulePayload, now: Nanos) {
        self.entries.clear();
        for spec in &payload.entries {
            self.entries.push(ScheduleEntry::from_spec(spec));
        }
        self.major_frame = payload.major_frame;
        self.next_major_frame = now;
    }

    /// Snapshot the table into a control-plane payload
    pub fn snapshot(&self) -> SchedulePayload {
        let mut entries = ArrayVec::new();
        for entry in &self.entries {
            let mut providers = ArrayVec::new();
            for p in &entry.providers {
                providers.push(ProviderSpec {
                    dom_handle: p.dom_handle,
                    vcpu_id: p.vcpu_id,
                });
            }
            entries.push(EntrySpec {
                service_id: entry.service_id,
                runtime: entry.runtime,
                providers,
            });
        }
        SchedulePayload {
            major_frame: self.major_frame,
            entries,
        }
    }

    /// Refresh every provider's cached binding from the registry
    ///
    /// Must run after every registry membership change and every install;
    /// keys that no longer resolve drop to `None`.
    pub fn rebind(&mut self, registry: &Registry<V>) {
        for entry in &mut self.entries {
            for provider in &mut entry.providers {
                provider.bound = registry
                    .find(&provider.dom_handle, provider.vcpu_id)
                    .map(|r| r.vcpu.clone());
            }
        }
    }

    /// Append the synthetic control-domain slot for `vcpu_id`
    ///
    /// Grows `major_frame` and the runtime sum by the same amount, so
    /// feasibility holds by construction. Returns false when the table is
    /// already at capacity.
    pub fn push_dom0_slot(&mut self, vcpu_id: i32) -> bool {
        if self.entries.is_full() {
            return false;
        }
        let mut providers = ArrayVec::new();
        providers.push(Provider {
            dom_handle: DomainHandle::ZERO,
            vcpu_id,
            bound: None,
        });
        self.entries.push(ScheduleEntry {
            service_id: 0,
            runtime: DEFAULT_TIMESLICE,
            providers,
        });
        self.major_frame += DEFAULT_TIMESLICE;
        true
    }
}

impl<V: HostVcpu> Default for ScheduleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(tag: u8) -> DomainHandle {
        let mut bytes = [0u8; 16];
        bytes[0] = tag;
        DomainHandle::from_bytes(bytes)
    }

    fn payload(major_frame: Nanos, runtimes: &[Nanos]) -> SchedulePayload {
        let mut entries = ArrayVec::new();
        for (i, &rt) in runtimes.iter().enumerate() {
            let mut providers = ArrayVec::new();
            providers.push(ProviderSpec {
                dom_handle: handle(i as u8 + 1),
                vcpu_id: 0,
            });
            entries.push(EntrySpec {
                service_id: i as i32,
                runtime: rt,
                providers,
            });
        }
        SchedulePayload {
            major_frame,
            entries,
        }
    }

    #[test]
    fn test_validate_feasible() {
        assert!(payload(30_000_000, &[10_000_000; 3]).validate().is_ok());
        // Slack after the last entry is allowed.
        assert!(payload(50_000_000, &[10_000_000; 3]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_infeasible() {
        let p = payload(10_000_000, &[20_000_000]);
        assert_eq!(p.validate(), Err(SchedError::InvalidArgs));
    }

    #[test]
    fn test_validate_rejects_shape() {
        assert!(payload(10_000_000, &[]).validate().is_err());
        assert!(payload(0, &[1]).validate().is_err());
        assert!(payload(10_000_000, &[0]).validate().is_err());

        let mut p = payload(10_000_000, &[1_000_000]);
        p.entries[0].providers.clear();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_runtime_overflow() {
        let p = payload(u64::MAX, &[u64::MAX, u64::MAX]);
        assert_eq!(p.validate(), Err(SchedError::InvalidArgs));
    }

    #[test]
    fn test_dom0_slot_growth() {
        // The dom0 slot grows the frame and the sum in lockstep.
        let mut table: ScheduleTable<crate::tests::MockVcpu> = ScheduleTable::new();
        for i in 0..3 {
            assert!(table.push_dom0_slot(i));
        }
        assert_eq!(table.len(), 3);
        assert_eq!(table.major_frame(), 3 * DEFAULT_TIMESLICE);
        assert_eq!(table.runtime_sum(), table.major_frame());
        assert!(table.runtime_sum() <= table.major_frame());
    }

    #[test]
    fn test_dom0_slot_capacity() {
        let mut table: ScheduleTable<crate::tests::MockVcpu> = ScheduleTable::new();
        for i in 0..MAX_SCHED_ENTRIES {
            assert!(table.push_dom0_slot(i as i32));
        }
        assert!(!table.push_dom0_slot(99));
        assert_eq!(table.len(), MAX_SCHED_ENTRIES);
    }
}
