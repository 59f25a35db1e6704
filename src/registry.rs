// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! VCPU Registry
//!
//! This module owns the scheduler-side records for every non-idle VCPU the
//! instance knows about. A record is allocated unlinked, linked into the
//! registry on insertion, and unlinked again on removal; the record is the
//! authoritative home of the *awake* flag.

use alloc::vec::Vec;

use crate::err::{Result, SchedError};
use crate::host::HostVcpu;
use crate::types::DomainHandle;

/// Scheduler-owned record for one VCPU
#[derive(Debug, Clone, PartialEq)]
pub struct VcpuRecord<V> {
    /// Handle to the host VCPU this record shadows
    pub vcpu: V,

    /// Whether the VCPU is awake (set by wake, cleared by sleep)
    pub awake: bool,
}

impl<V: HostVcpu> VcpuRecord<V> {
    /// Create an unlinked record; VCPUs start asleep
    pub fn new(vcpu: V) -> Self {
        Self { vcpu, awake: false }
    }

    /// Whether this record matches a provider key
    pub fn matches(&self, handle: &DomainHandle, vcpu_id: i32) -> bool {
        self.vcpu.domain_handle() == *handle && self.vcpu.vcpu_id() == vcpu_id
    }
}

/// Ordered sequence of linked VCPU records
///
/// All access happens under the instance lock.
#[derive(Debug, Default)]
pub struct Registry<V> {
    records: Vec<VcpuRecord<V>>,
}

impl<V: HostVcpu> Registry<V> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Link a record into the registry
    ///
    /// Rejects a second record with the same `(domain, vcpu_id)` identity.
    pub fn link(&mut self, record: VcpuRecord<V>) -> Result {
        let handle = record.vcpu.domain_handle();
        let id = record.vcpu.vcpu_id();
        if self.find(&handle, id).is_some() {
            return Err(SchedError::InvalidArgs);
        }
        self.records.push(record);
        Ok(())
    }

    /// Unlink the record for `vcpu`, returning it to the caller
    pub fn unlink(&mut self, vcpu: &V) -> Option<VcpuRecord<V>> {
        let pos = self.records.iter().position(|r| r.vcpu == *vcpu)?;
        Some(self.records.remove(pos))
    }

    /// Look up a linked record by provider key
    pub fn find(&self, handle: &DomainHandle, vcpu_id: i32) -> Option<&VcpuRecord<V>> {
        self.records.iter().find(|r| r.matches(handle, vcpu_id))
    }

    /// Look up a linked record by host handle identity
    pub fn get(&self, vcpu: &V) -> Option<&VcpuRecord<V>> {
        self.records.iter().find(|r| r.vcpu == *vcpu)
    }

    /// Mutable lookup by host handle identity
    pub fn get_mut(&mut self, vcpu: &V) -> Option<&mut VcpuRecord<V>> {
        self.records.iter_mut().find(|r| r.vcpu == *vcpu)
    }

    /// Number of linked records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
