// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Host Hypervisor Interface
//!
//! This module defines the trait seam between the scheduler core and the
//! host hypervisor. The host owns the VCPU objects, the monotonic clock,
//! the per-PCPU running/idle slots, and the softirq machinery; the
//! scheduler only ever holds cheap non-owning handles.

use crate::types::{CpuId, CpuMask, DomainHandle, DomainId, Nanos};

/// Non-owning handle to a host-owned VCPU
///
/// Handles must be cheap to clone and compare; two handles are equal when
/// they refer to the same host VCPU object.
pub trait HostVcpu: Clone + PartialEq {
    /// The 16-byte identity handle of the owning domain
    fn domain_handle(&self) -> DomainHandle;

    /// The host integer id of the owning domain
    fn domain_id(&self) -> DomainId;

    /// The VCPU's id within its domain
    fn vcpu_id(&self) -> i32;

    /// Whether the host currently reports this VCPU runnable
    fn is_runnable(&self) -> bool;

    /// The PCPU the host has assigned this VCPU to
    fn processor(&self) -> CpuId;
}

/// Global host surface required by the scheduler
///
/// Implementations must not call back into the scheduler from any of these
/// methods; `raise_sched_softirq` in particular is called while scheduler
/// locks may be held by other PCPUs.
pub trait HostOps {
    /// The host's VCPU handle type
    type Vcpu: HostVcpu;

    /// Monotonic time in nanoseconds
    fn now(&self) -> Nanos;

    /// Request re-entry of the dispatcher on `cpu`
    fn raise_sched_softirq(&self, cpu: CpuId);

    /// The VCPU currently running on `cpu`, if any
    fn current_on(&self, cpu: CpuId) -> Option<Self::Vcpu>;

    /// The per-PCPU idle sentinel for `cpu`
    fn idle_on(&self, cpu: CpuId) -> Self::Vcpu;

    /// Mask of online PCPUs
    fn online_cpus(&self) -> CpuMask;
}
