// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ARINC 653 Partition Scheduler
//!
//! This module implements the scheduler instance: a statically tabled,
//! time-partitioned dispatcher that decides which VCPU runs on each PCPU.
//!
//! # Design
//!
//! - **Major/minor frames**: time repeats over a fixed major frame divided
//!   into statically ordered minor frames, one service each
//! - **Deterministic**: dispatch depends only on the table, the clock, and
//!   the health/awake flags; never on load
//! - **Primary/backup**: each minor frame lists providers in order; the
//!   first healthy, resolvable provider executes
//! - **No migration**: a VCPU assigned to another PCPU idles this one
//!
//! # Thread Model
//!
//! Every PCPU enters `do_schedule` concurrently; one instance-wide spinlock
//! serializes all scheduler state. The host must hold interrupts off around
//! every entry point and must never take its cpupool lock while a call into
//! this module is in flight on the same CPU. The only side effects emitted
//! outside the lock are softirq raises and the dispatcher's final
//! tasklet/migration overrides.

use alloc::collections::BTreeMap;

use log::{debug, trace, warn};
use spin::Mutex;

use crate::domain::DomainInfo;
use crate::err::Result;
use crate::host::{HostOps, HostVcpu};
use crate::registry::{Registry, VcpuRecord};
use crate::table::{ScheduleTable, DEFAULT_TIMESLICE};
use crate::types::{CpuId, DomainId, Nanos, DOM0_ID};

/// ============================================================================
/// Configuration
/// ============================================================================

/// Instance configuration
#[derive(Debug, Clone, Copy)]
pub struct SchedConfig {
    /// Append a synthetic schedule slot for each control-domain VCPU
    ///
    /// Compatibility behavior: it mutates the major frame on every dom0
    /// VCPU insertion. Operators should install a real schedule before any
    /// workload boots.
    pub dom0_auto_slot: bool,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            dom0_auto_slot: true,
        }
    }
}

/// ============================================================================
/// Dispatcher Output
/// ============================================================================

/// One dispatch decision for a PCPU
#[derive(Debug, Clone, PartialEq)]
pub struct SchedDecision<V> {
    /// The VCPU to run next
    pub task: V,

    /// Time until the next scheduling decision, strictly positive
    pub time: Nanos,

    /// Always false; this scheduler never moves VCPUs between PCPUs
    pub migrated: bool,
}

/// ============================================================================
/// Instance State
/// ============================================================================

/// Per-PCPU data owned by the instance
#[derive(Debug)]
struct PcpuData<V> {
    /// Record backing the PCPU's idle VCPU
    idle: VcpuRecord<V>,
}

/// All mutable scheduler state, guarded by the instance lock
#[derive(Debug)]
pub(crate) struct SchedCore<V> {
    /// The installed schedule plus frame accounting
    pub(crate) table: ScheduleTable<V>,

    /// Records for every linked non-idle VCPU
    pub(crate) registry: Registry<V>,

    /// Per-domain election state
    pub(crate) domains: BTreeMap<DomainId, DomainInfo>,

    /// PCPUs this instance has taken over
    pcpus: BTreeMap<CpuId, PcpuData<V>>,

    /// Index of the minor frame being dispatched
    ///
    /// A cursor into the table, reset at every major frame boundary. It is
    /// instance state, not a PCPU property.
    pub(crate) sched_index: usize,

    /// Monotonic end of the current minor frame
    pub(crate) next_switch_time: Nanos,
}

impl<V: HostVcpu> SchedCore<V> {
    fn new() -> Self {
        Self {
            table: ScheduleTable::new(),
            registry: Registry::new(),
            domains: BTreeMap::new(),
            pcpus: BTreeMap::new(),
            sched_index: 0,
            next_switch_time: 0,
        }
    }

    /// Elect the provider that executes minor frame `index`
    ///
    /// First provider in entry order whose binding resolves to a live
    /// registry record and whose domain record exists and is healthy. The
    /// PRIMARY flag is deliberately not consulted; provider order encodes
    /// primary/backup.
    fn elect(&self, index: usize) -> Option<V> {
        let entry = &self.table.entries[index];
        for provider in &entry.providers {
            let vcpu = match provider.bound.as_ref() {
                Some(v) => v,
                None => continue,
            };
            // A binding the registry no longer backs is stale; treat as
            // unresolved.
            if self
                .registry
                .find(&provider.dom_handle, provider.vcpu_id)
                .is_none()
            {
                continue;
            }
            let healthy = self
                .domains
                .get(&vcpu.domain_id())
                .map_or(false, |d| d.is_healthy());
            if healthy {
                return Some(vcpu.clone());
            }
        }
        None
    }
}

/// ============================================================================
/// Scheduler Instance
/// ============================================================================

/// An ARINC 653 scheduler instance
///
/// Owns the schedule table, the VCPU registry, and the per-domain records.
/// The host drives it through the lifecycle callbacks and `do_schedule`.
pub struct A653Scheduler<H: HostOps> {
    /// Host surface (clock, softirqs, idle VCPUs)
    host: H,

    /// Instance configuration
    config: SchedConfig,

    /// All mutable state, behind the instance schedule lock
    pub(crate) core: Mutex<SchedCore<H::Vcpu>>,
}

impl<H: HostOps> A653Scheduler<H> {
    /// Create an instance with an empty table and registry
    pub fn new(host: H, config: SchedConfig) -> Self {
        Self {
            host,
            config,
            core: Mutex::new(SchedCore::new()),
        }
    }

    /// The host surface this instance was created with
    pub fn host(&self) -> &H {
        &self.host
    }

    /// ------------------------------------------------------------------------
    /// VCPU lifecycle
    /// ------------------------------------------------------------------------

    /// Allocate the scheduler record for `vcpu`
    ///
    /// The record starts asleep and unlinked; `insert_vcpu` links it.
    pub fn alloc_vdata(&self, vcpu: H::Vcpu) -> VcpuRecord<H::Vcpu> {
        VcpuRecord::new(vcpu)
    }

    /// Release an unlinked record
    pub fn free_vdata(&self, record: VcpuRecord<H::Vcpu>) {
        drop(record);
    }

    /// Link a record into the registry
    ///
    /// Control-domain VCPUs also get a synthetic schedule slot (when the
    /// config gate is on and the table has capacity) so dom0 receives CPU
    /// time before an operator-supplied schedule exists. The slot grows the
    /// major frame by its own runtime, so feasibility is preserved.
    pub fn insert_vcpu(&self, record: VcpuRecord<H::Vcpu>) -> Result {
        let dom = record.vcpu.domain_id();
        let vcpu_id = record.vcpu.vcpu_id();

        let mut core = self.core.lock();
        core.registry.link(record)?;

        if dom == DOM0_ID && self.config.dom0_auto_slot {
            if core.table.push_dom0_slot(vcpu_id) {
                debug!(
                    "a653: auto slot for dom0 vcpu {} (major_frame now {} ns)",
                    vcpu_id,
                    core.table.major_frame()
                );
            }
        }

        let core = &mut *core;
        core.table.rebind(&core.registry);
        Ok(())
    }

    /// Unlink the record for `vcpu` and hand it back
    ///
    /// Providers that were bound to it drop to unresolved.
    pub fn remove_vcpu(&self, vcpu: &H::Vcpu) -> Result<VcpuRecord<H::Vcpu>> {
        let mut core = self.core.lock();
        let record = core
            .registry
            .unlink(vcpu)
            .ok_or(crate::err::SchedError::NotFound)?;
        let core = &mut *core;
        core.table.rebind(&core.registry);
        Ok(record)
    }

    /// ------------------------------------------------------------------------
    /// Domain lifecycle
    /// ------------------------------------------------------------------------

    /// Allocate the per-domain record
    ///
    /// A new domain is its own parent, primary, and healthy.
    pub fn init_domain(&self, dom: DomainId) -> Result {
        let mut core = self.core.lock();
        if core.domains.contains_key(&dom) {
            return Err(crate::err::SchedError::InvalidArgs);
        }
        core.domains.insert(dom, DomainInfo::new(dom));
        Ok(())
    }

    /// Release the per-domain record
    pub fn destroy_domain(&self, dom: DomainId) -> Result {
        let mut core = self.core.lock();
        core.domains
            .remove(&dom)
            .map(|_| ())
            .ok_or(crate::err::SchedError::NotFound)
    }

    /// ------------------------------------------------------------------------
    /// Sleep / wake
    /// ------------------------------------------------------------------------

    /// Mark `vcpu` asleep
    ///
    /// If it is the one currently running on its PCPU, request a re-entry
    /// of the dispatcher there so the slot falls back to idle.
    pub fn sleep(&self, vcpu: &H::Vcpu) {
        {
            let mut core = self.core.lock();
            match core.registry.get_mut(vcpu) {
                Some(record) => record.awake = false,
                None => {
                    warn!("a653: sleep for unknown vcpu {}", vcpu.vcpu_id());
                    return;
                }
            }
        }

        let cpu = vcpu.processor();
        if self.host.current_on(cpu).as_ref() == Some(vcpu) {
            self.host.raise_sched_softirq(cpu);
        }
    }

    /// Mark `vcpu` awake
    ///
    /// Always requests a re-entry of the dispatcher on the VCPU's PCPU;
    /// only the dispatcher decides whether the wakeup changes anything.
    pub fn wake(&self, vcpu: &H::Vcpu) {
        {
            let mut core = self.core.lock();
            match core.registry.get_mut(vcpu) {
                Some(record) => record.awake = true,
                None => {
                    warn!("a653: wake for unknown vcpu {}", vcpu.vcpu_id());
                    return;
                }
            }
        }

        self.host.raise_sched_softirq(vcpu.processor());
    }

    /// ------------------------------------------------------------------------
    /// CPU assignment
    /// ------------------------------------------------------------------------

    /// Pick the PCPU for `vcpu`
    ///
    /// The current assignment wins while it stays online; otherwise the
    /// first online PCPU. No rebalancing, no affinity learning.
    pub fn pick_cpu(&self, vcpu: &H::Vcpu) -> CpuId {
        let current = vcpu.processor();
        let online = self.host.online_cpus();
        if online.contains(current) {
            current
        } else {
            online.first().unwrap_or(current)
        }
    }

    /// Take over `cpu` for this instance
    ///
    /// Installs `idle_vdata` as the record backing the PCPU's idle VCPU.
    /// From this point the instance lock is the PCPU's schedule lock; no
    /// shared runqueue lock is involved.
    pub fn switch_sched(&self, cpu: CpuId, idle_vdata: VcpuRecord<H::Vcpu>) {
        let mut core = self.core.lock();
        core.pcpus.insert(cpu, PcpuData { idle: idle_vdata });
        debug!("a653: took over pcpu {}", cpu);
    }

    /// ------------------------------------------------------------------------
    /// Dispatch
    /// ------------------------------------------------------------------------

    /// Decide what runs next on `cpu`
    ///
    /// Advances the frame cursor to `now`, elects the provider of the
    /// current minor frame, validates it, and returns the task together
    /// with the strictly positive time to the next decision.
    ///
    /// # Panics
    ///
    /// Panics when frame accounting is violated (a missed major frame or a
    /// non-positive slice). A broken real-time guarantee must halt the
    /// system rather than degrade silently.
    pub fn do_schedule(
        &self,
        cpu: CpuId,
        now: Nanos,
        tasklet_pending: bool,
    ) -> SchedDecision<H::Vcpu> {
        let host_idle = self.host.idle_on(cpu);

        let mut candidate: Option<H::Vcpu> = None;
        let (idle, next_switch_time) = {
            let mut core = self.core.lock();
            let idle = match core.pcpus.get(&cpu) {
                Some(pcpu) => pcpu.idle.vcpu.clone(),
                None => host_idle,
            };

            if core.table.is_empty() {
                // Nothing installed: idle for a default slice and keep the
                // major frame ahead of the clock.
                core.table.next_major_frame = now + DEFAULT_TIMESLICE;
                core.next_switch_time = now + DEFAULT_TIMESLICE;
            } else {
                if now >= core.table.next_major_frame {
                    // Enter a new major frame.
                    let start = core.table.next_major_frame;
                    core.sched_index = 0;
                    core.table.next_major_frame = start + core.table.major_frame;
                    core.next_switch_time = start + core.table.entries[0].runtime;
                } else {
                    // Advance through expired minor frames. Running past
                    // the last entry parks the cursor in the trailing gap,
                    // which idles until the major frame boundary.
                    while now >= core.next_switch_time
                        && core.sched_index < core.table.len()
                    {
                        core.sched_index += 1;
                        if core.sched_index < core.table.len() {
                            let runtime = core.table.entries[core.sched_index].runtime;
                            core.next_switch_time += runtime;
                        } else {
                            core.next_switch_time = core.table.next_major_frame;
                        }
                    }
                }

                if core.sched_index < core.table.len() {
                    candidate = core.elect(core.sched_index);
                }
            }

            // The elected VCPU must be linked, awake, and host-runnable.
            if let Some(vcpu) = candidate.take() {
                let eligible =
                    core.registry.get(&vcpu).map_or(false, |r| r.awake) && vcpu.is_runnable();
                if eligible {
                    candidate = Some(vcpu);
                }
            }

            assert!(
                now < core.table.next_major_frame,
                "a653: missed major frame (now={}, next_major_frame={})",
                now,
                core.table.next_major_frame
            );

            (idle, core.next_switch_time)
        };

        // Overrides, applied after the lock is released: pending tasklet
        // work runs in idle context, and a VCPU assigned to another PCPU
        // never migrates here.
        let task = if tasklet_pending {
            idle
        } else {
            match candidate {
                Some(vcpu) if vcpu.processor() == cpu => vcpu,
                _ => idle,
            }
        };

        assert!(
            next_switch_time > now,
            "a653: non-positive slice (now={}, next_switch_time={})",
            now,
            next_switch_time
        );

        trace!(
            "a653: cpu {} runs vcpu {} for {} ns",
            cpu,
            task.vcpu_id(),
            next_switch_time - now
        );

        SchedDecision {
            task,
            time: next_switch_time - now,
            migrated: false,
        }
    }
}
