// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Control Plane
//!
//! This module implements the four control-plane operations: install and
//! read the global schedule, and put/get the per-domain parameters. All
//! validation runs before any installed state is touched, so a rejected
//! request leaves the instance exactly as it was.

use log::{debug, info};

use crate::domain::DomainParams;
use crate::err::{Result, SchedError};
use crate::host::HostOps;
use crate::sched::A653Scheduler;
use crate::table::SchedulePayload;
use crate::types::DomainId;
use crate::wire::{self, DomainCmd};

impl<H: HostOps> A653Scheduler<H> {
    /// Install a new global schedule
    ///
    /// The payload is shape- and feasibility-checked first; any violation
    /// rejects the request and the previously installed table stays
    /// byte-identical. On success the table is overwritten, every provider
    /// binding is refreshed, and the next major frame is snapped to the
    /// current time so the new schedule takes effect on the very next
    /// dispatch.
    pub fn install_schedule(&self, payload: &SchedulePayload) -> Result {
        payload.validate()?;

        let now = self.host().now();
        let mut core = self.core.lock();
        core.table.install(payload, now);
        let core = &mut *core;
        core.table.rebind(&core.registry);

        info!(
            "a653: installed schedule ({} entries, major frame {} ns)",
            core.table.len(),
            core.table.major_frame()
        );
        Ok(())
    }

    /// Snapshot the installed schedule
    pub fn get_schedule(&self) -> SchedulePayload {
        self.core.lock().table.snapshot()
    }

    /// Update the parameters of `dom`
    ///
    /// A parent of -1 leaves the parent unchanged; the primary flag is
    /// derived from the resulting parent and the healthy flag is always
    /// taken from the input.
    pub fn put_domain_info(&self, dom: DomainId, params: &DomainParams) -> Result {
        let mut core = self.core.lock();
        let info = core.domains.get_mut(&dom).ok_or(SchedError::NotFound)?;
        info.apply(dom, params);
        debug!(
            "a653: dom {} parent={} healthy={}",
            dom, info.parent, params.healthy
        );
        Ok(())
    }

    /// Snapshot the parameters of `dom`
    pub fn get_domain_info(&self, dom: DomainId) -> Result<DomainParams> {
        let core = self.core.lock();
        core.domains
            .get(&dom)
            .map(|info| info.params())
            .ok_or(SchedError::NotFound)
    }

    /// Install a schedule from its marshalled form
    pub fn put_schedule_raw(&self, buf: &[u8]) -> Result {
        let payload = wire::decode_schedule(buf)?;
        self.install_schedule(&payload)
    }

    /// Marshal the installed schedule into `buf`
    pub fn get_schedule_raw(&self, buf: &mut [u8]) -> Result {
        wire::encode_schedule(&self.get_schedule(), buf)
    }

    /// Handle a marshalled per-domain request
    ///
    /// A get rewrites `buf` in place with the response.
    pub fn domain_cmd_raw(&self, dom: DomainId, buf: &mut [u8]) -> Result {
        let (cmd, params) = wire::decode_domain(buf)?;
        match cmd {
            DomainCmd::PutInfo => self.put_domain_info(dom, &params),
            DomainCmd::GetInfo => wire::encode_domain(&self.get_domain_info(dom)?, buf),
        }
    }
}
