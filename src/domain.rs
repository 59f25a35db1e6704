// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-Domain State
//!
//! This module provides the small per-domain record consumed by provider
//! election and maintained through the control plane. A domain starts out
//! as its own parent, primary, and healthy; the operator demotes or heals
//! it at runtime via `put_domain_info`.

use bitflags::bitflags;

use crate::types::DomainId;

bitflags! {
    /// Per-domain status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DomainFlags: u8 {
        /// The domain is its own parent (derived, never set directly)
        const PRIMARY = 1 << 0;

        /// The domain is eligible to provide services
        const HEALTHY = 1 << 1;
    }
}

/// Control-plane view of a domain record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainParams {
    /// Parent domain id; -1 on put means "do not change"
    pub parent: DomainId,

    /// Whether the domain may provide services
    pub healthy: bool,
}

/// Per-domain scheduler record
#[derive(Debug, Clone, Copy)]
pub struct DomainInfo {
    /// Parent domain id
    pub parent: DomainId,

    /// Status flags
    pub flags: DomainFlags,
}

impl DomainInfo {
    /// Create the record for a freshly initialized domain
    ///
    /// A new domain is its own parent, hence primary, and healthy.
    pub fn new(dom: DomainId) -> Self {
        Self {
            parent: dom,
            flags: DomainFlags::PRIMARY | DomainFlags::HEALTHY,
        }
    }

    /// Whether this domain passes the election health filter
    pub fn is_healthy(&self) -> bool {
        self.flags.contains(DomainFlags::HEALTHY)
    }

    /// Apply control-plane parameters
    ///
    /// `parent == -1` leaves the parent untouched. PRIMARY is derived from
    /// the resulting parent; HEALTHY is always overwritten.
    pub fn apply(&mut self, dom: DomainId, params: &DomainParams) {
        if params.parent != -1 {
            self.parent = params.parent;
        }
        self.flags.set(DomainFlags::PRIMARY, self.parent == dom);
        self.flags.set(DomainFlags::HEALTHY, params.healthy);
    }

    /// Snapshot the control-plane view
    pub fn params(&self) -> DomainParams {
        DomainParams {
            parent: self.parent,
            healthy: self.is_healthy(),
        }
    }
}
