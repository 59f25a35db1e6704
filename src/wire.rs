// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Control Message Codec
//!
//! This module encodes and decodes the marshalled form of the two control
//! request pairs: the global schedule message and the per-domain parameter
//! message. The layout is packed little-endian with fixed-capacity arrays,
//! so `MAX_SCHED_ENTRIES` and `MAX_PROVIDERS` are part of the ABI.
//!
//! All shape checks run against the raw buffer before any payload is
//! built; a short buffer surfaces a copy fault and leaves no state behind.

use arrayvec::ArrayVec;

use crate::domain::DomainParams;
use crate::err::{Result, SchedError};
use crate::table::{EntrySpec, ProviderSpec, SchedulePayload, MAX_PROVIDERS, MAX_SCHED_ENTRIES};
use crate::types::{DomainHandle, Nanos};

/// Wire size of one provider slot
pub const PROVIDER_WIRE_LEN: usize = 16 + 4;

/// Wire size of one schedule entry slot
pub const ENTRY_WIRE_LEN: usize = 4 + 8 + 4 + MAX_PROVIDERS * PROVIDER_WIRE_LEN;

/// Wire size of the global schedule message
pub const SCHED_WIRE_LEN: usize = 8 + 4 + MAX_SCHED_ENTRIES * ENTRY_WIRE_LEN;

/// Wire size of the per-domain message
pub const DOMAIN_WIRE_LEN: usize = 4 + 4 + 1 + 3;

/// Per-domain message commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainCmd {
    /// Update the domain's parameters
    PutInfo = 0,

    /// Read the domain's parameters
    GetInfo = 1,
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_i32(buf: &[u8], off: usize) -> i32 {
    read_u32(buf, off) as i32
}

fn read_i64(buf: &[u8], off: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    i64::from_le_bytes(bytes)
}

/// Read a wire time field; negative times are invalid
fn read_nanos(buf: &[u8], off: usize) -> Result<Nanos> {
    let raw = read_i64(buf, off);
    if raw < 0 {
        return Err(SchedError::InvalidArgs);
    }
    Ok(raw as Nanos)
}

fn write_nanos(buf: &mut [u8], off: usize, value: Nanos) -> Result {
    let raw = i64::try_from(value).map_err(|_| SchedError::InvalidArgs)?;
    buf[off..off + 8].copy_from_slice(&raw.to_le_bytes());
    Ok(())
}

/// Decode a global schedule message
pub fn decode_schedule(buf: &[u8]) -> Result<SchedulePayload> {
    if buf.len() < SCHED_WIRE_LEN {
        return Err(SchedError::CopyFault);
    }

    let major_frame = read_nanos(buf, 0)?;
    let num_entries = read_u32(buf, 8) as usize;
    if num_entries > MAX_SCHED_ENTRIES {
        return Err(SchedError::InvalidArgs);
    }

    let mut entries = ArrayVec::new();
    for i in 0..num_entries {
        let base = 12 + i * ENTRY_WIRE_LEN;
        let service_id = read_i32(buf, base);
        let runtime = read_nanos(buf, base + 4)?;
        let num_providers = read_u32(buf, base + 12) as usize;
        if num_providers > MAX_PROVIDERS {
            return Err(SchedError::InvalidArgs);
        }

        let mut providers = ArrayVec::new();
        for j in 0..num_providers {
            let poff = base + 16 + j * PROVIDER_WIRE_LEN;
            let mut handle = [0u8; 16];
            handle.copy_from_slice(&buf[poff..poff + 16]);
            providers.push(ProviderSpec {
                dom_handle: DomainHandle::from_bytes(handle),
                vcpu_id: read_i32(buf, poff + 16),
            });
        }

        entries.push(EntrySpec {
            service_id,
            runtime,
            providers,
        });
    }

    Ok(SchedulePayload {
        major_frame,
        entries,
    })
}

/// Encode a global schedule message
///
/// The buffer is filled with 0xFF before population, so readers can only
/// trust slots covered by `num_entries`.
pub fn encode_schedule(payload: &SchedulePayload, buf: &mut [u8]) -> Result {
    if buf.len() < SCHED_WIRE_LEN {
        return Err(SchedError::CopyFault);
    }

    for byte in buf[..SCHED_WIRE_LEN].iter_mut() {
        *byte = 0xFF;
    }

    write_nanos(buf, 0, payload.major_frame)?;
    buf[8..12].copy_from_slice(&(payload.entries.len() as u32).to_le_bytes());

    for (i, entry) in payload.entries.iter().enumerate() {
        let base = 12 + i * ENTRY_WIRE_LEN;
        buf[base..base + 4].copy_from_slice(&entry.service_id.to_le_bytes());
        write_nanos(buf, base + 4, entry.runtime)?;
        buf[base + 12..base + 16]
            .copy_from_slice(&(entry.providers.len() as u32).to_le_bytes());

        for (j, provider) in entry.providers.iter().enumerate() {
            let poff = base + 16 + j * PROVIDER_WIRE_LEN;
            buf[poff..poff + 16].copy_from_slice(provider.dom_handle.as_bytes());
            buf[poff + 16..poff + 20].copy_from_slice(&provider.vcpu_id.to_le_bytes());
        }
    }

    Ok(())
}

/// Decode a per-domain message
pub fn decode_domain(buf: &[u8]) -> Result<(DomainCmd, DomainParams)> {
    if buf.len() < DOMAIN_WIRE_LEN {
        return Err(SchedError::CopyFault);
    }

    let cmd = match read_u32(buf, 0) {
        0 => DomainCmd::PutInfo,
        1 => DomainCmd::GetInfo,
        _ => return Err(SchedError::InvalidArgs),
    };

    let params = DomainParams {
        parent: read_i32(buf, 4),
        healthy: buf[8] != 0,
    };
    Ok((cmd, params))
}

/// Encode a per-domain get response
pub fn encode_domain(params: &DomainParams, buf: &mut [u8]) -> Result {
    if buf.len() < DOMAIN_WIRE_LEN {
        return Err(SchedError::CopyFault);
    }

    buf[0..4].copy_from_slice(&(DomainCmd::GetInfo as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&params.parent.to_le_bytes());
    buf[8] = params.healthy as u8;
    buf[9..12].fill(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> SchedulePayload {
        let mut entries = ArrayVec::new();
        for i in 0..3u8 {
            let mut providers = ArrayVec::new();
            let mut handle = [0u8; 16];
            handle[0] = i + 1;
            providers.push(ProviderSpec {
                dom_handle: DomainHandle::from_bytes(handle),
                vcpu_id: i as i32,
            });
            entries.push(EntrySpec {
                service_id: i as i32,
                runtime: 10_000_000,
                providers,
            });
        }
        SchedulePayload {
            major_frame: 30_000_000,
            entries,
        }
    }

    #[test]
    fn test_schedule_round_trip() {
        let payload = sample_payload();
        let mut buf = [0u8; SCHED_WIRE_LEN];
        encode_schedule(&payload, &mut buf).unwrap();

        let decoded = decode_schedule(&buf).unwrap();
        assert_eq!(decoded.major_frame, payload.major_frame);
        assert_eq!(decoded.entries.len(), payload.entries.len());
        for (a, b) in decoded.entries.iter().zip(payload.entries.iter()) {
            assert_eq!(a.service_id, b.service_id);
            assert_eq!(a.runtime, b.runtime);
            assert_eq!(a.providers.as_slice(), b.providers.as_slice());
        }
    }

    #[test]
    fn test_encode_prefills_unused_slots() {
        let payload = sample_payload();
        let mut buf = [0u8; SCHED_WIRE_LEN];
        encode_schedule(&payload, &mut buf).unwrap();

        // Everything past the populated entries stays 0xFF.
        let used = 12 + payload.entries.len() * ENTRY_WIRE_LEN;
        assert!(buf[used..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_decode_short_buffer_faults() {
        let buf = [0u8; SCHED_WIRE_LEN - 1];
        assert_eq!(decode_schedule(&buf), Err(SchedError::CopyFault));

        let mut out = [0u8; 16];
        assert_eq!(
            encode_schedule(&sample_payload(), &mut out),
            Err(SchedError::CopyFault)
        );
    }

    #[test]
    fn test_decode_rejects_negative_times() {
        let mut buf = [0u8; SCHED_WIRE_LEN];
        encode_schedule(&sample_payload(), &mut buf).unwrap();
        buf[0..8].copy_from_slice(&(-1i64).to_le_bytes());
        assert_eq!(decode_schedule(&buf), Err(SchedError::InvalidArgs));
    }

    #[test]
    fn test_decode_rejects_oversize_counts() {
        let mut buf = [0u8; SCHED_WIRE_LEN];
        encode_schedule(&sample_payload(), &mut buf).unwrap();

        buf[8..12].copy_from_slice(&(MAX_SCHED_ENTRIES as u32 + 1).to_le_bytes());
        assert_eq!(decode_schedule(&buf), Err(SchedError::InvalidArgs));

        encode_schedule(&sample_payload(), &mut buf).unwrap();
        buf[12 + 12..12 + 16].copy_from_slice(&(MAX_PROVIDERS as u32 + 1).to_le_bytes());
        assert_eq!(decode_schedule(&buf), Err(SchedError::InvalidArgs));
    }

    #[test]
    fn test_domain_round_trip() {
        let params = DomainParams {
            parent: 3,
            healthy: true,
        };
        let mut buf = [0u8; DOMAIN_WIRE_LEN];
        encode_domain(&params, &mut buf).unwrap();

        let (cmd, decoded) = decode_domain(&buf).unwrap();
        assert_eq!(cmd, DomainCmd::GetInfo);
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_domain_decode_rejects_bad_cmd() {
        let mut buf = [0u8; DOMAIN_WIRE_LEN];
        buf[0..4].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(decode_domain(&buf), Err(SchedError::InvalidArgs));

        assert_eq!(decode_domain(&buf[..4]), Err(SchedError::CopyFault));
    }
}
