//! The x86-64 architecture layer: decoding call sites and variant
//! bodies, and emitting the patched replacement bytes.
//!
//! Every function here is a pure transform over a byte slice plus the
//! virtual addresses needed to compute PC-relative displacements — no
//! `ElfView` dependency, so these are exhaustively unit-testable, kept
//! free of any object-file or linker concern; our patchpoints are always
//! fixed-length and never relaxed, so there's no encoder/sink split to
//! model here.

use crate::error::{MvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// Generic body: must actually be called.
    None,
    Nop,
    Constant(u32),
    Cli,
    Sti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallsiteKind {
    Call,
    IndirectCall,
    Invalid,
}

impl CallsiteKind {
    /// Patchpoint length: 6 iff indirect, else 5 (also 5 for a synthetic
    /// `JUMP` patchpoint at a function's original body).
    pub fn length(self) -> usize {
        match self {
            CallsiteKind::IndirectCall => 6,
            _ => 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedCallsite {
    pub kind: CallsiteKind,
    pub callee: u64,
}

/// A byte is a *ret* iff it is `0xc3` (`retq`) or `0xf3 0xc3` (`repz retq`).
/// Returns the matched length.
fn ret_len(bytes: &[u8]) -> Option<usize> {
    match bytes {
        [0xc3, ..] => Some(1),
        [0xf3, 0xc3, ..] => Some(2),
        _ => None,
    }
}

/// Recognize which specialized variant body `bytes` encodes, if any.
pub fn decode_variant_kind(bytes: &[u8]) -> VariantKind {
    if let [0x31, 0xc0, rest @ ..] = bytes {
        if ret_len(rest).is_some() {
            return VariantKind::Constant(0);
        }
    }
    if let [0xb8, c0, c1, c2, c3, rest @ ..] = bytes {
        if ret_len(rest).is_some() {
            return VariantKind::Constant(u32::from_le_bytes([*c0, *c1, *c2, *c3]));
        }
    }
    if let [0xfa, rest @ ..] = bytes {
        if ret_len(rest).is_some() {
            return VariantKind::Cli;
        }
    }
    if let [0xfb, rest @ ..] = bytes {
        if ret_len(rest).is_some() {
            return VariantKind::Sti;
        }
    }
    if ret_len(bytes).is_some() {
        return VariantKind::Nop;
    }
    VariantKind::None
}

/// Decode a call site at virtual address `addr` with the raw bytes starting
/// there. Fails with `DecodeError` if neither pattern matches.
pub fn decode_callsite(addr: u64, bytes: &[u8]) -> Result<DecodedCallsite> {
    if bytes.len() >= 5 && bytes[0] == 0xe8 {
        let disp = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        let callee = (addr as i64 + disp as i64 + 5) as u64;
        return Ok(DecodedCallsite {
            kind: CallsiteKind::Call,
            callee,
        });
    }
    if bytes.len() >= 6 && bytes[0] == 0xff && bytes[1] == 0x15 {
        let disp = i32::from_le_bytes(bytes[2..6].try_into().unwrap());
        let callee = (addr as i64 + disp as i64 + 6) as u64;
        return Ok(DecodedCallsite {
            kind: CallsiteKind::IndirectCall,
            callee,
        });
    }
    Err(MvError::decode(
        addr,
        format!("unrecognized call-site opcode bytes {:02x?}", &bytes[..bytes.len().min(6)]),
    ))
}

/// Emit the patched bytes for a call site of kind `call_kind` at `patch_addr`
/// once `variant` has been selected. `variant_body` is the virtual address
/// of the variant body, needed only when `variant` is `VariantKind::None`
/// (the generic body must still be called).
pub fn emit_patched_callsite(
    call_kind: CallsiteKind,
    patch_addr: u64,
    variant: VariantKind,
    variant_body: u64,
) -> Vec<u8> {
    let indirect = call_kind == CallsiteKind::IndirectCall;
    let len = call_kind.length();
    let mut out = match variant {
        VariantKind::Nop => {
            if indirect {
                vec![0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00]
            } else {
                vec![0x0f, 0x1f, 0x44, 0x00, 0x00]
            }
        }
        VariantKind::Constant(c) => {
            let mut v = vec![0xb8];
            v.extend_from_slice(&c.to_le_bytes());
            if indirect {
                v.push(0x90);
            }
            v
        }
        VariantKind::Cli => {
            if indirect {
                vec![0xfa, 0x0f, 0x1f, 0x44, 0x00, 0x00]
            } else {
                vec![0xfa, 0x0f, 0x1f, 0x40, 0x00]
            }
        }
        VariantKind::Sti => {
            if indirect {
                vec![0xfb, 0x0f, 0x1f, 0x44, 0x00, 0x00]
            } else {
                vec![0xfb, 0x0f, 0x1f, 0x40, 0x00]
            }
        }
        VariantKind::None => {
            let disp = (variant_body as i64 - (patch_addr as i64 + 5)) as i32;
            let mut v = vec![0xe8];
            v.extend_from_slice(&disp.to_le_bytes());
            if indirect {
                v.push(0x90);
            }
            v
        }
    };
    debug_assert_eq!(out.len(), len, "patched call-site length mismatch");
    out.truncate(len);
    out
}

/// Emit the synthetic `JUMP` patchpoint at a function's original body:
/// `E9 <disp32>` targeting `variant_body`.
pub fn emit_jump(patch_addr: u64, variant_body: u64) -> [u8; 5] {
    let disp = (variant_body as i64 - (patch_addr as i64 + 5)) as i32;
    let mut out = [0u8; 5];
    out[0] = 0xe9;
    out[1..5].copy_from_slice(&disp.to_le_bytes());
    out
}
