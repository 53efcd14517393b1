//! The five packed, little-endian metadata record layouts emitted by the
//! multiverse compiler plug-in. Reading mirrors `elf::raw`'s approach:
//! plain field-at-a-time little-endian decoding rather than a zero-copy
//! cast, since these records are read out of the ELF buffer a handful of
//! times per run, not on any hot path.

use crate::elf::raw::{get_i32, get_u32, get_u64, set_i32, set_u32, set_u64};

pub const VAR_SIZE: usize = 28;
pub const FN_SIZE: usize = 44;
pub const MVFN_SIZE: usize = 28;
pub const CALLSITE_SIZE: usize = 16;
pub const ASSIGNMENT_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawVar {
    pub name: u64,
    pub variable_location: u64,
    pub info_bits: u32,
    pub functions_head: u64,
}

impl RawVar {
    pub fn read(buf: &[u8], off: usize) -> Self {
        RawVar {
            name: get_u64(buf, off),
            variable_location: get_u64(buf, off + 8),
            info_bits: get_u32(buf, off + 16),
            functions_head: get_u64(buf, off + 20),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.name);
        set_u64(buf, off + 8, self.variable_location);
        set_u32(buf, off + 16, self.info_bits);
        set_u64(buf, off + 20, self.functions_head);
    }

    pub fn width(&self) -> u8 {
        (self.info_bits & 0xf) as u8
    }

    pub fn tracked(&self) -> bool {
        (self.info_bits >> 29) & 1 != 0
    }

    pub fn signed(&self) -> bool {
        (self.info_bits >> 30) & 1 != 0
    }

    pub fn bound(&self) -> bool {
        (self.info_bits >> 31) & 1 != 0
    }

    pub fn pack(width: u8, tracked: bool, signed: bool, bound: bool) -> u32 {
        (width as u32 & 0xf)
            | ((tracked as u32) << 29)
            | ((signed as u32) << 30)
            | ((bound as u32) << 31)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawFn {
    pub name: u64,
    pub function_body: u64,
    pub n_mv_functions: u32,
    pub mv_functions: u64,
    pub patchpoints_head: u64,
    pub active_mvfn: u64,
}

impl RawFn {
    pub fn read(buf: &[u8], off: usize) -> Self {
        RawFn {
            name: get_u64(buf, off),
            function_body: get_u64(buf, off + 8),
            n_mv_functions: get_u32(buf, off + 16),
            mv_functions: get_u64(buf, off + 20),
            patchpoints_head: get_u64(buf, off + 28),
            active_mvfn: get_u64(buf, off + 36),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.name);
        set_u64(buf, off + 8, self.function_body);
        set_u32(buf, off + 16, self.n_mv_functions);
        set_u64(buf, off + 20, self.mv_functions);
        // Per the Open Questions, these runtime-only fields are always
        // reserialized as zero; `libmultiverse` re-derives them at load.
        set_u64(buf, off + 28, 0);
        set_u64(buf, off + 36, 0);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RawMvfnKind {
    #[default]
    None,
    Nop,
    Constant,
    Cli,
    Sti,
}

impl RawMvfnKind {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => RawMvfnKind::Nop,
            2 => RawMvfnKind::Constant,
            3 => RawMvfnKind::Cli,
            4 => RawMvfnKind::Sti,
            _ => RawMvfnKind::None,
        }
    }

    pub fn to_i32(self) -> i32 {
        match self {
            RawMvfnKind::None => 0,
            RawMvfnKind::Nop => 1,
            RawMvfnKind::Constant => 2,
            RawMvfnKind::Cli => 3,
            RawMvfnKind::Sti => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawMvfn {
    pub function_body: u64,
    pub n_assignments: u32,
    pub assignments: u64,
    pub kind: RawMvfnKind,
    pub constant: u32,
}

impl RawMvfn {
    pub fn read(buf: &[u8], off: usize) -> Self {
        RawMvfn {
            function_body: get_u64(buf, off),
            n_assignments: get_u32(buf, off + 8),
            assignments: get_u64(buf, off + 12),
            kind: RawMvfnKind::from_i32(get_i32(buf, off + 20)),
            constant: get_u32(buf, off + 24),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.function_body);
        set_u32(buf, off + 8, self.n_assignments);
        set_u64(buf, off + 12, self.assignments);
        set_i32(buf, off + 20, self.kind.to_i32());
        set_u32(buf, off + 24, self.constant);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCallsite {
    pub function_body: u64,
    pub call_label: u64,
}

impl RawCallsite {
    pub fn read(buf: &[u8], off: usize) -> Self {
        RawCallsite {
            function_body: get_u64(buf, off),
            call_label: get_u64(buf, off + 8),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.function_body);
        set_u64(buf, off + 8, self.call_label);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawAssignment {
    pub location: u64,
    pub lower: u32,
    pub upper: u32,
}

impl RawAssignment {
    pub fn read(buf: &[u8], off: usize) -> Self {
        RawAssignment {
            location: get_u64(buf, off),
            lower: get_u32(buf, off + 8),
            upper: get_u32(buf, off + 12),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.location);
        set_u32(buf, off + 8, self.lower);
        set_u32(buf, off + 12, self.upper);
    }
}
