//! The multiverse object graph: `Var`, `Fn`, `Mvfn`, `Assign`,
//! `Patchpoint`, assembled from the raw metadata sections.
//!
//! The graph replaces an intrusive pointer structure with owning vectors
//! indexed by stable IDs. `Var`/`Fn` live in `MvGraph::vars`/`fns`; every
//! cross-reference (`Assign::var`, `Patchpoint::func`) is a `VarId`/`FnId`
//! newtype index rather than a pointer or `Rc`, so the whole graph is
//! `Send` and trivially re-borrowable.

pub mod raw;

use std::collections::HashMap;

use crate::arch::{self, CallsiteKind, VariantKind};
use crate::elf::view::ElfView;
use crate::elf::SectionKind;
use crate::error::{MvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub usize);

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub address: u64,
    pub width: u8,
    pub tracked: bool,
    pub signed: bool,
    pub bound: bool,
    pub value: u64,
    pub frozen: bool,
}

#[derive(Debug, Clone)]
pub struct Assign {
    pub var: VarId,
    pub lower: u32,
    pub upper: u32,
}

impl Assign {
    /// A variant is active iff every one of its assignments has
    /// `lower <= Var.value <= upper` given the current (possibly just
    /// frozen) value.
    pub fn holds(&self, var: &Var) -> bool {
        let v = var.value;
        v >= self.lower as u64 && v <= self.upper as u64
    }
}

#[derive(Debug, Clone)]
pub struct Mvfn {
    pub body: u64,
    pub assignments_addr: u64,
    pub kind: VariantKind,
    pub assigns: Vec<Assign>,
}

impl Mvfn {
    pub fn is_active(&self, vars: &[Var]) -> bool {
        self.assigns
            .iter()
            .all(|a| vars[a.var.0].frozen && a.holds(&vars[a.var.0]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchpointKind {
    Jump,
    Call,
    IndirectCall,
}

#[derive(Debug, Clone)]
pub struct Patchpoint {
    pub addr: u64,
    pub func: FnId,
    pub kind: PatchpointKind,
    pub orig_bytes: Vec<u8>,
}

impl Patchpoint {
    pub fn length(&self) -> usize {
        match self.kind {
            PatchpointKind::IndirectCall => 6,
            _ => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fn {
    pub name: String,
    pub body: u64,
    pub variants: Vec<Mvfn>,
    pub mv_functions_addr: u64,
    pub patchpoints: Vec<usize>,
    pub frozen: bool,
}

pub struct MvGraph {
    pub vars: Vec<Var>,
    pub fns: Vec<Fn>,
    pub patchpoints: Vec<Patchpoint>,
}

impl MvGraph {
    pub fn var_by_name(&self, name: &str) -> Option<VarId> {
        self.vars.iter().position(|v| v.name == name).map(VarId)
    }

    pub fn fn_patchpoints(&self, fid: FnId) -> impl Iterator<Item = &Patchpoint> {
        self.fns[fid.0].patchpoints.iter().map(move |&i| &self.patchpoints[i])
    }
}

const REQUIRED_BOUNDARY_KINDS: [&str; 3] = ["var", "fn", "callsite"];

/// Build the graph from an already-parsed `ElfView`. Consumes no mutable
/// state: commit and trim borrow the view separately afterwards.
pub fn build_graph(view: &ElfView) -> Result<MvGraph> {
    for kind in [
        SectionKind::Rodata,
        SectionKind::Data,
        SectionKind::Text,
        SectionKind::Bss,
        SectionKind::Dynamic,
        SectionKind::MvVar,
    ] {
        if view.section_index_by_name(kind.section_name()).is_none() {
            return Err(MvError::ElfMalformed(format!(
                "missing required section `{}`",
                kind.section_name()
            )));
        }
    }
    for k in REQUIRED_BOUNDARY_KINDS {
        for edge in ["start", "stop"] {
            let sym = format!("__{edge}___multiverse_{k}_ptr");
            if view.symbol_by_name(&sym).is_none() {
                return Err(MvError::ElfMalformed(format!("missing boundary symbol `{sym}`")));
            }
        }
    }

    let data_idx = view.section_index_by_name(".data").unwrap();

    // ---- vars ----
    let mvvar_idx = view.section_index_by_name(SectionKind::MvVar.section_name()).unwrap();
    let mvvar_data = view.section_data(mvvar_idx);
    let n_vars = mvvar_data.len() / raw::VAR_SIZE;
    let mut vars = Vec::with_capacity(n_vars);
    let mut var_by_addr: HashMap<u64, VarId> = HashMap::new();
    for i in 0..n_vars {
        let rv = raw::RawVar::read(mvvar_data, i * raw::VAR_SIZE);
        let name = view.cstr_at(rv.name)?;
        let address = rv.variable_location;
        if !view.addr_in_section(address, data_idx) {
            return Err(MvError::range(address, ".data"));
        }
        let width = rv.width();
        let value = read_width(view, address, width)?;
        var_by_addr.insert(address, VarId(vars.len()));
        vars.push(Var {
            name,
            address,
            width,
            tracked: rv.tracked(),
            signed: rv.signed(),
            bound: rv.bound(),
            value,
            frozen: false,
        });
    }

    // ---- functions, variants, assignments ----
    let mut fns = Vec::new();
    let mut fn_by_body: HashMap<u64, FnId> = HashMap::new();
    if let Some(mvfn_idx) = view.section_index_by_name(SectionKind::MvFn.section_name()) {
        let mvfn_data = view.section_data(mvfn_idx);
        let n_fns = mvfn_data.len() / raw::FN_SIZE;
        for i in 0..n_fns {
            let rf = raw::RawFn::read(mvfn_data, i * raw::FN_SIZE);
            let name = view.cstr_at(rf.name)?;
            let mut variants = Vec::with_capacity(rf.n_mv_functions as usize);
            for j in 0..rf.n_mv_functions as u64 {
                let mvfn_addr = rf.mv_functions + j * raw::MVFN_SIZE as u64;
                let bytes = view.bytes_at(mvfn_addr, raw::MVFN_SIZE)?;
                let rm = raw::RawMvfn::read(bytes, 0);
                let body_bytes = view.bytes_at_clamped(rm.function_body, 6)?;
                let kind = arch::decode_variant_kind(body_bytes);
                let mut assigns = Vec::with_capacity(rm.n_assignments as usize);
                for k in 0..rm.n_assignments as u64 {
                    let a_addr = rm.assignments + k * raw::ASSIGNMENT_SIZE as u64;
                    let a_bytes = view.bytes_at(a_addr, raw::ASSIGNMENT_SIZE)?;
                    let ra = raw::RawAssignment::read(a_bytes, 0);
                    let var = *var_by_addr
                        .get(&ra.location)
                        .ok_or_else(|| MvError::range(ra.location, "__multiverse_var_"))?;
                    assigns.push(Assign {
                        var,
                        lower: ra.lower,
                        upper: ra.upper,
                    });
                }
                variants.push(Mvfn {
                    body: rm.function_body,
                    assignments_addr: rm.assignments,
                    kind,
                    assigns,
                });
            }
            fn_by_body.insert(rf.function_body, FnId(fns.len()));
            fns.push(Fn {
                name,
                body: rf.function_body,
                variants,
                mv_functions_addr: rf.mv_functions,
                patchpoints: Vec::new(),
                frozen: false,
            });
        }
    }

    // ---- patchpoints: synthetic per-function JUMP, then callsite records ----
    let mut patchpoints = Vec::new();
    for (body, fid) in fn_by_body.iter() {
        let orig = view.bytes_at(*body, 5)?.to_vec();
        let idx = patchpoints.len();
        patchpoints.push(Patchpoint {
            addr: *body,
            func: *fid,
            kind: PatchpointKind::Jump,
            orig_bytes: orig,
        });
        fns[fid.0].patchpoints.push(idx);
    }

    if let Some(mvcs_idx) = view.section_index_by_name(SectionKind::MvCallsite.section_name()) {
        let mvcs_data = view.section_data(mvcs_idx);
        let n_cs = mvcs_data.len() / raw::CALLSITE_SIZE;
        for i in 0..n_cs {
            let rc = raw::RawCallsite::read(mvcs_data, i * raw::CALLSITE_SIZE);
            let fid = *fn_by_body
                .get(&rc.function_body)
                .ok_or_else(|| MvError::range(rc.function_body, "__multiverse_fn_"))?;
            let probe = view.bytes_at_clamped(rc.call_label, 6)?;
            let decoded = arch::decode_callsite(rc.call_label, probe)?;
            let kind = match decoded.kind {
                CallsiteKind::Call => PatchpointKind::Call,
                CallsiteKind::IndirectCall => PatchpointKind::IndirectCall,
                CallsiteKind::Invalid => unreachable!("decode_callsite never returns Invalid Ok"),
            };
            let len = if kind == PatchpointKind::IndirectCall { 6 } else { 5 };
            let orig = view.bytes_at(rc.call_label, len)?.to_vec();
            let idx = patchpoints.len();
            patchpoints.push(Patchpoint {
                addr: rc.call_label,
                func: fid,
                kind,
                orig_bytes: orig,
            });
            fns[fid.0].patchpoints.push(idx);
        }
    }

    Ok(MvGraph { vars, fns, patchpoints })
}

fn read_width(view: &ElfView, addr: u64, width: u8) -> Result<u64> {
    let bytes = view.bytes_at(addr, width as usize)?;
    let mut buf = [0u8; 8];
    buf[..width as usize].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}
