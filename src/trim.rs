//! The Trim Engine: regenerate the four multiverse metadata
//! sections for whatever survived commit, rewrite the boundary pointers and
//! relocations that describe them, and shrink the file by sliding `.bss`
//! up to close the gap.
//!
//! This is the one component that mutates the physical *layout* of the
//! file rather than just bytes within an existing span, so it runs as a
//! single ordered pipeline: snapshot the old layout, compute every new
//! byte string and address off of that snapshot, splice the shrunk region
//! out of the buffer, then write the updated tables into their new
//! (shifted) homes.

use std::collections::HashSet;

use tracing::info;

use crate::elf::raw::{ProgramHeader, Rela, SectionHeader, DT_RELACOUNT, DT_RELASZ, RELA_SIZE, R_X86_64_RELATIVE};
use crate::elf::view::ElfView;
use crate::elf::{SectionKind, SectionWrapper};
use crate::error::{MvError, Result};
use crate::graph::raw as graph_raw;
use crate::graph::{MvGraph, PatchpointKind};

#[derive(Debug, Default)]
pub struct TrimSummary {
    pub shrinkage: u64,
    pub vars_kept: usize,
    pub fns_kept: usize,
    pub callsites_kept: usize,
}

const BOUNDARY_KINDS: [&str; 3] = ["var", "fn", "callsite"];

struct Layout {
    mvdata: Option<usize>,
    mvfn: Option<usize>,
    mvvar: usize,
    mvcs: Option<usize>,
    bss: usize,
    data: usize,
    mvtext: Option<usize>,
}

pub fn trim(view: &mut ElfView, graph: &MvGraph) -> Result<TrimSummary> {
    let layout = Layout {
        mvdata: view.section_index_by_name(SectionKind::MvData.section_name()),
        mvfn: view.section_index_by_name(SectionKind::MvFn.section_name()),
        mvvar: view
            .section_index_by_name(SectionKind::MvVar.section_name())
            .expect("build_graph already required __multiverse_var_"),
        mvcs: view.section_index_by_name(SectionKind::MvCallsite.section_name()),
        bss: view
            .section_index_by_name(SectionKind::Bss.section_name())
            .expect("build_graph already required .bss"),
        data: view
            .section_index_by_name(SectionKind::Data.section_name())
            .expect("build_graph already required .data"),
        mvtext: view.section_index_by_name(SectionKind::MvText.section_name()),
    };

    if !graph.fns.is_empty() && (layout.mvfn.is_none() || layout.mvcs.is_none() || layout.mvdata.is_none()) {
        return Err(MvError::LayoutViolation(
            "graph has functions but one of __multiverse_{fn,callsite,data}_ is missing".into(),
        ));
    }

    let old = OldLayout::capture(view, &layout)?;
    let mvdata_base = old.area_offset_vaddr();

    // ---- partition the existing .rela.dyn ----
    let boundary_addrs = boundary_word_addresses(view)?;
    let original_relas = view.rela_dyn()?;
    let mut data_wrapper = SectionWrapper::new(SectionKind::Data, layout.data);
    let mut mvtext_wrapper = layout.mvtext.map(|idx| SectionWrapper::new(SectionKind::MvText, idx));
    let mut unclaimed = Vec::new();
    for r in &original_relas {
        if boundary_addrs.contains(&r.r_offset) {
            continue; // regenerated below, routed into the owning mv bucket
        }
        if old.mvdata.map(|s| s.contains_addr(r.r_offset)).unwrap_or(false)
            || old.mvfn.contains_addr(r.r_offset)
            || old.mvvar.contains_addr(r.r_offset)
            || old.mvcs.map(|s| s.contains_addr(r.r_offset)).unwrap_or(false)
        {
            continue; // targets metadata being regenerated from scratch
        }
        if data_wrapper.claim_reloc(view, *r) {
            continue;
        }
        if let Some(w) = mvtext_wrapper.as_mut() {
            if w.claim_reloc(view, *r) {
                continue;
            }
        }
        unclaimed.push(*r);
    }
    let data_keep = data_wrapper.owned_relocs().to_vec();
    let mvtext_keep = mvtext_wrapper.as_ref().map(|w| w.owned_relocs().to_vec()).unwrap_or_default();

    // ---- regenerate mvdata (per-function: mvfn array, then its assignments) ----
    let mut mvdata_bytes = Vec::new();
    let mut mvdata_relocs = Vec::new();
    let mut fn_mvfn_vaddr = vec![0u64; graph.fns.len()];
    let mut fns_kept = 0usize;

    for (fi, f) in graph.fns.iter().enumerate() {
        if f.frozen {
            continue;
        }
        fns_kept += 1;
        let mvfn_block_vaddr = mvdata_base + mvdata_bytes.len() as u64;
        fn_mvfn_vaddr[fi] = mvfn_block_vaddr;

        let mut assign_vaddrs = Vec::with_capacity(f.variants.len());
        let mut probe = mvfn_block_vaddr + f.variants.len() as u64 * graph_raw::MVFN_SIZE as u64;
        for v in &f.variants {
            assign_vaddrs.push(probe);
            probe += v.assigns.len() as u64 * graph_raw::ASSIGNMENT_SIZE as u64;
        }

        for (v, &assign_vaddr) in f.variants.iter().zip(&assign_vaddrs) {
            let rec_off = mvdata_bytes.len();
            mvdata_bytes.resize(rec_off + graph_raw::MVFN_SIZE, 0);
            let raw = graph_raw::RawMvfn {
                function_body: v.body,
                n_assignments: v.assigns.len() as u32,
                assignments: assign_vaddr,
                kind: to_raw_kind(v.kind),
                constant: to_raw_constant(v.kind),
            };
            raw.write(&mut mvdata_bytes, rec_off);
            let rec_vaddr = mvdata_base + rec_off as u64;
            mvdata_relocs.push(reloc(rec_vaddr, v.body));
            mvdata_relocs.push(reloc(rec_vaddr + 12, assign_vaddr));
        }
        for (v, &assign_vaddr) in f.variants.iter().zip(&assign_vaddrs) {
            let mut rec_off = (assign_vaddr - mvdata_base) as usize;
            if mvdata_bytes.len() < rec_off {
                mvdata_bytes.resize(rec_off, 0);
            }
            for a in &v.assigns {
                mvdata_bytes.resize(rec_off + graph_raw::ASSIGNMENT_SIZE, 0);
                let var_addr = graph.vars[a.var.0].address;
                let raw = graph_raw::RawAssignment {
                    location: var_addr,
                    lower: a.lower,
                    upper: a.upper,
                };
                raw.write(&mut mvdata_bytes, rec_off);
                let rec_vaddr = mvdata_base + rec_off as u64;
                mvdata_relocs.push(reloc(rec_vaddr, var_addr));
                rec_off += graph_raw::ASSIGNMENT_SIZE;
            }
        }
    }

    // ---- regenerate mvfn ----
    let mvfn_new_base = mvdata_base + mvdata_bytes.len() as u64;
    let mut mvfn_bytes = Vec::new();
    let mut mvfn_relocs = Vec::new();
    for (fi, f) in graph.fns.iter().enumerate() {
        if f.frozen {
            continue;
        }
        let rec_off = mvfn_bytes.len();
        mvfn_bytes.resize(rec_off + graph_raw::FN_SIZE, 0);
        let name = name_ptr(view, &f.name)?;
        let raw = graph_raw::RawFn {
            name,
            function_body: f.body,
            n_mv_functions: f.variants.len() as u32,
            mv_functions: fn_mvfn_vaddr[fi],
            patchpoints_head: 0,
            active_mvfn: 0,
        };
        raw.write(&mut mvfn_bytes, rec_off);
        let rec_vaddr = mvfn_new_base + rec_off as u64;
        mvfn_relocs.push(reloc(rec_vaddr, name));
        mvfn_relocs.push(reloc(rec_vaddr + 8, f.body));
        mvfn_relocs.push(reloc(rec_vaddr + 20, fn_mvfn_vaddr[fi]));
    }

    // ---- regenerate mvvar ----
    let mvvar_new_base = mvfn_new_base + mvfn_bytes.len() as u64;
    let mut mvvar_bytes = Vec::new();
    let mut mvvar_relocs = Vec::new();
    let mut vars_kept = 0usize;
    for var in &graph.vars {
        if var.frozen {
            continue;
        }
        vars_kept += 1;
        let rec_off = mvvar_bytes.len();
        mvvar_bytes.resize(rec_off + graph_raw::VAR_SIZE, 0);
        let name = name_ptr(view, &var.name)?;
        let raw = graph_raw::RawVar {
            name,
            variable_location: var.address,
            info_bits: graph_raw::RawVar::pack(var.width, var.tracked, var.signed, var.bound),
            functions_head: 0,
        };
        raw.write(&mut mvvar_bytes, rec_off);
        let rec_vaddr = mvvar_new_base + rec_off as u64;
        mvvar_relocs.push(reloc(rec_vaddr, name));
        mvvar_relocs.push(reloc(rec_vaddr + 8, var.address));
    }

    // ---- regenerate mvcs ----
    let mvcs_new_base = mvvar_new_base + mvvar_bytes.len() as u64;
    let mut mvcs_bytes = Vec::new();
    let mut mvcs_relocs = Vec::new();
    let mut callsites_kept = 0usize;
    for pp in &graph.patchpoints {
        if pp.kind == PatchpointKind::Jump {
            continue;
        }
        if graph.fns[pp.func.0].frozen {
            continue;
        }
        callsites_kept += 1;
        let rec_off = mvcs_bytes.len();
        mvcs_bytes.resize(rec_off + graph_raw::CALLSITE_SIZE, 0);
        let body = graph.fns[pp.func.0].body;
        let raw = graph_raw::RawCallsite {
            function_body: body,
            call_label: pp.addr,
        };
        raw.write(&mut mvcs_bytes, rec_off);
        let rec_vaddr = mvcs_new_base + rec_off as u64;
        mvcs_relocs.push(reloc(rec_vaddr, body));
        mvcs_relocs.push(reloc(rec_vaddr + 8, pp.addr));
    }

    let new_area_size = mvdata_bytes.len() + mvfn_bytes.len() + mvvar_bytes.len() + mvcs_bytes.len();
    let old_area_size = (old.area_end - old.area_offset) as usize;
    if new_area_size > old_area_size {
        return Err(MvError::LayoutViolation(format!(
            "trim would grow the multiverse area from {old_area_size} to {new_area_size} bytes"
        )));
    }
    let shrinkage = (old_area_size - new_area_size) as u64;

    // ---- mark boundaries, emitting into the owning mv bucket ----
    mark_boundary(view, "fn", mvfn_new_base, mvfn_new_base + mvfn_bytes.len() as u64, &mut mvfn_relocs)?;
    mark_boundary(view, "var", mvvar_new_base, mvvar_new_base + mvvar_bytes.len() as u64, &mut mvvar_relocs)?;
    mark_boundary(view, "callsite", mvcs_new_base, mvcs_new_base + mvcs_bytes.len() as u64, &mut mvcs_relocs)?;

    // ---- splice the shrunk region out of the file ----
    let mut new_area_bytes = Vec::with_capacity(new_area_size);
    new_area_bytes.extend_from_slice(&mvdata_bytes);
    new_area_bytes.extend_from_slice(&mvfn_bytes);
    new_area_bytes.extend_from_slice(&mvvar_bytes);
    new_area_bytes.extend_from_slice(&mvcs_bytes);
    let splice_range = old.area_offset as usize..old.area_end as usize;
    view.buf.splice(splice_range, new_area_bytes);

    // ---- fix up the ELF header ----
    let new_e_shoff = shift_if_past(view.e_shoff, old.area_end, shrinkage);
    let new_e_phoff = shift_if_past(view.e_phoff, old.area_end, shrinkage);
    view.e_shoff = new_e_shoff;
    view.e_phoff = new_e_phoff;
    crate::elf::raw::set_u64(&mut view.buf, 40, new_e_shoff);
    crate::elf::raw::set_u64(&mut view.buf, 32, new_e_phoff);

    // ---- fix up section headers ----
    let bss_shndx = layout.bss as u16;
    for i in 0..view.e_shnum as usize {
        let mut sh = old.shdrs[i];
        if i == layout.bss {
            sh.sh_addr -= shrinkage;
            sh.sh_offset = old.area_offset + new_area_size as u64;
            sh.sh_size += shrinkage;
        } else if Some(i) == layout.mvdata {
            sh.sh_offset = old.area_offset;
            sh.sh_addr = mvdata_base;
            sh.sh_size = mvdata_bytes.len() as u64;
        } else if Some(i) == layout.mvfn {
            sh.sh_offset = old.area_offset + mvdata_bytes.len() as u64;
            sh.sh_addr = mvfn_new_base;
            sh.sh_size = mvfn_bytes.len() as u64;
        } else if i == layout.mvvar {
            sh.sh_offset = old.area_offset + mvdata_bytes.len() as u64 + mvfn_bytes.len() as u64;
            sh.sh_addr = mvvar_new_base;
            sh.sh_size = mvvar_bytes.len() as u64;
        } else if Some(i) == layout.mvcs {
            sh.sh_offset =
                old.area_offset + mvdata_bytes.len() as u64 + mvfn_bytes.len() as u64 + mvvar_bytes.len() as u64;
            sh.sh_addr = mvcs_new_base;
            sh.sh_size = mvcs_bytes.len() as u64;
        } else {
            sh.sh_offset = shift_if_past(sh.sh_offset, old.area_end, shrinkage);
        }
        view.set_shdr(i, &sh);
    }

    // ---- fix up program headers ----
    for i in 0..view.e_phnum as usize {
        let mut ph = old.phdrs[i];
        if i == old.load_idx {
            ph.p_filesz -= shrinkage;
        } else {
            ph.p_offset = shift_if_past(ph.p_offset, old.area_end, shrinkage);
        }
        view.set_phdr(i, &ph);
    }

    // ---- symbols whose value fell inside the now-relocated .bss ----
    view.shift_symbols_in_section(bss_shndx, -(shrinkage as i64))?;

    // ---- rebuild .rela.dyn and .dynamic bookkeeping ----
    let mut all_relas = Vec::new();
    all_relas.extend(data_keep);
    all_relas.extend(mvvar_relocs);
    all_relas.extend(mvdata_relocs);
    all_relas.extend(mvfn_relocs);
    all_relas.extend(mvcs_relocs);
    all_relas.extend(mvtext_keep);
    all_relas.extend(unclaimed);

    let relative_count = all_relas.iter().filter(|r| r.r_type == R_X86_64_RELATIVE).count();
    view.set_rela_dyn(&all_relas)?;
    view.set_dynamic_value(DT_RELASZ, (all_relas.len() * RELA_SIZE) as u64)?;
    view.set_dynamic_value(DT_RELACOUNT, relative_count as u64)?;

    info!(shrinkage, vars_kept, fns_kept, callsites_kept, "trim complete");

    Ok(TrimSummary {
        shrinkage,
        vars_kept,
        fns_kept,
        callsites_kept,
    })
}

fn reloc(offset: u64, addend: u64) -> Rela {
    Rela {
        r_offset: offset,
        r_sym: 0,
        r_type: R_X86_64_RELATIVE,
        r_addend: addend as i64,
    }
}

fn to_raw_kind(k: crate::arch::VariantKind) -> graph_raw::RawMvfnKind {
    use crate::arch::VariantKind as V;
    match k {
        V::None => graph_raw::RawMvfnKind::None,
        V::Nop => graph_raw::RawMvfnKind::Nop,
        V::Constant(_) => graph_raw::RawMvfnKind::Constant,
        V::Cli => graph_raw::RawMvfnKind::Cli,
        V::Sti => graph_raw::RawMvfnKind::Sti,
    }
}

fn to_raw_constant(k: crate::arch::VariantKind) -> u32 {
    match k {
        crate::arch::VariantKind::Constant(c) => c,
        _ => 0,
    }
}

/// Names are interned once by the compiler plug-in into `.rodata`; reuse the
/// existing C string rather than appending a new one, since every `Var`/`Fn`
/// still being serialized already had one on input.
fn name_ptr(view: &ElfView, name: &str) -> Result<u64> {
    let rodata_idx = view
        .section_index_by_name(SectionKind::Rodata.section_name())
        .expect("build_graph already required .rodata");
    let data = view.section_data(rodata_idx);
    let needle = name.as_bytes();
    let base = view.shdr(rodata_idx).sh_addr;
    let mut i = 0;
    while i + needle.len() <= data.len() {
        if &data[i..i + needle.len()] == needle
            && (i + needle.len() == data.len() || data[i + needle.len()] == 0)
            && (i == 0 || data[i - 1] == 0)
        {
            return Ok(base + i as u64);
        }
        i += 1;
    }
    Err(MvError::ElfMalformed(format!(
        "could not relocate original `.rodata` string for `{name}`"
    )))
}

fn boundary_word_addresses(view: &ElfView) -> Result<HashSet<u64>> {
    let mut set = HashSet::new();
    for k in BOUNDARY_KINDS {
        for edge in ["start", "stop"] {
            let sym_name = format!("__{edge}___multiverse_{k}_ptr");
            let sym = view
                .symbol_by_name(&sym_name)
                .ok_or_else(|| MvError::ElfMalformed(format!("missing boundary symbol `{sym_name}`")))?;
            set.insert(sym.st_value);
        }
    }
    Ok(set)
}

fn mark_boundary(view: &mut ElfView, kind: &str, start: u64, stop: u64, bucket: &mut Vec<Rela>) -> Result<()> {
    for (edge, value) in [("start", start), ("stop", stop)] {
        let sym_name = format!("__{edge}___multiverse_{kind}_ptr");
        let sym = view
            .symbol_by_name(&sym_name)
            .ok_or_else(|| MvError::ElfMalformed(format!("missing boundary symbol `{sym_name}`")))?;
        view.write_bytes_at(sym.st_value, &value.to_le_bytes())?;
        bucket.push(reloc(sym.st_value, value));
    }
    Ok(())
}

fn shift_if_past(value: u64, boundary: u64, shrinkage: u64) -> u64 {
    if value >= boundary {
        value - shrinkage
    } else {
        value
    }
}

/// A frozen snapshot of the pre-trim layout, since every new address is
/// computed relative to where things *used* to be.
struct OldLayout {
    shdrs: Vec<SectionHeader>,
    phdrs: Vec<ProgramHeader>,
    mvdata: Option<SectionHeader>,
    mvfn: SectionHeader,
    mvvar: SectionHeader,
    mvcs: Option<SectionHeader>,
    data: SectionHeader,
    mvtext: Option<SectionHeader>,
    area_offset: u64,
    area_end: u64,
    load_idx: usize,
}

impl OldLayout {
    fn capture(view: &ElfView, layout: &Layout) -> Result<OldLayout> {
        let shdrs = view.shdrs();
        let phdrs = view.phdrs();
        let mvdata = layout.mvdata.map(|i| shdrs[i]);
        let mvfn = layout.mvfn.map(|i| shdrs[i]).unwrap_or_default();
        let mvvar = shdrs[layout.mvvar];
        let mvcs = layout.mvcs.map(|i| shdrs[i]);
        let data = shdrs[layout.data];
        let mvtext = layout.mvtext.map(|i| shdrs[i]);
        let bss = shdrs[layout.bss];

        let mut candidates = vec![mvvar.sh_offset];
        if let Some(s) = mvdata {
            candidates.push(s.sh_offset);
        }
        if layout.mvfn.is_some() {
            candidates.push(mvfn.sh_offset);
        }
        if let Some(s) = mvcs {
            candidates.push(s.sh_offset);
        }
        let area_offset = *candidates.iter().min().unwrap();
        let area_end = bss.sh_offset;

        let load_idx = (0..phdrs.len())
            .find(|&i| phdrs[i].contains_offset(area_offset))
            .ok_or_else(|| {
                MvError::LayoutViolation("multiverse metadata area is not inside any PT_LOAD segment".into())
            })?;
        if phdrs[load_idx].p_offset + phdrs[load_idx].p_filesz != area_end {
            return Err(MvError::LayoutViolation(
                ".bss does not occupy the host LOAD segment's file-size tail".into(),
            ));
        }

        Ok(OldLayout {
            shdrs,
            phdrs,
            mvdata,
            mvfn,
            mvvar,
            mvcs,
            data,
            mvtext,
            area_offset,
            area_end,
            load_idx,
        })
    }

    /// mvdata, if present, always leads the regenerated area; otherwise
    /// mvfn (which in turn defers to mvvar when there are no functions at
    /// all) leads it.
    fn area_offset_vaddr(&self) -> u64 {
        self.mvdata.map(|s| s.sh_addr).unwrap_or_else(|| {
            if self.mvfn.sh_addr != 0 {
                self.mvfn.sh_addr
            } else {
                self.mvvar.sh_addr
            }
        })
    }
}
