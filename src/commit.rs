//! The Commit Engine: freeze variables, pick the active variant per
//! function, and patch every associated patchpoint.

use tracing::{debug, info, warn};

use crate::arch::{self, CallsiteKind};
use crate::elf::view::ElfView;
use crate::error::Result;
use crate::graph::{FnId, MvGraph, PatchpointKind, VarId};

pub struct CommitOptions {
    pub changes: Vec<(String, i64)>,
    pub applies: Vec<String>,
    pub apply_all: bool,
    pub guard: bool,
}

#[derive(Debug, Default)]
pub struct CommitSummary {
    pub vars_frozen: usize,
    pub fns_frozen: usize,
    pub patchpoints_patched: usize,
    pub warnings: Vec<String>,
}

pub fn commit(view: &mut ElfView, graph: &mut MvGraph, opts: &CommitOptions) -> Result<CommitSummary> {
    let mut summary = CommitSummary::default();

    let data_idx = view
        .section_index_by_name(".data")
        .expect("build_graph already required .data to exist");

    for (name, value) in &opts.changes {
        let Some(vid) = graph.var_by_name(name) else {
            let msg = format!("unknown variable `{name}` in -s, change ignored");
            warn!("{msg}");
            summary.warnings.push(msg);
            continue;
        };
        let width = graph.vars[vid.0].width;
        let bytes = (*value as u64).to_le_bytes();
        view.write_section_bytes(
            data_idx,
            (graph.vars[vid.0].address - view.shdr(data_idx).sh_addr) as usize,
            &bytes[..width as usize],
        )?;
        graph.vars[vid.0].value = mask_to_width(*value as u64, width);
        debug!(var = name, value, "committed change");
    }

    let to_freeze: Vec<VarId> = if opts.apply_all {
        (0..graph.vars.len()).map(VarId).collect()
    } else {
        let mut ids = Vec::new();
        for name in &opts.applies {
            match graph.var_by_name(name) {
                Some(vid) => ids.push(vid),
                None => {
                    let msg = format!("unknown variable `{name}` in -a, apply ignored");
                    warn!("{msg}");
                    summary.warnings.push(msg);
                }
            }
        }
        ids
    };

    for vid in to_freeze {
        if graph.vars[vid.0].frozen {
            continue;
        }
        graph.vars[vid.0].frozen = true;
        summary.vars_frozen += 1;
        for i in 0..graph.fns.len() {
            let fid = FnId(i);
            if graph.fns[fid.0].frozen {
                continue;
            }
            if !fn_depends_on(graph, fid, vid) {
                continue;
            }
            patch_fn(view, graph, fid, opts.guard, &mut summary)?;
        }
    }

    info!(
        vars_frozen = summary.vars_frozen,
        fns_frozen = summary.fns_frozen,
        patchpoints_patched = summary.patchpoints_patched,
        "commit complete"
    );
    Ok(summary)
}

fn fn_depends_on(graph: &MvGraph, fid: FnId, vid: VarId) -> bool {
    graph.fns[fid.0]
        .variants
        .iter()
        .any(|mv| mv.assigns.iter().any(|a| a.var == vid))
}

fn patch_fn(
    view: &mut ElfView,
    graph: &mut MvGraph,
    fid: FnId,
    guard: bool,
    summary: &mut CommitSummary,
) -> Result<()> {
    let selected = graph.fns[fid.0]
        .variants
        .iter()
        .position(|mv| mv.is_active(&graph.vars));
    let Some(sel_idx) = selected else {
        debug!(func = graph.fns[fid.0].name, "no variant satisfied yet, left unfrozen");
        return Ok(());
    };

    if guard {
        poison_other_variants(view, graph, fid, sel_idx)?;
    }

    let variant = graph.fns[fid.0].variants[sel_idx].clone();
    let patchpoint_idxs = graph.fns[fid.0].patchpoints.clone();
    for pp_idx in patchpoint_idxs {
        let pp = graph.patchpoints[pp_idx].clone();
        let bytes = match pp.kind {
            PatchpointKind::Jump => arch::emit_jump(pp.addr, variant.body).to_vec(),
            PatchpointKind::Call | PatchpointKind::IndirectCall => {
                let call_kind = if pp.kind == PatchpointKind::IndirectCall {
                    CallsiteKind::IndirectCall
                } else {
                    CallsiteKind::Call
                };
                arch::emit_patched_callsite(call_kind, pp.addr, variant.kind, variant.body)
            }
        };
        view.write_bytes_at(pp.addr, &bytes)?;
        summary.patchpoints_patched += 1;
    }

    graph.fns[fid.0].frozen = true;
    summary.fns_frozen += 1;
    info!(
        func = %graph.fns[fid.0].name,
        variant_body = format_args!("0x{:x}", variant.body),
        "function committed"
    );
    Ok(())
}

/// Poison every variant body (and the generic body) other than the selected
/// one with `0xCC` bytes, sized by that body's declared symbol size when one
/// exists. A body with no matching symbol is left untouched and a warning
/// is recorded, since there's no well-defined poison length without one.
fn poison_other_variants(
    view: &mut ElfView,
    graph: &MvGraph,
    fid: FnId,
    selected: usize,
) -> Result<()> {
    let symbols = view.symbols();
    let f = &graph.fns[fid.0];
    let mut targets: Vec<u64> = f
        .variants
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != selected)
        .map(|(_, mv)| mv.body)
        .collect();
    targets.push(f.body);

    for addr in targets {
        if let Some((_, sym)) = symbols.iter().find(|(_, s)| s.st_value == addr) {
            if sym.st_size > 0 {
                let poison = vec![0xccu8; sym.st_size as usize];
                view.write_bytes_at(addr, &poison)?;
            }
        }
    }
    Ok(())
}

fn mask_to_width(v: u64, width: u8) -> u64 {
    if width >= 8 {
        v
    } else {
        v & ((1u64 << (8 * width as u32)) - 1)
    }
}
