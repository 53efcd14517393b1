//! Driver orchestration: load an ELF image, build the multiverse graph,
//! optionally commit and/or trim it, and hand back the bytes to write
//! plus a human-readable summary.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::commit::{self, CommitOptions, CommitSummary};
use crate::elf::view::ElfView;
use crate::error::{MvError, Result};
use crate::graph::{self, MvGraph};
use crate::trim::{self, TrimSummary};

pub struct RunOptions {
    pub commit: Option<CommitOptions>,
    pub trim: bool,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub commit: Option<CommitSummary>,
    pub trim: Option<TrimSummary>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.commit {
            writeln!(
                f,
                "commit: {} variable(s) frozen, {} function(s) frozen, {} patchpoint(s) patched",
                c.vars_frozen, c.fns_frozen, c.patchpoints_patched
            )?;
            for w in &c.warnings {
                writeln!(f, "  warning: {w}")?;
            }
        }
        if let Some(t) = &self.trim {
            writeln!(
                f,
                "trim: {} byte(s) reclaimed, {} variable(s)/{} function(s)/{} callsite(s) kept",
                t.shrinkage, t.vars_kept, t.fns_kept, t.callsites_kept
            )?;
        }
        Ok(())
    }
}

/// Load `infile`, build the graph, apply the requested operations, and
/// return the resulting bytes alongside a summary. The caller decides
/// whether (and where) to write the bytes back out — a dry run simply
/// discards them.
pub fn run(infile: &Path, opts: &RunOptions) -> Result<(Vec<u8>, RunSummary)> {
    info!(path = %infile.display(), "loading ELF image");
    let raw = fs::read(infile).map_err(|e| MvError::io(infile, e))?;
    let mut view = ElfView::parse(raw)?;

    let mut graph = graph::build_graph(&view)?;
    debug!(
        vars = graph.vars.len(),
        fns = graph.fns.len(),
        patchpoints = graph.patchpoints.len(),
        "graph built"
    );

    let mut summary = RunSummary::default();

    if let Some(commit_opts) = &opts.commit {
        summary.commit = Some(commit::commit(&mut view, &mut graph, commit_opts)?);
    }

    if opts.trim {
        summary.trim = Some(trim::trim(&mut view, &graph)?);
    }

    Ok((view.into_bytes(), summary))
}
