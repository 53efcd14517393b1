//! Strongly-typed per-section wrappers.
//!
//! Each wrapper pins a section index inside an `ElfView` and accumulates the
//! `.rela.dyn` entries it "owns" — the ones whose `r_offset` lands inside
//! its own span. Trim concatenates the owned lists back into `.rela.dyn` in
//! a fixed order instead of re-deriving ownership from scratch every time.

use crate::elf::raw::Rela;
use crate::elf::view::ElfView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Rodata,
    Data,
    Text,
    Bss,
    Dynamic,
    MvVar,
    MvFn,
    MvCallsite,
    MvData,
    MvText,
}

impl SectionKind {
    pub fn section_name(self) -> &'static str {
        match self {
            SectionKind::Rodata => ".rodata",
            SectionKind::Data => ".data",
            SectionKind::Text => ".text",
            SectionKind::Bss => ".bss",
            SectionKind::Dynamic => ".dynamic",
            SectionKind::MvVar => "__multiverse_var_",
            SectionKind::MvFn => "__multiverse_fn_",
            SectionKind::MvCallsite => "__multiverse_callsite_",
            SectionKind::MvData => "__multiverse_data_",
            SectionKind::MvText => "__multiverse_text_",
        }
    }

    pub fn required(self) -> bool {
        matches!(
            self,
            SectionKind::Rodata
                | SectionKind::Data
                | SectionKind::Text
                | SectionKind::Bss
                | SectionKind::Dynamic
                | SectionKind::MvVar
        )
    }
}

pub struct SectionWrapper {
    pub kind: SectionKind,
    pub idx: usize,
    owned_relocs: Vec<Rela>,
}

impl SectionWrapper {
    pub fn new(kind: SectionKind, idx: usize) -> Self {
        SectionWrapper {
            kind,
            idx,
            owned_relocs: Vec::new(),
        }
    }

    pub fn contains(&self, view: &ElfView, addr: u64) -> bool {
        view.addr_in_section(addr, self.idx)
    }

    /// Record `rela` as belonging to this section iff its target offset
    /// falls inside the section's virtual range. Returns whether it was
    /// claimed so callers can fall through to "unclaimed" bookkeeping.
    pub fn claim_reloc(&mut self, view: &ElfView, rela: Rela) -> bool {
        if self.contains(view, rela.r_offset) {
            self.owned_relocs.push(rela);
            true
        } else {
            false
        }
    }

    pub fn owned_relocs(&self) -> &[Rela] {
        &self.owned_relocs
    }
}
