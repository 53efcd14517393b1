//! End-to-end tests driving `mvtail::run` over a minimal, hand-built ELF
//! image rather than a checked-in binary, since no real multiverse-compiled
//! executable is available to this repository. The fixture mirrors the
//! on-disk layout a real build of the companion compiler plug-in would
//! produce: one tracked variable `config`, one function `func` with two
//! variants (NOP and CONSTANT(42)), and one direct-call patchpoint besides
//! the synthetic jump at `func`'s own body.

use mvtail::elf::raw::{
    DynEntry, ProgramHeader, Rela, SectionHeader, DT_NULL, DT_RELACOUNT, DT_RELASZ, ET_EXEC, PT_LOAD,
    R_X86_64_RELATIVE, SHT_NOBITS, SHT_RELA,
};
use mvtail::graph::raw::{RawAssignment, RawCallsite, RawFn, RawMvfn, RawMvfnKind, RawVar, ASSIGNMENT_SIZE, CALLSITE_SIZE, FN_SIZE, MVFN_SIZE, VAR_SIZE};

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const SHF_ALLOC: u64 = 2;
const BASE: u64 = 0x10000;

struct StrTab {
    buf: Vec<u8>,
}

impl StrTab {
    fn new() -> Self {
        StrTab { buf: vec![0] }
    }

    fn push(&mut self, s: &str) -> u32 {
        let off = self.buf.len() as u32;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        off
    }
}

struct Section {
    name: String,
    sh_type: u32,
    sh_flags: u64,
    sh_addr: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_info: u32,
    sh_entsize: u64,
}

struct Fixture {
    buf: Vec<u8>,
    sections: Vec<Section>,
}

impl Fixture {
    fn new() -> Self {
        // Reserve space for the ELF header and one program header.
        Fixture {
            buf: vec![0u8; 64 + 56],
            sections: Vec::new(),
        }
    }

    fn push_alloc(&mut self, name: &str, sh_type: u32, data: &[u8]) -> (usize, u64) {
        let offset = self.buf.len() as u64;
        let addr = BASE + offset;
        self.buf.extend_from_slice(data);
        let idx = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            sh_type,
            sh_flags: SHF_ALLOC,
            sh_addr: addr,
            sh_offset: offset,
            sh_size: data.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_entsize: 0,
        });
        (idx, addr)
    }

    fn push_nobits(&mut self, name: &str, size: u64) -> (usize, u64) {
        let offset = self.buf.len() as u64;
        let addr = BASE + offset;
        let idx = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            sh_type: SHT_NOBITS,
            sh_flags: SHF_ALLOC,
            sh_addr: addr,
            sh_offset: offset,
            sh_size: size,
            sh_link: 0,
            sh_info: 0,
            sh_entsize: 0,
        });
        (idx, addr)
    }

    fn push_plain(&mut self, name: &str, sh_type: u32, data: &[u8], link: u32, info: u32, entsize: u64) -> usize {
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(data);
        let idx = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            sh_type,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: offset,
            sh_size: data.len() as u64,
            sh_link: link,
            sh_info: info,
            sh_entsize: entsize,
        });
        idx
    }

    fn data_mut_at(&mut self, addr_to_off: impl Fn(u64) -> u64, addr: u64, bytes: &[u8]) {
        let off = addr_to_off(addr) as usize;
        self.buf[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn finish(mut self, phdr_filesz: u64, phdr_memsz: u64, e_shstrndx: u16) -> Vec<u8> {
        let e_shoff = self.buf.len() as u64;
        let e_shnum = self.sections.len() as u16;

        // Section header table.
        let mut shdr_bytes = Vec::new();
        for s in &self.sections {
            // sh_name is patched in by the caller before calling finish();
            // here we just assume the caller already wrote names into a
            // shstrtab section and stashed offsets via `name` as a decimal
            // string workaround is unnecessary: we instead look up the name
            // offset from the shstrtab contents directly.
            let shstrtab = &self.sections[e_shstrndx as usize];
            let shstrtab_bytes = &self.buf[shstrtab.sh_offset as usize..(shstrtab.sh_offset + shstrtab.sh_size) as usize];
            let sh_name = find_str_offset(shstrtab_bytes, &s.name);
            let sh = SectionHeader {
                sh_name,
                sh_type: s.sh_type,
                sh_flags: s.sh_flags,
                sh_addr: s.sh_addr,
                sh_offset: s.sh_offset,
                sh_size: s.sh_size,
                sh_link: s.sh_link,
                sh_info: s.sh_info,
                sh_addralign: 1,
                sh_entsize: s.sh_entsize,
            };
            let off = shdr_bytes.len();
            shdr_bytes.resize(off + 64, 0);
            sh.write(&mut shdr_bytes, off);
        }
        self.buf.extend_from_slice(&shdr_bytes);

        // Program header: one PT_LOAD covering [0, phdr_filesz).
        let ph = ProgramHeader {
            p_type: PT_LOAD,
            p_flags: 7,
            p_offset: 0,
            p_vaddr: BASE,
            p_paddr: BASE,
            p_filesz: phdr_filesz,
            p_memsz: phdr_memsz,
            p_align: 0x1000,
        };
        ph.write(&mut self.buf, 64);

        // ELF header.
        let mut e = [0u8; 64];
        e[0..4].copy_from_slice(b"\x7fELF");
        e[4] = 2; // ELFCLASS64
        e[5] = 1; // ELFDATA2LSB
        e[6] = 1; // EV_CURRENT
        mvtail::elf::raw::set_u16(&mut e, 16, ET_EXEC);
        mvtail::elf::raw::set_u16(&mut e, 18, 0x3e); // EM_X86_64
        mvtail::elf::raw::set_u32(&mut e, 20, 1);
        mvtail::elf::raw::set_u64(&mut e, 24, BASE); // e_entry (unused by us)
        mvtail::elf::raw::set_u64(&mut e, 32, 64); // e_phoff
        mvtail::elf::raw::set_u64(&mut e, 40, e_shoff);
        mvtail::elf::raw::set_u16(&mut e, 52, 64); // e_ehsize
        mvtail::elf::raw::set_u16(&mut e, 54, 56); // e_phentsize
        mvtail::elf::raw::set_u16(&mut e, 56, 1); // e_phnum
        mvtail::elf::raw::set_u16(&mut e, 58, 64); // e_shentsize
        mvtail::elf::raw::set_u16(&mut e, 60, e_shnum); // e_shnum
        mvtail::elf::raw::set_u16(&mut e, 62, e_shstrndx); // e_shstrndx
        self.buf[0..64].copy_from_slice(&e);

        self.buf
    }
}

fn find_str_offset(strtab: &[u8], needle: &str) -> u32 {
    let needle = needle.as_bytes();
    let mut i = 0;
    while i + needle.len() <= strtab.len() {
        if &strtab[i..i + needle.len()] == needle
            && (i + needle.len() == strtab.len() || strtab[i + needle.len()] == 0)
            && (i == 0 || strtab[i - 1] == 0)
        {
            return i as u32;
        }
        i += 1;
    }
    panic!("name `{}` not found in string table", String::from_utf8_lossy(needle));
}

/// Builds the fixture described at the top of this file. `config_value` is
/// the variable's initial 4-byte value in `.data`.
fn build(config_value: u32) -> Vec<u8> {
    let mut f = Fixture::new();

    // .text: func's original body (5 bytes, never decoded) then a direct
    // call site (E8 <disp32>) that targets it, with room to spare.
    let (text_idx, text_addr) = f.push_alloc(".text", SHT_PROGBITS, &[0u8; 16]);
    let func_body = text_addr;
    let callsite_addr = text_addr + 8;

    // .rodata: interned names.
    let mut rodata_bytes = Vec::new();
    rodata_bytes.extend_from_slice(b"config\0");
    let func_name_rel = rodata_bytes.len();
    rodata_bytes.extend_from_slice(b"func\0");
    let (_, rodata_addr) = f.push_alloc(".rodata", SHT_PROGBITS, &rodata_bytes);
    let config_name_addr = rodata_addr;
    let func_name_addr = rodata_addr + func_name_rel as u64;

    // __multiverse_text_: variant bodies.
    let mtext_bytes = [
        0xc3, 0x90, 0x90, 0x90, 0x90, 0x90, // variant 0: NOP (bare ret)
        0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3, // variant 1: CONSTANT(42)
    ];
    let (_, mtext_addr) = f.push_alloc("__multiverse_text_", SHT_PROGBITS, &mtext_bytes);
    let variant0_body = mtext_addr;
    let variant1_body = mtext_addr + 6;

    // .data: the `config` word, then six boundary pointer words.
    let mut data_bytes = vec![0u8; 8];
    data_bytes[0..4].copy_from_slice(&config_value.to_le_bytes());
    data_bytes.extend_from_slice(&[0u8; 48]);
    let (data_idx, data_addr) = f.push_alloc(".data", SHT_PROGBITS, &data_bytes);
    let config_addr = data_addr;
    let start_var_addr = data_addr + 8;
    let stop_var_addr = data_addr + 16;
    let start_fn_addr = data_addr + 24;
    let stop_fn_addr = data_addr + 32;
    let start_cs_addr = data_addr + 40;
    let stop_cs_addr = data_addr + 48;

    // __multiverse_data_: two Mvfn records, then their one-assignment arrays.
    let mvdata_vaddr_placeholder = BASE + f.buf.len() as u64;
    let assign0_addr = mvdata_vaddr_placeholder + 2 * MVFN_SIZE as u64;
    let assign1_addr = assign0_addr + ASSIGNMENT_SIZE as u64;
    let mvfn0 = RawMvfn {
        function_body: variant0_body,
        n_assignments: 1,
        assignments: assign0_addr,
        kind: RawMvfnKind::Nop,
        constant: 0,
    };
    let mvfn1 = RawMvfn {
        function_body: variant1_body,
        n_assignments: 1,
        assignments: assign1_addr,
        kind: RawMvfnKind::Constant,
        constant: 42,
    };
    let assign0 = RawAssignment {
        location: config_addr,
        lower: 0,
        upper: 0,
    };
    let assign1 = RawAssignment {
        location: config_addr,
        lower: 1,
        upper: 1,
    };
    let mut mvdata_bytes = vec![0u8; 2 * MVFN_SIZE + 2 * ASSIGNMENT_SIZE];
    mvfn0.write(&mut mvdata_bytes, 0);
    mvfn1.write(&mut mvdata_bytes, MVFN_SIZE);
    assign0.write(&mut mvdata_bytes, 2 * MVFN_SIZE);
    assign1.write(&mut mvdata_bytes, 2 * MVFN_SIZE + ASSIGNMENT_SIZE);
    let (_, mvdata_addr) = f.push_alloc("__multiverse_data_", SHT_PROGBITS, &mvdata_bytes);
    assert_eq!(mvdata_addr, mvdata_vaddr_placeholder, "mvdata address must match the value baked into the records");
    let mv_functions_addr = mvdata_addr;

    // __multiverse_fn_: one RawFn record.
    let rawfn = RawFn {
        name: func_name_addr,
        function_body: func_body,
        n_mv_functions: 2,
        mv_functions: mv_functions_addr,
        patchpoints_head: 0,
        active_mvfn: 0,
    };
    let mut mvfn_section_bytes = vec![0u8; FN_SIZE];
    rawfn.write(&mut mvfn_section_bytes, 0);
    let (_, mvfn_section_addr) = f.push_alloc("__multiverse_fn_", SHT_PROGBITS, &mvfn_section_bytes);

    // __multiverse_var_: one RawVar record.
    let rawvar = RawVar {
        name: config_name_addr,
        variable_location: config_addr,
        info_bits: RawVar::pack(4, true, false, true),
        functions_head: 0,
    };
    let mut mvvar_section_bytes = vec![0u8; VAR_SIZE];
    rawvar.write(&mut mvvar_section_bytes, 0);
    let (_, mvvar_section_addr) = f.push_alloc("__multiverse_var_", SHT_PROGBITS, &mvvar_section_bytes);

    // __multiverse_callsite_: one RawCallsite record.
    let rawcs = RawCallsite {
        function_body: func_body,
        call_label: callsite_addr,
    };
    let mut mvcs_section_bytes = vec![0u8; CALLSITE_SIZE];
    rawcs.write(&mut mvcs_section_bytes, 0);
    let (_, mvcs_section_addr) = f.push_alloc("__multiverse_callsite_", SHT_PROGBITS, &mvcs_section_bytes);

    // The callsite's actual bytes: a direct call to func_body.
    let disp = (func_body as i64 - (callsite_addr as i64 + 5)) as i32;
    let mut call_bytes = vec![0xe8];
    call_bytes.extend_from_slice(&disp.to_le_bytes());
    f.data_mut_at(|addr| addr - BASE, callsite_addr, &call_bytes);

    // Boundary words, initially pointing at the mv sections' current extents.
    let boundaries: [(u64, u64, u64); 3] = [
        (start_var_addr, mvvar_section_addr, mvvar_section_addr + VAR_SIZE as u64),
        (start_fn_addr, mvfn_section_addr, mvfn_section_addr + FN_SIZE as u64),
        (start_cs_addr, mvcs_section_addr, mvcs_section_addr + CALLSITE_SIZE as u64),
    ];
    for (start_addr, start_val, stop_val) in boundaries {
        f.data_mut_at(|addr| addr - BASE, start_addr, &start_val.to_le_bytes());
    }
    f.data_mut_at(|addr| addr - BASE, stop_var_addr, &(mvvar_section_addr + VAR_SIZE as u64).to_le_bytes());
    f.data_mut_at(|addr| addr - BASE, stop_fn_addr, &(mvfn_section_addr + FN_SIZE as u64).to_le_bytes());
    f.data_mut_at(|addr| addr - BASE, stop_cs_addr, &(mvcs_section_addr + CALLSITE_SIZE as u64).to_le_bytes());

    // .bss: a small unrelated zero-fill region.
    let (bss_idx, _bss_addr) = f.push_nobits(".bss", 16);
    let phdr_filesz = f.buf.len() as u64;
    let phdr_memsz = phdr_filesz + 16;

    // Relocations: one R_X86_64_RELATIVE per pointer field we wrote, plus
    // one address the trim pass should pass through untouched.
    let mut relas = vec![
        rela(config_name_addr, config_name_addr),
        rela(data_addr + 8, config_addr), // unused sentinel kept simple below
    ];
    relas.clear();
    relas.push(rela(mvvar_section_addr, config_name_addr));
    relas.push(rela(mvvar_section_addr + 8, config_addr));
    relas.push(rela(mvfn_section_addr, func_name_addr));
    relas.push(rela(mvfn_section_addr + 8, func_body));
    relas.push(rela(mvfn_section_addr + 20, mv_functions_addr));
    relas.push(rela(mvdata_addr, variant0_body));
    relas.push(rela(mvdata_addr + 12, assign0_addr));
    relas.push(rela(mvdata_addr + MVFN_SIZE as u64, variant1_body));
    relas.push(rela(mvdata_addr + MVFN_SIZE as u64 + 12, assign1_addr));
    relas.push(rela(assign0_addr, config_addr));
    relas.push(rela(assign1_addr, config_addr));
    relas.push(rela(mvcs_section_addr, func_body));
    relas.push(rela(mvcs_section_addr + 8, callsite_addr));
    relas.push(rela(start_var_addr, mvvar_section_addr));
    relas.push(rela(stop_var_addr, mvvar_section_addr + VAR_SIZE as u64));
    relas.push(rela(start_fn_addr, mvfn_section_addr));
    relas.push(rela(stop_fn_addr, mvfn_section_addr + FN_SIZE as u64));
    relas.push(rela(start_cs_addr, mvcs_section_addr));
    relas.push(rela(stop_cs_addr, mvcs_section_addr + CALLSITE_SIZE as u64));
    relas.push(rela(0xdead_0000, 0)); // unclaimed: targets no known section

    let mut rela_bytes = vec![0u8; relas.len() * 24];
    for (i, r) in relas.iter().enumerate() {
        r.write(&mut rela_bytes, i * 24);
    }

    let mut dyn_bytes = vec![0u8; 3 * 16];
    DynEntry { d_tag: DT_RELASZ, d_val: rela_bytes.len() as u64 }.write(&mut dyn_bytes, 0);
    DynEntry { d_tag: DT_RELACOUNT, d_val: relas.len() as u64 }.write(&mut dyn_bytes, 16);
    DynEntry { d_tag: DT_NULL, d_val: 0 }.write(&mut dyn_bytes, 32);
    let dynamic_idx = f.push_plain(".dynamic", SHT_DYNAMIC, &dyn_bytes, 0, 0, 16);

    let rela_idx = f.push_plain(".rela.dyn", SHT_RELA, &rela_bytes, 0, 0, 24);

    // .symtab / .strtab.
    let mut strtab = StrTab::new();
    let mut syms = Vec::new();
    let sym_entries: &[(&str, u64, u64, u16)] = &[
        ("__start___multiverse_var_ptr", start_var_addr, 0, data_idx as u16),
        ("__stop___multiverse_var_ptr", stop_var_addr, 0, data_idx as u16),
        ("__start___multiverse_fn_ptr", start_fn_addr, 0, data_idx as u16),
        ("__stop___multiverse_fn_ptr", stop_fn_addr, 0, data_idx as u16),
        ("__start___multiverse_callsite_ptr", start_cs_addr, 0, data_idx as u16),
        ("__stop___multiverse_callsite_ptr", stop_cs_addr, 0, data_idx as u16),
        ("func", func_body, 5, text_idx as u16),
        ("func$mv0", variant0_body, 6, 0 /* patched below */),
        ("func$mv1", variant1_body, 6, 0 /* patched below */),
    ];
    let mtext_idx = 2; // third section pushed, see build() order
    for &(name, value, size, shndx) in sym_entries {
        let shndx = if name.starts_with("func$mv") { mtext_idx } else { shndx };
        let name_off = strtab.push(name);
        syms.push(mvtail::elf::raw::Sym {
            st_name: name_off,
            st_info: 0,
            st_other: 0,
            st_shndx: shndx,
            st_value: value,
            st_size: size,
        });
    }
    let mut sym_bytes = vec![0u8; syms.len() * 24];
    for (i, s) in syms.iter().enumerate() {
        s.write(&mut sym_bytes, i * 24);
    }
    let strtab_idx_placeholder = f.sections.len() + 1; // .symtab pushed first, then .strtab
    let symtab_idx = f.push_plain(".symtab", SHT_SYMTAB, &sym_bytes, strtab_idx_placeholder as u32, 0, 24);
    let strtab_idx = f.push_plain(".strtab", SHT_STRTAB, &strtab.buf, 0, 0, 0);
    assert_eq!(strtab_idx, strtab_idx_placeholder);
    let _ = symtab_idx;
    let _ = dynamic_idx;
    let _ = rela_idx;
    let _ = bss_idx;

    // .shstrtab: section names, built last since it must include its own name.
    let mut shstrtab = StrTab::new();
    for s in &f.sections {
        shstrtab.push(&s.name);
    }
    shstrtab.push(".shstrtab");
    let shstrtab_idx = f.push_plain(".shstrtab", SHT_STRTAB, &shstrtab.buf, 0, 0, 0);

    f.finish(phdr_filesz, phdr_memsz, shstrtab_idx as u16)
}

fn rela(offset: u64, addend: u64) -> Rela {
    Rela {
        r_offset: offset,
        r_sym: 0,
        r_type: R_X86_64_RELATIVE,
        r_addend: addend as i64,
    }
}

#[test]
fn simple_commit_selects_nop_variant_and_patches_jump() {
    let bytes = build(0);
    let view = mvtail::elf::view::ElfView::parse(bytes).unwrap();
    let mut graph = mvtail::graph::build_graph(&view).unwrap();
    assert_eq!(graph.vars.len(), 1);
    assert_eq!(graph.fns.len(), 1);
    assert_eq!(graph.fns[0].variants.len(), 2);

    let mut view = view;
    let opts = mvtail::commit::CommitOptions {
        changes: vec![("config".to_string(), 0)],
        applies: vec![],
        apply_all: true,
        guard: false,
    };
    let summary = mvtail::commit::commit(&mut view, &mut graph, &opts).unwrap();
    assert_eq!(summary.vars_frozen, 1);
    assert_eq!(summary.fns_frozen, 1);
    assert!(graph.fns[0].frozen);

    let func_body = graph.fns[0].body;
    let patched = view.bytes_at(func_body, 5).unwrap();
    assert_eq!(patched[0], 0xe9, "the synthetic jump must become E9 <disp32>");
}

#[test]
fn commit_with_guard_poisons_unselected_variants() {
    let bytes = build(1);
    let view = mvtail::elf::view::ElfView::parse(bytes).unwrap();
    let mut graph = mvtail::graph::build_graph(&view).unwrap();
    let mut view = view;
    let opts = mvtail::commit::CommitOptions {
        changes: vec![],
        applies: vec![],
        apply_all: true,
        guard: true,
    };
    mvtail::commit::commit(&mut view, &mut graph, &opts).unwrap();

    let variant0_body = graph.fns[0].variants[0].body;
    let poisoned = view.bytes_at(variant0_body, 6).unwrap();
    assert!(poisoned.iter().all(|&b| b == 0xcc), "the non-selected variant must be fully poisoned");
}

#[test]
fn trim_shrinks_file_and_grows_bss_by_exactly_the_shrinkage() {
    let bytes = build(1);
    let view = mvtail::elf::view::ElfView::parse(bytes).unwrap();
    let mut graph = mvtail::graph::build_graph(&view).unwrap();
    let mut view = view;
    let opts = mvtail::commit::CommitOptions {
        changes: vec![],
        applies: vec![],
        apply_all: true,
        guard: false,
    };
    mvtail::commit::commit(&mut view, &mut graph, &opts).unwrap();

    let bss_idx = view.section_index_by_name(".bss").unwrap();
    let old_bss_size = view.shdr(bss_idx).sh_size;

    let summary = mvtail::trim::trim(&mut view, &graph).unwrap();
    assert_eq!(summary.vars_kept, 0, "the only variable was frozen by -A");
    assert_eq!(summary.fns_kept, 0, "the only function was frozen by -A");

    let new_bss_size = view.shdr(bss_idx).sh_size;
    assert_eq!(new_bss_size - old_bss_size, summary.shrinkage);
}

#[test]
fn unknown_variable_is_a_warning_not_a_failure() {
    let bytes = build(0);
    let view = mvtail::elf::view::ElfView::parse(bytes).unwrap();
    let mut graph = mvtail::graph::build_graph(&view).unwrap();
    let mut view = view;
    let opts = mvtail::commit::CommitOptions {
        changes: vec![("nosuch".to_string(), 1)],
        applies: vec![],
        apply_all: false,
        guard: false,
    };
    let summary = mvtail::commit::commit(&mut view, &mut graph, &opts).unwrap();
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(summary.vars_frozen, 0);
}

#[test]
fn boundary_words_match_new_section_extents_after_trim() {
    let bytes = build(5); // neither assignment range matches: func stays unfrozen
    let view = mvtail::elf::view::ElfView::parse(bytes).unwrap();
    let graph = mvtail::graph::build_graph(&view).unwrap();
    let mut view = view;

    mvtail::trim::trim(&mut view, &graph).unwrap();

    let mvvar_idx = view.section_index_by_name("__multiverse_var_").unwrap();
    let new_extent_end = view.shdr(mvvar_idx).sh_addr + view.shdr(mvvar_idx).sh_size;
    let stop_sym = view.symbol_by_name("__stop___multiverse_var_ptr").unwrap();
    let word = view.bytes_at(stop_sym.st_value, 8).unwrap();
    let stored = u64::from_le_bytes(word.try_into().unwrap());
    assert_eq!(stored, new_extent_end);
}

#[test]
fn full_driver_round_trip_with_no_changes_is_observationally_stable() {
    let bytes = build(0);
    let dir = tempfile::tempdir().unwrap();
    let infile = dir.path().join("in.elf");
    std::fs::write(&infile, &bytes).unwrap();

    let opts = mvtail::RunOptions { commit: None, trim: false };
    let (out_bytes, summary) = mvtail::run(&infile, &opts).unwrap();
    assert!(summary.commit.is_none());
    assert!(summary.trim.is_none());
    assert_eq!(out_bytes, bytes, "a no-op run must not mutate any bytes");
}
