//! A minimal, mutable ELF64 little-endian image.
//!
//! Everything the rest of the tool needs — section enumeration by name,
//! symbol/relocation iteration, `.dynamic` access, program-header
//! enumeration, and byte-level section mutation — is exposed as plain
//! methods over one owned buffer. There is no separate "dirty" flag per
//! section; every setter here writes straight through to `buf`, and the
//! file is only ever materialized once, at the end of a run, by
//! `ElfView::into_bytes`.

use crate::elf::raw::{self, DynEntry, ProgramHeader, Rela, SectionHeader, Sym};
use crate::error::{MvError, Result};

pub struct ElfView {
    pub buf: Vec<u8>,
    pub e_type: u16,
    pub e_shoff: u64,
    pub e_phoff: u64,
    pub e_shnum: u16,
    pub e_phnum: u16,
    pub e_shstrndx: u16,
}

impl ElfView {
    pub fn parse(buf: Vec<u8>) -> Result<ElfView> {
        if buf.len() < raw::EHDR_SIZE || &buf[0..4] != b"\x7fELF" {
            return Err(MvError::ElfMalformed("missing ELF magic".into()));
        }
        if buf[4] != raw::ELFCLASS64 {
            return Err(MvError::ElfMalformed("not an ELFCLASS64 object".into()));
        }
        if buf[5] != raw::ELFDATA2LSB {
            return Err(MvError::ElfMalformed("not a little-endian object".into()));
        }
        let e_type = raw::get_u16(&buf, 16);
        if e_type != raw::ET_EXEC && e_type != raw::ET_DYN {
            return Err(MvError::ElfMalformed(
                "expected ET_EXEC or ET_DYN (a position-independent multiverse binary)".into(),
            ));
        }
        let e_phoff = raw::get_u64(&buf, 32);
        let e_shoff = raw::get_u64(&buf, 40);
        let e_phnum = raw::get_u16(&buf, 56);
        let e_shnum = raw::get_u16(&buf, 60);
        let e_shstrndx = raw::get_u16(&buf, 62);

        let view = ElfView {
            buf,
            e_type,
            e_shoff,
            e_phoff,
            e_shnum,
            e_phnum,
            e_shstrndx,
        };
        view.check_table_bounds()?;
        Ok(view)
    }

    fn check_table_bounds(&self) -> Result<()> {
        let shend = self.e_shoff as usize + self.e_shnum as usize * raw::SHDR_SIZE;
        if shend > self.buf.len() {
            return Err(MvError::ElfMalformed("section header table truncated".into()));
        }
        let phend = self.e_phoff as usize + self.e_phnum as usize * raw::PHDR_SIZE;
        if phend > self.buf.len() {
            return Err(MvError::ElfMalformed("program header table truncated".into()));
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ---- section headers ----

    pub fn shdr(&self, idx: usize) -> SectionHeader {
        SectionHeader::read(&self.buf, self.e_shoff as usize + idx * raw::SHDR_SIZE)
    }

    pub fn set_shdr(&mut self, idx: usize, sh: &SectionHeader) {
        let off = self.e_shoff as usize + idx * raw::SHDR_SIZE;
        sh.write(&mut self.buf, off);
    }

    pub fn shdrs(&self) -> Vec<SectionHeader> {
        (0..self.e_shnum as usize).map(|i| self.shdr(i)).collect()
    }

    fn shstrtab_offset(&self) -> u64 {
        self.shdr(self.e_shstrndx as usize).sh_offset
    }

    pub fn section_name(&self, idx: usize) -> String {
        let strtab = self.shstrtab_offset() as usize;
        let sh = self.shdr(idx);
        read_cstr(&self.buf, strtab + sh.sh_name as usize)
    }

    pub fn section_names(&self) -> Vec<String> {
        (0..self.e_shnum as usize)
            .map(|i| self.section_name(i))
            .collect()
    }

    pub fn section_index_by_name(&self, name: &str) -> Option<usize> {
        (0..self.e_shnum as usize).find(|&i| self.section_name(i) == name)
    }

    pub fn section_data(&self, idx: usize) -> &[u8] {
        let sh = self.shdr(idx);
        if sh.sh_type == raw::SHT_NOBITS {
            return &[];
        }
        let start = sh.sh_offset as usize;
        let end = start + sh.sh_size as usize;
        &self.buf[start..end]
    }

    /// Overwrite bytes within a section's existing span (never resizes it).
    pub fn write_section_bytes(&mut self, idx: usize, rel_off: usize, data: &[u8]) -> Result<()> {
        let sh = self.shdr(idx);
        if rel_off + data.len() > sh.sh_size as usize {
            return Err(MvError::range(sh.sh_addr + rel_off as u64, self.section_name(idx)));
        }
        let start = sh.sh_offset as usize + rel_off;
        self.buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    // ---- program headers ----

    pub fn phdr(&self, idx: usize) -> ProgramHeader {
        ProgramHeader::read(&self.buf, self.e_phoff as usize + idx * raw::PHDR_SIZE)
    }

    pub fn set_phdr(&mut self, idx: usize, ph: &ProgramHeader) {
        let off = self.e_phoff as usize + idx * raw::PHDR_SIZE;
        ph.write(&mut self.buf, off);
    }

    pub fn phdrs(&self) -> Vec<ProgramHeader> {
        (0..self.e_phnum as usize).map(|i| self.phdr(i)).collect()
    }

    /// The `PT_LOAD` segment whose file-backed region contains `file_off`.
    pub fn load_segment_for_offset(&self, file_off: u64) -> Option<usize> {
        (0..self.e_phnum as usize).find(|&i| self.phdr(i).contains_offset(file_off))
    }

    // ---- address <-> file offset ----

    /// Translate a virtual address to a file offset via whichever section
    /// header claims it. `SHT_NOBITS` (`.bss`) addresses have no backing
    /// file offset and return `None`.
    pub fn addr_to_offset(&self, addr: u64) -> Option<(usize, u64)> {
        for i in 0..self.e_shnum as usize {
            let sh = self.shdr(i);
            if sh.sh_type == raw::SHT_NOBITS {
                continue;
            }
            if sh.contains_addr(addr) {
                return Some((i, sh.sh_offset + (addr - sh.sh_addr)));
            }
        }
        None
    }

    pub fn addr_in_section(&self, addr: u64, idx: usize) -> bool {
        self.shdr(idx).contains_addr(addr)
    }

    pub fn bytes_at(&self, addr: u64, len: usize) -> Result<&[u8]> {
        let (_, off) = self
            .addr_to_offset(addr)
            .ok_or_else(|| MvError::range(addr, "<no section>"))?;
        let off = off as usize;
        self.buf
            .get(off..off + len)
            .ok_or_else(|| MvError::range(addr, "<truncated>"))
    }

    /// Read up to `max_len` bytes at `addr`, clamped to however much of the
    /// enclosing section remains. Used when decoding a variant body that
    /// may legitimately sit fewer than 6 bytes from the end of
    /// `__multiverse_text_`.
    pub fn bytes_at_clamped(&self, addr: u64, max_len: usize) -> Result<&[u8]> {
        let (idx, off) = self
            .addr_to_offset(addr)
            .ok_or_else(|| MvError::range(addr, "<no section>"))?;
        let sh = self.shdr(idx);
        let section_end = sh.sh_offset + sh.sh_size;
        let off = off as usize;
        let avail = (section_end - off as u64) as usize;
        if avail == 0 {
            return Err(MvError::range(addr, self.section_name(idx)));
        }
        let len = max_len.min(avail);
        Ok(&self.buf[off..off + len])
    }

    pub fn write_bytes_at(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let (_, off) = self
            .addr_to_offset(addr)
            .ok_or_else(|| MvError::range(addr, "<no section>"))?;
        let off = off as usize;
        if off + data.len() > self.buf.len() {
            return Err(MvError::range(addr, "<truncated>"));
        }
        self.buf[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn cstr_at(&self, addr: u64) -> Result<String> {
        let (_, off) = self
            .addr_to_offset(addr)
            .ok_or_else(|| MvError::range(addr, "<no section>"))?;
        Ok(read_cstr(&self.buf, off as usize))
    }

    // ---- symbols ----

    fn symtab_section(&self) -> Option<usize> {
        self.section_index_by_name(".symtab")
    }

    pub fn symbols(&self) -> Vec<(String, Sym)> {
        let Some(idx) = self.symtab_section() else {
            return Vec::new();
        };
        let sh = self.shdr(idx);
        let strtab_sh = self.shdr(sh.sh_link as usize);
        let n = sh.sh_size as usize / raw::SYM_SIZE;
        (0..n)
            .map(|i| {
                let off = sh.sh_offset as usize + i * raw::SYM_SIZE;
                let sym = Sym::read(&self.buf, off);
                let name = read_cstr(&self.buf, strtab_sh.sh_offset as usize + sym.st_name as usize);
                (name, sym)
            })
            .collect()
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<Sym> {
        self.symbols().into_iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn set_symbol_value(&mut self, name: &str, value: u64) -> Result<()> {
        let idx = self
            .symtab_section()
            .ok_or_else(|| MvError::ElfMalformed("no .symtab section".into()))?;
        let sh = self.shdr(idx);
        let strtab_sh = self.shdr(sh.sh_link as usize);
        let n = sh.sh_size as usize / raw::SYM_SIZE;
        for i in 0..n {
            let off = sh.sh_offset as usize + i * raw::SYM_SIZE;
            let mut sym = Sym::read(&self.buf, off);
            let sym_name = read_cstr(&self.buf, strtab_sh.sh_offset as usize + sym.st_name as usize);
            if sym_name == name {
                sym.st_value = value;
                sym.write(&mut self.buf, off);
                return Ok(());
            }
        }
        Err(MvError::ElfMalformed(format!("symbol `{name}` not found")))
    }

    /// Adjust the recorded value of every symbol bound to section `shndx`
    /// by `delta` (used when `.bss` slides after trim shrinks a segment).
    pub fn shift_symbols_in_section(&mut self, shndx: u16, delta: i64) -> Result<()> {
        let idx = self
            .symtab_section()
            .ok_or_else(|| MvError::ElfMalformed("no .symtab section".into()))?;
        let sh = self.shdr(idx);
        let n = sh.sh_size as usize / raw::SYM_SIZE;
        for i in 0..n {
            let off = sh.sh_offset as usize + i * raw::SYM_SIZE;
            let mut sym = Sym::read(&self.buf, off);
            if sym.st_shndx == shndx {
                sym.st_value = (sym.st_value as i64 + delta) as u64;
                sym.write(&mut self.buf, off);
            }
        }
        Ok(())
    }

    // ---- relocations ----

    pub fn rela_dyn_index(&self) -> Result<usize> {
        let idx = self
            .section_index_by_name(".rela.dyn")
            .ok_or_else(|| MvError::ElfMalformed("no .rela.dyn section".into()))?;
        let sh = self.shdr(idx);
        if sh.sh_type != raw::SHT_RELA || sh.sh_info != 0 {
            return Err(MvError::ElfMalformed(
                ".rela.dyn is not a SHT_RELA section with sh_info == 0".into(),
            ));
        }
        Ok(idx)
    }

    pub fn rela_dyn(&self) -> Result<Vec<Rela>> {
        let idx = self.rela_dyn_index()?;
        let sh = self.shdr(idx);
        let n = sh.sh_size as usize / raw::RELA_SIZE;
        Ok((0..n)
            .map(|i| Rela::read(&self.buf, sh.sh_offset as usize + i * raw::RELA_SIZE))
            .collect())
    }

    /// Replace the full contents of `.rela.dyn`. The section must have
    /// enough reserved file space (callers rebuild the multiverse area
    /// before this point, and the relocation count only ever shrinks here).
    pub fn set_rela_dyn(&mut self, relas: &[Rela]) -> Result<()> {
        let idx = self.rela_dyn_index()?;
        let mut sh = self.shdr(idx);
        let needed = relas.len() * raw::RELA_SIZE;
        if needed > sh.sh_size as usize {
            return Err(MvError::LayoutViolation(format!(
                ".rela.dyn grew from {} to {needed} bytes, which this tool does not support",
                sh.sh_size
            )));
        }
        let base = sh.sh_offset as usize;
        for (i, r) in relas.iter().enumerate() {
            r.write(&mut self.buf, base + i * raw::RELA_SIZE);
        }
        sh.sh_size = needed as u64;
        self.set_shdr(idx, &sh);
        Ok(())
    }

    // ---- .dynamic ----

    pub fn dynamic_index(&self) -> Option<usize> {
        self.section_index_by_name(".dynamic")
    }

    pub fn dynamic_entries(&self) -> Vec<DynEntry> {
        let Some(idx) = self.dynamic_index() else {
            return Vec::new();
        };
        let sh = self.shdr(idx);
        let n = sh.sh_size as usize / raw::DYN_SIZE;
        (0..n)
            .map(|i| DynEntry::read(&self.buf, sh.sh_offset as usize + i * raw::DYN_SIZE))
            .collect()
    }

    pub fn set_dynamic_value(&mut self, tag: i64, val: u64) -> Result<()> {
        let idx = self
            .dynamic_index()
            .ok_or_else(|| MvError::ElfMalformed("no .dynamic section".into()))?;
        let sh = self.shdr(idx);
        let n = sh.sh_size as usize / raw::DYN_SIZE;
        for i in 0..n {
            let off = sh.sh_offset as usize + i * raw::DYN_SIZE;
            let mut d = DynEntry::read(&self.buf, off);
            if d.d_tag == tag {
                d.d_val = val;
                d.write(&mut self.buf, off);
                return Ok(());
            }
        }
        // DT_RELACOUNT is optional per the Open Questions; tolerate its absence.
        if tag == raw::DT_RELACOUNT {
            return Ok(());
        }
        Err(MvError::ElfMalformed(format!(
            "no .dynamic entry with tag {tag}"
        )))
    }
}

pub fn read_cstr(buf: &[u8], off: usize) -> String {
    let end = buf[off..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| off + p)
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[off..end]).into_owned()
}
