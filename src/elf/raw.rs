//! Little-endian ELF64 wire-format accessors.
//!
//! We need surgical, in-place mutation of an existing ELF image (move a
//! section, rewrite a handful of relocations, patch a symbol's `st_value`)
//! rather than construction of a brand new object file, so we don't reach
//! for `object::write`'s builder API — that's aimed at authoring a fresh
//! object. Instead we read and write fixed-size records directly against an
//! owned byte buffer, using `object::elf`'s format constants (section/
//! segment/relocation type numbers) so the numeric literals in this module
//! match the ones the `object` crate itself uses.

use object::elf;

pub const EHDR_SIZE: usize = 64;
pub const PHDR_SIZE: usize = 56;
pub const SHDR_SIZE: usize = 64;
pub const SYM_SIZE: usize = 24;
pub const RELA_SIZE: usize = 24;
pub const DYN_SIZE: usize = 16;

pub const ET_EXEC: u16 = elf::ET_EXEC;
pub const ET_DYN: u16 = elf::ET_DYN;
pub const ELFCLASS64: u8 = elf::ELFCLASS64;
pub const ELFDATA2LSB: u8 = elf::ELFDATA2LSB;
pub const PT_LOAD: u32 = elf::PT_LOAD;
pub const SHT_RELA: u32 = elf::SHT_RELA;
pub const SHT_NOBITS: u32 = elf::SHT_NOBITS;
pub const R_X86_64_RELATIVE: u32 = elf::R_X86_64_RELATIVE;
pub const DT_NULL: i64 = elf::DT_NULL as i64;
pub const DT_RELASZ: i64 = elf::DT_RELASZ as i64;
pub const DT_RELACOUNT: i64 = elf::DT_RELACOUNT as i64;

#[inline]
pub fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

#[inline]
pub fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

#[inline]
pub fn get_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

#[inline]
pub fn get_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

#[inline]
pub fn get_i64(buf: &[u8], off: usize) -> i64 {
    i64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

#[inline]
pub fn set_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn set_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn set_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn set_i32(buf: &mut [u8], off: usize, v: i32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn set_i64(buf: &mut [u8], off: usize, v: i64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// A decoded ELF section header (`Elf64_Shdr`), copied out of the buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl SectionHeader {
    pub fn read(buf: &[u8], off: usize) -> Self {
        SectionHeader {
            sh_name: get_u32(buf, off),
            sh_type: get_u32(buf, off + 4),
            sh_flags: get_u64(buf, off + 8),
            sh_addr: get_u64(buf, off + 16),
            sh_offset: get_u64(buf, off + 24),
            sh_size: get_u64(buf, off + 32),
            sh_link: get_u32(buf, off + 40),
            sh_info: get_u32(buf, off + 44),
            sh_addralign: get_u64(buf, off + 48),
            sh_entsize: get_u64(buf, off + 56),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u32(buf, off, self.sh_name);
        set_u32(buf, off + 4, self.sh_type);
        set_u64(buf, off + 8, self.sh_flags);
        set_u64(buf, off + 16, self.sh_addr);
        set_u64(buf, off + 24, self.sh_offset);
        set_u64(buf, off + 32, self.sh_size);
        set_u32(buf, off + 40, self.sh_link);
        set_u32(buf, off + 44, self.sh_info);
        set_u64(buf, off + 48, self.sh_addralign);
        set_u64(buf, off + 56, self.sh_entsize);
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        self.sh_addr != 0 && addr >= self.sh_addr && addr < self.sh_addr + self.sh_size
    }
}

/// A decoded ELF program header (`Elf64_Phdr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    pub fn read(buf: &[u8], off: usize) -> Self {
        ProgramHeader {
            p_type: get_u32(buf, off),
            p_flags: get_u32(buf, off + 4),
            p_offset: get_u64(buf, off + 8),
            p_vaddr: get_u64(buf, off + 16),
            p_paddr: get_u64(buf, off + 24),
            p_filesz: get_u64(buf, off + 32),
            p_memsz: get_u64(buf, off + 40),
            p_align: get_u64(buf, off + 48),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u32(buf, off, self.p_type);
        set_u32(buf, off + 4, self.p_flags);
        set_u64(buf, off + 8, self.p_offset);
        set_u64(buf, off + 16, self.p_vaddr);
        set_u64(buf, off + 24, self.p_paddr);
        set_u64(buf, off + 32, self.p_filesz);
        set_u64(buf, off + 40, self.p_memsz);
        set_u64(buf, off + 48, self.p_align);
    }

    pub fn contains_offset(&self, file_off: u64) -> bool {
        self.p_type == PT_LOAD
            && file_off >= self.p_offset
            && file_off < self.p_offset + self.p_filesz
    }
}

/// A decoded symbol table entry (`Elf64_Sym`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Sym {
    pub fn read(buf: &[u8], off: usize) -> Self {
        Sym {
            st_name: get_u32(buf, off),
            st_info: buf[off + 4],
            st_other: buf[off + 5],
            st_shndx: get_u16(buf, off + 6),
            st_value: get_u64(buf, off + 8),
            st_size: get_u64(buf, off + 16),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u32(buf, off, self.st_name);
        buf[off + 4] = self.st_info;
        buf[off + 5] = self.st_other;
        set_u16(buf, off + 6, self.st_shndx);
        set_u64(buf, off + 8, self.st_value);
        set_u64(buf, off + 16, self.st_size);
    }
}

/// A decoded relocation-with-addend entry (`Elf64_Rela`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rela {
    pub r_offset: u64,
    pub r_sym: u32,
    pub r_type: u32,
    pub r_addend: i64,
}

impl Rela {
    pub fn read(buf: &[u8], off: usize) -> Self {
        let info = get_u64(buf, off + 8);
        Rela {
            r_offset: get_u64(buf, off),
            r_sym: (info >> 32) as u32,
            r_type: info as u32,
            r_addend: get_i64(buf, off + 16),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_u64(buf, off, self.r_offset);
        let info = ((self.r_sym as u64) << 32) | (self.r_type as u64);
        set_u64(buf, off + 8, info);
        set_i64(buf, off + 16, self.r_addend);
    }
}

/// A decoded `.dynamic` entry (`Elf64_Dyn`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DynEntry {
    pub d_tag: i64,
    pub d_val: u64,
}

impl DynEntry {
    pub fn read(buf: &[u8], off: usize) -> Self {
        DynEntry {
            d_tag: get_i64(buf, off),
            d_val: get_u64(buf, off + 8),
        }
    }

    pub fn write(&self, buf: &mut [u8], off: usize) {
        set_i64(buf, off, self.d_tag);
        set_u64(buf, off + 8, self.d_val);
    }
}
