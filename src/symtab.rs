// Symbol table construction from LibraryInfo, name resolution and
// function extent estimation.

use crate::macho::{self, LibraryInfo, NlistPrefix, N_SECT, N_STAB, N_TYPE};
use libc::c_char;
use std::ffi::CStr;
use std::mem;

const STUB_PREFIX: &str = "stub_";

/// One resolved symbol. `synthesized` marks entries whose name could not
/// be read from the string table and was stamped out instead.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub table_index: u32,
    pub symbol_index: u32,
    pub address: usize,
    pub name: String,
    pub synthesized: bool,
}

/// Sorted-by-address table of the image's defined, section-relative
/// symbols. Rebuilt wholesale, never mutated in place.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
}

unsafe fn read_at<T: Copy>(addr: usize) -> T {
    std::ptr::read_unaligned(addr as *const T)
}

/// The lookup rule: find the first occurrence of `query` inside the
/// stored name and require it to run exactly to the end. An exact match
/// is the degenerate case; a stored "_foo_impl_Bar" matches a query of
/// "Bar", while "Barbaz" does not. Components downstream depend on this
/// tolerance for mangled and prefixed names.
fn name_matches(stored: &str, query: &str) -> bool {
    if query.len() > stored.len() {
        return false;
    }
    match stored.find(query) {
        Some(pos) => stored.len() - pos == query.len(),
        None => false,
    }
}

impl SymbolTable {
    /// Walks every symbol-table descriptor in `info` and produces the
    /// sorted table. Missing __TEXT/__LINKEDIT segments mean the slides
    /// cannot be computed, which degrades to an empty table.
    pub fn build(info: &LibraryInfo) -> SymbolTable {
        let slides = match info.slides() {
            Some(slides) => slides,
            None => {
                log::warn!("image at {:#x} lacks __TEXT or __LINKEDIT, no symbols", info.base);
                return SymbolTable::default();
            }
        };
        let loader_slide = match info.image_index {
            Some(index) => macho::loaded_image_slide(index) as i64,
            None => 0,
        };
        let stride = info.nlist_stride();

        let mut entries: Vec<SymbolEntry> = Vec::new();
        for (table_index, cmd) in info.symtab_commands.iter().enumerate() {
            let mut entry_addr = info
                .base
                .wrapping_add(cmd.symoff as usize)
                .wrapping_add(slides.file_slide as usize);
            let strtab = info
                .base
                .wrapping_add(cmd.stroff as usize)
                .wrapping_add(slides.file_slide as usize);

            for symbol_index in 0..cmd.nsyms {
                let prefix: NlistPrefix = unsafe { read_at(entry_addr) };
                if prefix.n_type & N_STAB == 0 && prefix.n_type & N_TYPE == N_SECT {
                    let value_addr = entry_addr + mem::size_of::<NlistPrefix>();
                    let value: u64 = if info.is_64bit {
                        unsafe { read_at(value_addr) }
                    } else {
                        unsafe { read_at::<u32>(value_addr) as u64 }
                    };
                    let address = value
                        .wrapping_add(slides.map_slide)
                        .wrapping_add(loader_slide as u64) as usize;

                    let (name, synthesized) = if prefix.n_strx != 0 && prefix.n_strx < cmd.strsize
                    {
                        let raw = (strtab + prefix.n_strx as usize) as *const c_char;
                        let name = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
                        (name, false)
                    } else {
                        // Ordinal counts discovery order, not sort order.
                        (format!("{}{}", STUB_PREFIX, entries.len()), true)
                    };

                    entries.push(SymbolEntry {
                        table_index: table_index as u32,
                        symbol_index,
                        address,
                        name,
                        synthesized,
                    });
                }
                entry_addr += stride;
            }
        }
        entries.sort_by_key(|entry| entry.address);
        SymbolTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SymbolEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    /// First match in address order wins.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| name_matches(&entry.name, name))
            .map(|entry| entry.address)
    }

    /// Upper bound on the function at `addr`: distance to the nearest
    /// strictly greater symbol address. With no greater address the
    /// subtraction wraps around to a very large value; callers see that
    /// as "unbounded" rather than an error.
    pub fn estimate_length(&self, addr: usize) -> usize {
        let mut next = 0usize;
        for entry in &self.entries {
            if entry.address > addr && (next == 0 || entry.address < next) {
                next = entry.address;
            }
        }
        next.wrapping_sub(addr)
    }
}
