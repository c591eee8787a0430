// Image locator and handle lifecycle: loader mapping with local binding,
// manual read-only mmap fallback, lazy introspection and symbol-table
// build, release by mapping kind.

use crate::disasm;
use crate::invoke::FunctionDescriptor;
use crate::macho::{self, LibraryInfo, FAT_CIGAM, FAT_MAGIC};
use crate::symtab::SymbolTable;
use byteorder::{BigEndian, ReadBytesExt};
use std::ffi::CString;
use std::fs::File;

#[cfg(unix)]
use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
#[cfg(not(unix))]
type Library = ();

/// Fixed skip applied when the file starts with a fat/universal magic.
/// Only a single-slice container is handled; the per-architecture fat
/// headers are not parsed.
const FAT_HEADER_SKIP: usize = 0x1000;

/// A loaded or manually mapped binary image. Loader-mapped memory is
/// owned by the platform loader; manual mappings are owned here and
/// released with munmap.
pub struct ImageHandle {
    path: String,
    loader_handle: Option<Library>,
    base: usize,
    // TODO: record the mapped length for manual maps; it stays 0 today,
    // so the munmap on release covers no bytes.
    size: usize,
    loader_mapped: bool,
    info: Option<LibraryInfo>,
    symbols: Option<SymbolTable>,
}

#[cfg(unix)]
fn open_with_loader(path: &str) -> Option<Library> {
    match unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) } {
        Ok(library) => Some(library),
        Err(e) => {
            log::debug!("loader rejected {}: {}", path, e);
            None
        }
    }
}

#[cfg(not(unix))]
fn open_with_loader(_path: &str) -> Option<Library> {
    None
}

/// Maps the raw file read-only and private, skipping a fat/universal
/// header when the leading big-endian magic says there is one. The fd
/// is closed once the mapping exists.
fn map_file(path: &str) -> Option<usize> {
    let magic = File::open(path)
        .ok()
        .and_then(|mut f| f.read_u32::<BigEndian>().ok())
        .unwrap_or(0);

    let c_path = CString::new(path).ok()?;
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        return None;
    }
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        unsafe { libc::close(fd) };
        return None;
    }
    let mut offset: libc::off_t = 0;
    let mut length = st.st_size as usize;
    if magic == FAT_MAGIC || magic == FAT_CIGAM {
        offset = FAT_HEADER_SKIP as libc::off_t;
        length = length.saturating_sub(FAT_HEADER_SKIP);
    }
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            length,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            fd,
            offset,
        )
    };
    unsafe { libc::close(fd) };
    if addr == libc::MAP_FAILED {
        log::warn!("mmap of {} failed", path);
        return None;
    }
    Some(addr as usize)
}

impl ImageHandle {
    /// Loads an image, preferring the platform loader and falling back
    /// to a manual mapping. Never fails distinctly: when both strategies
    /// lose, the handle is degraded and its symbol count stays 0.
    pub fn load(path: &str) -> ImageHandle {
        let mut handle = match open_with_loader(path) {
            Some(library) => {
                log::debug!("{} mapped by the loader", path);
                ImageHandle {
                    path: path.to_string(),
                    loader_handle: Some(library),
                    base: 0,
                    size: 0,
                    loader_mapped: true,
                    info: None,
                    symbols: None,
                }
            }
            None => {
                let base = map_file(path).unwrap_or(0);
                if base != 0 {
                    log::debug!("{} mapped manually at {:#x}", path, base);
                }
                ImageHandle {
                    path: path.to_string(),
                    loader_handle: None,
                    base,
                    size: 0,
                    loader_mapped: false,
                    info: None,
                    symbols: None,
                }
            }
        };
        handle.symbols();
        handle
    }

    fn ensure_info(&mut self) {
        if self.info.is_some() {
            return;
        }
        let (base, image_index) = if self.loader_mapped {
            match macho::loaded_image_index(&self.path) {
                Some(index) => (macho::loaded_image_base(index), Some(index)),
                None => {
                    log::warn!("{} is loader-mapped but not enumerable", self.path);
                    return;
                }
            }
        } else {
            (self.base, None)
        };
        self.info = macho::build_info(base, image_index);
    }

    /// Builds the symbol table on first use; an existing table is
    /// returned unchanged.
    pub fn symbols(&mut self) -> &SymbolTable {
        if self.symbols.is_none() {
            self.ensure_info();
            let table = match &self.info {
                Some(info) => SymbolTable::build(info),
                None => SymbolTable::default(),
            };
            self.symbols = Some(table);
        }
        self.symbols.get_or_insert_with(SymbolTable::default)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.as_ref().map_or(0, |table| table.len())
    }

    pub fn symbol(&self, index: usize) -> Option<(&str, usize)> {
        let entry = self.symbols.as_ref()?.get(index)?;
        Some((entry.name.as_str(), entry.address))
    }

    pub fn resolve(&mut self, name: &str) -> Option<usize> {
        self.symbols().resolve(name)
    }

    /// Resolves `name` and pairs the address with its inferred argument
    /// count. An unresolved name yields a descriptor with a null address
    /// and zero arguments.
    pub fn create_function(&mut self, name: &str) -> FunctionDescriptor {
        self.symbols();
        let address = self
            .symbols
            .as_ref()
            .and_then(|table| table.resolve(name))
            .unwrap_or(0);
        let arg_count = match (&self.info, &self.symbols) {
            (Some(info), Some(table)) => disasm::infer_argument_count(info, table, address),
            _ => 0,
        };
        FunctionDescriptor::new(name, address, arg_count)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn loader_mapped(&self) -> bool {
        self.loader_mapped
    }

    pub fn info(&self) -> Option<&LibraryInfo> {
        self.info.as_ref()
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        if self.loader_mapped {
            // Loader-mapped memory goes back through the loader.
            self.loader_handle.take();
        } else if self.base != 0 {
            unsafe { libc::munmap(self.base as *mut libc::c_void, self.size) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimage::{build_image_64, SymSpec};
    use std::io::Write;

    fn write_temp(tag: &str, bytes: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("symcall_test_{}_{}", std::process::id(), tag));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    fn three_symbol_image() -> Vec<u8> {
        build_image_64(
            &[
                SymSpec::defined("_a", 0x1000),
                SymSpec::defined("_b", 0x1010),
                SymSpec::defined("_c", 0x1020),
            ],
            &[],
        )
    }

    #[test]
    fn test_loader_failure_falls_back_to_manual_map() {
        let path = write_temp("manual", &three_symbol_image());
        let mut image = ImageHandle::load(path.to_str().unwrap());
        assert!(!image.loader_mapped());
        assert_ne!(image.base(), 0);
        assert_eq!(image.symbol_count(), 3);

        let base = image.base();
        let addrs: Vec<usize> = (0..3).map(|i| image.symbol(i).unwrap().1).collect();
        assert_eq!(addrs, vec![base + 0x1000, base + 0x1010, base + 0x1020]);
        assert_eq!(image.symbols().estimate_length(base + 0x1000), 0x10);

        // Release must go through munmap, never the loader: with no
        // loader handle and a live base, Drop can only take the
        // unmap branch.
        assert!(image.loader_handle.is_none());
        drop(image);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_symbol_table_build_is_idempotent() {
        let path = write_temp("idempotent", &three_symbol_image());
        let mut image = ImageHandle::load(path.to_str().unwrap());
        let first = image.symbols() as *const SymbolTable;
        let second = image.symbols() as *const SymbolTable;
        assert_eq!(first, second);
        drop(image);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_stripped_symbol_is_synthesized() {
        let buf = build_image_64(
            &[
                SymSpec::defined("_a", 0x1000),
                SymSpec::stripped(0x1010),
                SymSpec::defined("_c", 0x1020),
            ],
            &[],
        );
        let path = write_temp("stripped", &buf);
        let mut image = ImageHandle::load(path.to_str().unwrap());
        let table = image.symbols();
        assert_eq!(table.len(), 3);
        let names: Vec<&str> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["_a", "stub_1", "_c"]);
        assert!(table.entries()[1].synthesized);
        drop(image);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_degrades() {
        let mut image = ImageHandle::load("/nonexistent/symcall_missing");
        assert!(!image.loader_mapped());
        assert_eq!(image.base(), 0);
        assert_eq!(image.symbol_count(), 0);
        assert_eq!(image.resolve("_anything"), None);
        let descriptor = image.create_function("_anything");
        assert_eq!(descriptor.address, 0);
        assert_eq!(descriptor.arg_count, 0);
    }

    #[test]
    fn test_fat_header_skip() {
        // mmap file offsets must be page aligned; the fixed skip only
        // lines up on 4 KiB pages.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page != 0x1000 {
            return;
        }
        let mut fat = Vec::new();
        fat.extend_from_slice(&crate::macho::FAT_MAGIC.to_be_bytes());
        fat.resize(FAT_HEADER_SKIP, 0);
        fat.extend_from_slice(&three_symbol_image());

        let path = write_temp("fat", &fat);
        let mut image = ImageHandle::load(path.to_str().unwrap());
        assert!(!image.loader_mapped());
        assert_eq!(image.symbol_count(), 3);
        drop(image);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_create_function_infers_arity() {
        // mov rsi, rdi ; ret
        let body: &[u8] = &[0x48, 0x89, 0xfe, 0xc3];
        let buf = build_image_64(
            &[
                SymSpec::defined("_pair", 0x1000),
                SymSpec::defined("_next", 0x1010),
            ],
            &[(0x1000, body)],
        );
        let path = write_temp("arity", &buf);
        let mut image = ImageHandle::load(path.to_str().unwrap());
        let descriptor = image.create_function("_pair");
        assert_ne!(descriptor.address, 0);
        assert_eq!(descriptor.arg_count, 2);
        drop(image);
        std::fs::remove_file(path).unwrap();
    }
}
