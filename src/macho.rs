// Mach-O introspection over a raw image base: header, load commands,
// symbol table descriptors and slide computation.

use libc::c_char;
use std::ffi::CStr;
use std::mem;

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;

pub const CPU_ARCH_ABI64: i32 = 0x0100_0000;
pub const CPU_TYPE_X86: i32 = 7;
pub const CPU_TYPE_X86_64: i32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: i32 = 12;
pub const CPU_TYPE_ARM64: i32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_SEGMENT_64: u32 = 0x19;

pub const N_STAB: u8 = 0xe0;
pub const N_TYPE: u8 = 0x0e;
pub const N_SECT: u8 = 0x0e;

pub const SEG_TEXT: &[u8] = b"__TEXT";
pub const SEG_LINKEDIT: &[u8] = b"__LINKEDIT";

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// Common head of LC_SEGMENT and LC_SEGMENT_64; the bit-width specific
/// layout words follow directly after.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SegmentPrefix {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Seg32Layout {
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Seg64Layout {
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
}

/// Head of an nlist/nlist_64 entry; the stored value follows as a
/// u32 or u64 depending on bit-width.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NlistPrefix {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
}

/// Cached introspection result for one image. Built at most once per
/// handle; the segment fields are raw addresses of the segment commands
/// inside the mapped image.
#[derive(Debug)]
pub struct LibraryInfo {
    pub base: usize,
    pub header_magic: u32,
    pub cpu_type: i32,
    pub cpu_subtype: i32,
    pub is_64bit: bool,
    pub image_index: Option<u32>,
    pub symtab_commands: Vec<SymtabCommand>,
    pub text_seg: Option<usize>,
    pub link_seg: Option<usize>,
}

/// Correction terms for one image, applied to symbol-table file offsets
/// and stored symbol values respectively.
#[derive(Debug, Clone, Copy)]
pub struct Slides {
    pub file_slide: u64,
    pub map_slide: u64,
}

unsafe fn read_at<T: Copy>(addr: usize) -> T {
    std::ptr::read_unaligned(addr as *const T)
}

fn segname_matches(segname: &[u8; 16], well_known: &[u8]) -> bool {
    segname[..well_known.len()] == *well_known
        && segname[well_known.len()..].iter().all(|b| *b == 0)
}

impl LibraryInfo {
    pub fn nlist_stride(&self) -> usize {
        mem::size_of::<NlistPrefix>() + if self.is_64bit { 8 } else { 4 }
    }

    pub fn is_x86_family(&self) -> bool {
        self.cpu_type == CPU_TYPE_X86 || self.cpu_type == CPU_TYPE_X86_64
    }

    fn segment_layout(&self, seg_addr: usize) -> (u64, u64) {
        let data = seg_addr + mem::size_of::<SegmentPrefix>();
        if self.is_64bit {
            let layout: Seg64Layout = unsafe { read_at(data) };
            (layout.vmaddr, layout.fileoff)
        } else {
            let layout: Seg32Layout = unsafe { read_at(data) };
            (layout.vmaddr as u64, layout.fileoff as u64)
        }
    }

    /// Runtime end of the mapped code range: base plus __TEXT's vmsize.
    pub fn text_end(&self) -> Option<usize> {
        let data = self.text_seg? + mem::size_of::<SegmentPrefix>();
        let vmsize = if self.is_64bit {
            unsafe { read_at::<Seg64Layout>(data) }.vmsize
        } else {
            unsafe { read_at::<Seg32Layout>(data) }.vmsize as u64
        };
        Some(self.base.wrapping_add(vmsize as usize))
    }

    /// File slide relocates symbol/string table file offsets into the
    /// mapped image; map slide relocates stored symbol values to runtime
    /// addresses. The dyld relocation slide for loader-mapped images is
    /// applied separately by the table builder.
    pub fn slides(&self) -> Option<Slides> {
        let text = self.text_seg?;
        let link = self.link_seg?;
        let (text_vmaddr, _) = self.segment_layout(text);
        let (link_vmaddr, link_fileoff) = self.segment_layout(link);
        Some(Slides {
            file_slide: link_vmaddr.wrapping_sub(text_vmaddr).wrapping_sub(link_fileoff),
            map_slide: (self.base as u64).wrapping_sub(text_vmaddr),
        })
    }
}

/// Reads the header at `base` and walks the load commands. Returns None
/// only when there is no base to read; a magic mismatch at the base stops
/// the walk and leaves the header fields only.
///
/// `base` must point at a fully mapped image. Command sizes are trusted
/// as declared; corrupt cmdsize values are not defended against.
pub fn build_info(base: usize, image_index: Option<u32>) -> Option<LibraryInfo> {
    if base == 0 {
        return None;
    }
    let header: MachHeader = unsafe { read_at(base) };
    let is_64bit = (header.cputype & CPU_ARCH_ABI64) != 0
        && (header.magic == MH_MAGIC_64 || header.magic == MH_CIGAM_64);
    let mut info = LibraryInfo {
        base,
        header_magic: header.magic,
        cpu_type: header.cputype,
        cpu_subtype: header.cpusubtype,
        is_64bit,
        image_index,
        symtab_commands: Vec::new(),
        text_seg: None,
        link_seg: None,
    };

    // Re-read the magic before trusting the rest of the header.
    let resolved_magic: u32 = unsafe { read_at(base) };
    if resolved_magic != info.header_magic {
        log::warn!(
            "header magic mismatch at base {:#x}: {:#x} != {:#x}",
            base,
            resolved_magic,
            info.header_magic
        );
        return Some(info);
    }

    let header_size = if is_64bit {
        mem::size_of::<MachHeader>() + 4
    } else {
        mem::size_of::<MachHeader>()
    };
    let segment_cmd = if is_64bit { LC_SEGMENT_64 } else { LC_SEGMENT };

    let mut cursor = base + header_size;
    for _ in 0..header.ncmds {
        let lc: LoadCommand = unsafe { read_at(cursor) };
        if lc.cmd == LC_SYMTAB {
            info.symtab_commands.push(unsafe { read_at(cursor) });
        } else if lc.cmd == segment_cmd {
            let prefix: SegmentPrefix = unsafe { read_at(cursor) };
            if info.text_seg.is_none() && segname_matches(&prefix.segname, SEG_TEXT) {
                info.text_seg = Some(cursor);
            } else if info.link_seg.is_none() && segname_matches(&prefix.segname, SEG_LINKEDIT) {
                info.link_seg = Some(cursor);
            }
        } else if lc.cmd == LC_LOAD_DYLIB {
            // lc_str offset is relative to the command start
            let name_offset: u32 = unsafe { read_at(cursor + mem::size_of::<LoadCommand>()) };
            let name = unsafe { CStr::from_ptr((cursor + name_offset as usize) as *const c_char) };
            log::debug!("links against {}", name.to_string_lossy());
        }
        cursor += lc.cmdsize as usize;
    }
    Some(info)
}

// Loaded-image enumeration comes from dyld and only exists on Darwin.
// Elsewhere the queries report "not found", which degrades loader-mapped
// handles to an empty symbol table.
#[cfg(any(target_os = "macos", target_os = "ios"))]
extern "C" {
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_name(index: u32) -> *const c_char;
    fn _dyld_get_image_header(index: u32) -> *const libc::c_void;
    fn _dyld_get_image_vmaddr_slide(index: u32) -> libc::intptr_t;
}

/// Find the index of `path` among all currently loaded images.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn loaded_image_index(path: &str) -> Option<u32> {
    let count = unsafe { _dyld_image_count() };
    for i in 0..count {
        let name = unsafe { _dyld_get_image_name(i) };
        if name.is_null() {
            continue;
        }
        let name = unsafe { CStr::from_ptr(name) };
        if name.to_string_lossy() == path {
            return Some(i);
        }
    }
    None
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn loaded_image_index(_path: &str) -> Option<u32> {
    None
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn loaded_image_base(index: u32) -> usize {
    unsafe { _dyld_get_image_header(index) as usize }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn loaded_image_base(_index: u32) -> usize {
    0
}

/// dyld's relocation slide for one loaded image.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn loaded_image_slide(index: u32) -> isize {
    unsafe { _dyld_get_image_vmaddr_slide(index) }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn loaded_image_slide(_index: u32) -> isize {
    0
}
