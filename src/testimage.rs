// Synthetic 64-bit Mach-O images for tests: a flat file layout with
// __TEXT at vmaddr 0 covering [0, 0x2000) and __LINKEDIT holding the
// symbol and string tables at file offset 0x2000.

use crate::macho::{CPU_TYPE_X86_64, LC_SEGMENT_64, LC_SYMTAB, MH_MAGIC_64, N_SECT};
use byteorder::{LittleEndian, WriteBytesExt};

pub const LINKEDIT_OFF: u64 = 0x2000;

pub struct SymSpec {
    pub name: Option<&'static str>,
    pub value: u64,
    pub n_type: u8,
}

impl SymSpec {
    pub fn defined(name: &'static str, value: u64) -> SymSpec {
        SymSpec {
            name: Some(name),
            value,
            n_type: N_SECT,
        }
    }

    /// Defined entry whose name offset is zero (stripped).
    pub fn stripped(value: u64) -> SymSpec {
        SymSpec {
            name: None,
            value,
            n_type: N_SECT,
        }
    }

    pub fn with_type(name: &'static str, value: u64, n_type: u8) -> SymSpec {
        SymSpec {
            name: Some(name),
            value,
            n_type,
        }
    }
}

fn write_segment_64(buf: &mut Vec<u8>, name: &[u8], vmaddr: u64, vmsize: u64, fileoff: u64) {
    buf.write_u32::<LittleEndian>(LC_SEGMENT_64).unwrap();
    buf.write_u32::<LittleEndian>(72).unwrap(); // cmdsize, no sections
    let mut segname = [0u8; 16];
    segname[..name.len()].copy_from_slice(name);
    buf.extend_from_slice(&segname);
    buf.write_u64::<LittleEndian>(vmaddr).unwrap();
    buf.write_u64::<LittleEndian>(vmsize).unwrap();
    buf.write_u64::<LittleEndian>(fileoff).unwrap();
    buf.write_u64::<LittleEndian>(vmsize).unwrap(); // filesize
    buf.write_i32::<LittleEndian>(7).unwrap(); // maxprot
    buf.write_i32::<LittleEndian>(5).unwrap(); // initprot
    buf.write_u32::<LittleEndian>(0).unwrap(); // nsects
    buf.write_u32::<LittleEndian>(0).unwrap(); // flags
}

/// Builds a well-formed 64-bit image. `code` places raw byte runs at
/// their vm addresses (which equal file offsets here); all of them must
/// land inside the __TEXT range.
pub fn build_image_64(syms: &[SymSpec], code: &[(u64, &[u8])]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let mut strx = Vec::with_capacity(syms.len());
    for sym in syms {
        match sym.name {
            Some(name) => {
                strx.push(strtab.len() as u32);
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
            }
            None => strx.push(0),
        }
    }

    let symoff = LINKEDIT_OFF as u32;
    let nsyms = syms.len() as u32;
    let stroff = symoff + nsyms * 16;
    let strsize = strtab.len() as u32;

    let mut buf = Vec::new();
    // mach_header_64
    buf.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
    buf.write_i32::<LittleEndian>(CPU_TYPE_X86_64).unwrap();
    buf.write_i32::<LittleEndian>(3).unwrap(); // cpusubtype
    buf.write_u32::<LittleEndian>(6).unwrap(); // filetype MH_DYLIB
    buf.write_u32::<LittleEndian>(3).unwrap(); // ncmds
    buf.write_u32::<LittleEndian>(72 + 72 + 24).unwrap(); // sizeofcmds
    buf.write_u32::<LittleEndian>(0).unwrap(); // flags
    buf.write_u32::<LittleEndian>(0).unwrap(); // reserved

    write_segment_64(&mut buf, b"__TEXT", 0, LINKEDIT_OFF, 0);
    write_segment_64(
        &mut buf,
        b"__LINKEDIT",
        LINKEDIT_OFF,
        (nsyms * 16 + strsize) as u64,
        LINKEDIT_OFF,
    );

    // LC_SYMTAB
    buf.write_u32::<LittleEndian>(LC_SYMTAB).unwrap();
    buf.write_u32::<LittleEndian>(24).unwrap();
    buf.write_u32::<LittleEndian>(symoff).unwrap();
    buf.write_u32::<LittleEndian>(nsyms).unwrap();
    buf.write_u32::<LittleEndian>(stroff).unwrap();
    buf.write_u32::<LittleEndian>(strsize).unwrap();

    buf.resize(LINKEDIT_OFF as usize, 0);
    for (offset, bytes) in code {
        let offset = *offset as usize;
        assert!(offset + bytes.len() <= LINKEDIT_OFF as usize);
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    // nlist_64 entries
    for (i, sym) in syms.iter().enumerate() {
        buf.write_u32::<LittleEndian>(strx[i]).unwrap();
        buf.write_u8(sym.n_type).unwrap();
        buf.write_u8(1).unwrap(); // n_sect
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf.write_u64::<LittleEndian>(sym.value).unwrap();
    }
    buf.extend_from_slice(&strtab);
    buf
}
