// Calling-convention argument inference: disassemble a function's byte
// range and watch which argument registers its instructions touch.

use crate::arm;
use crate::macho::LibraryInfo;
use crate::symtab::SymbolTable;
use capstone::prelude::*;

/// System V AMD64 input registers in ABI order: six general-purpose
/// argument registers followed by the eight floating-point ones. The
/// inferred count is the highest ordinal touched, plus one.
pub static X86_ARG_REGISTERS: [&str; 14] = [
    "rdi", "rsi", "rdx", "rcx", "r8", "r9", "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5",
    "xmm6", "xmm7",
];

/// Highest argument-register ordinal named in `op_str`, as whole tokens
/// only (so "r8" never matches inside "r8d").
fn highest_register_ordinal(op_str: &str) -> Option<usize> {
    op_str
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|token| X86_ARG_REGISTERS.iter().position(|reg| *reg == token))
        .max()
}

/// Estimates how many argument registers the function at `addr` reads
/// before returning. Returns 0 for a null address, an architecture
/// without a completed decode table, or a function that names no
/// argument register; callers treat 0 as "unknown, assume none".
pub fn infer_argument_count(info: &LibraryInfo, table: &SymbolTable, addr: usize) -> u32 {
    if addr == 0 {
        return 0;
    }
    // Past the last symbol the extent estimate wraps to a huge value;
    // the slice handed to the decoder still has to stay inside the
    // mapped code range, so cap it at the end of __TEXT.
    let length = table
        .estimate_length(addr)
        .min(info.text_end().unwrap_or(addr).saturating_sub(addr));
    let code = unsafe { std::slice::from_raw_parts(addr as *const u8, length) };

    if !info.is_x86_family() {
        return arm::infer_argument_count(info.is_64bit, code);
    }

    let cs = match Capstone::new()
        .x86()
        .mode(if info.is_64bit {
            arch::x86::ArchMode::Mode64
        } else {
            arch::x86::ArchMode::Mode32
        })
        .detail(true)
        .build()
    {
        Ok(cs) => cs,
        Err(e) => {
            log::error!("Failed to create disassembler: {}", e);
            return 0;
        }
    };

    let mut highest: Option<usize> = None;
    let mut offset: usize = 0;
    while offset < code.len() {
        let instructions = match cs.disasm_count(&code[offset..], (addr + offset) as u64, 1) {
            Ok(instructions) if instructions.len() > 0 => instructions,
            // Undecodable bytes end the scan, same as running off the range.
            _ => break,
        };
        let insn = &instructions.as_ref()[0];
        if insn.mnemonic() == Some("ret") {
            break;
        }
        if let Some(op_str) = insn.op_str() {
            if let Some(ordinal) = highest_register_ordinal(op_str) {
                if highest.map_or(true, |h| ordinal > h) {
                    highest = Some(ordinal);
                }
            }
        }
        offset += insn.bytes().len();
    }
    highest.map_or(0, |h| h as u32 + 1)
}
