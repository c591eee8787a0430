//! Dynamic symbol resolution and invocation for native binary images:
//! locate a loaded (or manually mapped) image, rebuild its defined
//! symbol table from the load commands, estimate calling-convention
//! arity by disassembly, and dispatch calls through a trampoline.

pub mod arm;
pub mod disasm;
pub mod image;
pub mod invoke;
pub mod logger;
pub mod macho;
pub mod pe;
pub mod symtab;

#[cfg(test)]
pub mod testimage;

pub use image::ImageHandle;
pub use invoke::{call, Argument, CallResult, FunctionDescriptor};
pub use symtab::{SymbolEntry, SymbolTable};
