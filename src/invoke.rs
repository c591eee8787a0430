// Dynamic invocation: a tagged argument vector marshalled through a
// transmute trampoline. This is the single unsafe call boundary; a bad
// address or wrong arity is a platform-level fault by design, never
// caught here.

use std::mem;

/// Integer/pointer-width scalar argument. Floating-point marshalling is
/// intentionally absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument {
    Int(u64),
    Pointer(usize),
}

impl Argument {
    pub fn raw(self) -> u64 {
        match self {
            Argument::Int(value) => value,
            Argument::Pointer(value) => value as u64,
        }
    }
}

/// A resolved callable target plus its inferred (or overridden) arity
/// and bound arguments.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub address: usize,
    pub arg_count: u32,
    args: Vec<Argument>,
}

impl FunctionDescriptor {
    pub fn new(name: &str, address: usize, arg_count: u32) -> FunctionDescriptor {
        FunctionDescriptor {
            name: name.to_string(),
            address,
            arg_count,
            args: Vec::new(),
        }
    }

    pub fn set_arguments(&mut self, args: &[Argument]) {
        self.args = args.to_vec();
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.args
    }
}

/// Outcome of one invocation; owns the descriptor it was made from.
#[derive(Debug)]
pub struct CallResult {
    pub descriptor: FunctionDescriptor,
    pub value: u64,
}

/// Dispatches the call. A null address short-circuits to a zero result;
/// anything else is invoked as-is.
pub fn call(descriptor: FunctionDescriptor) -> CallResult {
    let raw: Vec<u64> = descriptor.args.iter().map(|arg| arg.raw()).collect();
    let value = if descriptor.address == 0 {
        0
    } else {
        unsafe { dispatch(descriptor.address, &raw) }
    };
    CallResult { descriptor, value }
}

/// The trampoline: places up to 14 integer/pointer-width arguments into
/// the native calling convention and jumps. The C ABI spills anything
/// past the register file onto the stack for us.
unsafe fn dispatch(address: usize, a: &[u64]) -> u64 {
    type F0 = extern "C" fn() -> u64;
    type F1 = extern "C" fn(u64) -> u64;
    type F2 = extern "C" fn(u64, u64) -> u64;
    type F3 = extern "C" fn(u64, u64, u64) -> u64;
    type F4 = extern "C" fn(u64, u64, u64, u64) -> u64;
    type F5 = extern "C" fn(u64, u64, u64, u64, u64) -> u64;
    type F6 = extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64;
    type F7 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F8 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F9 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F10 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F11 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F12 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F13 =
        extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F14 =
        extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;

    match a.len() {
        0 => mem::transmute::<usize, F0>(address)(),
        1 => mem::transmute::<usize, F1>(address)(a[0]),
        2 => mem::transmute::<usize, F2>(address)(a[0], a[1]),
        3 => mem::transmute::<usize, F3>(address)(a[0], a[1], a[2]),
        4 => mem::transmute::<usize, F4>(address)(a[0], a[1], a[2], a[3]),
        5 => mem::transmute::<usize, F5>(address)(a[0], a[1], a[2], a[3], a[4]),
        6 => mem::transmute::<usize, F6>(address)(a[0], a[1], a[2], a[3], a[4], a[5]),
        7 => mem::transmute::<usize, F7>(address)(a[0], a[1], a[2], a[3], a[4], a[5], a[6]),
        8 => mem::transmute::<usize, F8>(address)(a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]),
        9 => mem::transmute::<usize, F9>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8],
        ),
        10 => mem::transmute::<usize, F10>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9],
        ),
        11 => mem::transmute::<usize, F11>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9], a[10],
        ),
        12 => mem::transmute::<usize, F12>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9], a[10], a[11],
        ),
        13 => mem::transmute::<usize, F13>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9], a[10], a[11], a[12],
        ),
        14 => mem::transmute::<usize, F14>(address)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7], a[8], a[9], a[10], a[11], a[12],
            a[13],
        ),
        n => {
            log::error!("call to {:#x} with {} arguments exceeds the trampoline width", address, n);
            0
        }
    }
}
