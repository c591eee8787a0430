// Partial ARM/Thumb instruction classification. The class predicates
// are in place; the per-class register-usage tables and the 32-bit Thumb
// decoder are not, so argument inference on this architecture always
// reports 0 (unknown).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmClass {
    DataProcessing,
    LoadStore,
    Media,
    Branch,
    Coprocessor,
    Unconditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbClass {
    BasicLogic,
    DataProcessing,
    SpecialData,
    LoadLiteral,
    LoadStore,
    PcAddress,
    SpAddress,
    Misc,
    StoreMulti,
}

fn condition_code(word: u32) -> u32 {
    (word >> 28) & 0xf
}

fn op(word: u32) -> u32 {
    (word >> 24) & 0xf
}

fn op_alt(word: u32) -> u32 {
    ((word >> 4) & 0xf) & 1
}

pub fn classify_arm(word: u32) -> Option<ArmClass> {
    if condition_code(word) == 0xf {
        return Some(ArmClass::Unconditional);
    }
    let op = op(word);
    let op0 = op >> 3;
    let op1 = (op >> 2) & 1;
    let op2 = (op >> 1) & 1;
    match (op0, op1) {
        (0, 0) => Some(ArmClass::DataProcessing),
        (0, 1) if op2 == 0 || op_alt(word) == 0 => Some(ArmClass::LoadStore),
        (0, 1) => Some(ArmClass::Media),
        (1, 0) => Some(ArmClass::Branch),
        (1, 1) => Some(ArmClass::Coprocessor),
        _ => None,
    }
}

fn thumb_op(half: u16) -> u16 {
    (half & 0xff00) >> 10
}

pub fn is_thumb32(half: u16) -> bool {
    matches!(thumb_op(half), 0x1f | 0x1e | 0x1d)
}

pub fn classify_thumb16(half: u16) -> Option<ThumbClass> {
    let op = thumb_op(half);
    let op0 = op >> 5;
    let op1 = (op >> 4) & 1;
    let op2 = (op >> 3) & 1;
    let op3 = (op >> 2) & 1;
    let op4 = (op >> 1) & 1;
    let op5 = op & 1;
    match (op0, op1, op2, op3, op4, op5) {
        (0, 0, _, _, _, _) => Some(ThumbClass::BasicLogic),
        (0, 1, 0, 0, 0, 0) => Some(ThumbClass::DataProcessing),
        (0, 1, 0, 0, 0, 1) => Some(ThumbClass::SpecialData),
        (0, 1, 0, 0, 1, _) => Some(ThumbClass::LoadLiteral),
        (0, 1, 0, 1, _, _) | (0, 1, 1, _, _, _) | (1, 0, 0, _, _, _) => {
            Some(ThumbClass::LoadStore)
        }
        (1, 0, 1, 0, 0, _) => Some(ThumbClass::PcAddress),
        (1, 0, 1, 0, 1, _) => Some(ThumbClass::SpAddress),
        (1, 0, 1, 1, _, _) => Some(ThumbClass::Misc),
        (1, 1, 0, 0, 0, _) => Some(ThumbClass::StoreMulti),
        _ => None,
    }
}

/// 32-bit Thumb classification is not implemented.
pub fn classify_thumb32(_word: u32) -> Option<ThumbClass> {
    None
}

/// Walks the byte range classifying instruction words, but no class has
/// a register-usage table yet, so the count always stays 0.
pub fn infer_argument_count(_is_64bit: bool, code: &[u8]) -> u32 {
    let mut offset = 0;
    while offset + 4 <= code.len() {
        let word = u32::from_le_bytes([
            code[offset],
            code[offset + 1],
            code[offset + 2],
            code[offset + 3],
        ]);
        if classify_arm(word).is_none() {
            break;
        }
        offset += 4;
    }
    0
}
