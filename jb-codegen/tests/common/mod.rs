#![allow(dead_code, unused_imports)]

pub use codegen::{
    CallPlan, CodegenError, FrameShape, Location, TagSignature, TrampolinePages,
    TrampolineTarget, TypeTag, assemble, decode_descriptor, generate, plan_call,
};

pub const SP: u32 = 31;

pub const SAMPLE_TARGET: TrampolineTarget = TrampolineTarget {
    env: 0x0000_7f12_3456_0000,
    dispatcher: 0x0000_7f65_4321_0000,
    function: 0x0000_0000_0041_2340,
};

pub fn signature(args: &str, ret: char) -> TagSignature {
    TagSignature::parse_tags(args, ret).expect("tags should parse")
}

pub fn words(code: &[u8]) -> Vec<u32> {
    code.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

/// A base+offset memory access decoded from one emitted word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryOp {
    pub access: Access,
    pub base: u32,
    pub offset: i64,
    pub width: i64,
}

/// Decodes the unsigned-offset and signed-offset forms the stub generator emits.
/// Pre/post-indexed pairs only move `sp` and are skipped.
pub fn memory_op(word: u32) -> Option<MemoryOp> {
    let base = (word >> 5) & 31;
    let imm12 = ((word >> 10) & 0xFFF) as i64;
    let single = |access, width| {
        Some(MemoryOp {
            access,
            base,
            offset: imm12 * width,
            width,
        })
    };
    match word & 0xFFC0_0000 {
        0xF900_0000 => single(Access::Store, 8),
        0xF940_0000 => single(Access::Load, 8),
        0xB900_0000 => single(Access::Store, 4),
        0xB940_0000 => single(Access::Load, 4),
        0x3900_0000 => single(Access::Store, 1),
        0xBD40_0000 => single(Access::Load, 4),
        0xFD00_0000 => single(Access::Store, 8),
        0xFD40_0000 => single(Access::Load, 8),
        0xA900_0000 | 0xA940_0000 => {
            let imm7 = ((word >> 15) & 0x7F) as i64;
            let imm7 = if imm7 >= 64 { imm7 - 128 } else { imm7 };
            let access = if word & 0x0040_0000 != 0 {
                Access::Load
            } else {
                Access::Store
            };
            Some(MemoryOp {
                access,
                base,
                offset: imm7 * 8,
                width: 16,
            })
        }
        _ => None,
    }
}

pub fn sp_memory_ops(code: &[u8]) -> Vec<MemoryOp> {
    words(code)
        .into_iter()
        .filter_map(memory_op)
        .filter(|op| op.base == SP)
        .collect()
}
