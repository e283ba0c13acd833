//! Call stubs that move a native-method call from the host convention into the
//! emulator's formatted-call entry:
//!
//! ```text
//! dispatcher(function, "tags", env, receiver, args...) -> u64
//! ```
//!
//! The dispatcher is variadic, so floats are widened to doubles and every stack
//! argument takes one 8-byte slot.

use crate::aarch64::{
    FP, IP0, IP1, LR, SP, VSCRATCH, WIDE_IMM_LIMIT, emit_add_imm, emit_add_imm_wide, emit_blr,
    emit_fcvt_d_from_s, emit_fmov_d, emit_fmov_d_from_x, emit_fmov_s_from_w, emit_ldp_offset,
    emit_ldp_post, emit_ldr_d_imm12, emit_ldr_s_imm12, emit_ldr_w_imm12, emit_ldr_x_imm12,
    emit_mov_imm64, emit_mov_imm64_fixed, emit_mov_reg, emit_mov_w_reg, emit_ret,
    emit_stp_offset, emit_stp_pre, emit_str_b_imm12, emit_str_d_imm12, emit_str_w_imm12,
    emit_str_x_imm12, emit_sub_imm_wide,
};
use crate::error::{CodegenError, CodegenResult};
use crate::pages::{Trampoline, TrampolinePages};
use crate::types::{RegisterClass, TagSignature, TypeTag};

pub const INT_ARG_REGS: u8 = 8;
pub const FP_ARG_REGS: u8 = 8;
/// Function address and format string precede the forwarded arguments.
pub const RESERVED_INT_ARGS: u8 = 2;
pub const RESERVED_FP_ARGS: u8 = 0;
pub const SLOT_BYTES: u32 = 8;

const FRAME_RECORD_BYTES: u32 = 16;
const STACK_ALIGN: u32 = 16;
const PRE_INDEX_LIMIT: u32 = 504;
/// Last byte offset a single-byte store can reach from `sp`.
const BYTE_STORE_LIMIT: u32 = 4095;

/// Addresses baked into one stub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrampolineTarget {
    /// Environment pointer handed to the emulated function in place of the host one.
    pub env: u64,
    pub dispatcher: u64,
    pub function: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    IntReg(u8),
    FpReg(u8),
    /// Byte offset into the argument area (caller's for sources, ours for destinations).
    Stack(u32),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::IntReg(reg) => write!(f, "x{reg}"),
            Location::FpReg(reg) => write!(f, "v{reg}"),
            Location::Stack(offset) => write!(f, "[stack+{offset}]"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgPlacement {
    pub tag: TypeTag,
    pub src: Location,
    pub dst: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameShape {
    /// `stp x29, x30, [sp, #-size]!` with the record at the bottom of the frame.
    PreIndexed,
    /// `sub sp` first, record stored above the outgoing argument area. Records out of
    /// `stp` range are addressed through `x17`.
    Split,
}

/// All offsets are bytes from the stub's stack pointer after the prologue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub outgoing_bytes: u32,
    pub record_offset: u32,
    pub tags_offset: u32,
    pub size: u32,
    pub shape: FrameShape,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPlan {
    pub signature: TagSignature,
    pub placements: Vec<ArgPlacement>,
    pub frame: FrameLayout,
}

struct Lanes {
    next_int: u8,
    next_fp: u8,
    next_stack: u32,
}

impl Lanes {
    fn starting_at(int: u8, fp: u8) -> Self {
        Self {
            next_int: int,
            next_fp: fp,
            next_stack: 0,
        }
    }

    fn assign(&mut self, class: RegisterClass) -> Location {
        match class {
            RegisterClass::Integer if self.next_int < INT_ARG_REGS => {
                self.next_int += 1;
                Location::IntReg(self.next_int - 1)
            }
            RegisterClass::Float if self.next_fp < FP_ARG_REGS => {
                self.next_fp += 1;
                Location::FpReg(self.next_fp - 1)
            }
            _ => {
                let offset = self.next_stack;
                self.next_stack += SLOT_BYTES;
                Location::Stack(offset)
            }
        }
    }
}

/// Works out where every argument arrives and where the dispatcher expects it, plus the
/// stub's frame. The first argument must be the environment pointer.
pub fn plan_call(signature: &TagSignature) -> CodegenResult<CallPlan> {
    if signature.args.first() != Some(&TypeTag::Pointer) {
        return Err(CodegenError::CodeGenFailed(format!(
            "stub for {signature} must take the environment pointer first"
        )));
    }
    if signature.args.contains(&TypeTag::Void) {
        return Err(CodegenError::CodeGenFailed(format!(
            "stub for {signature} has a void argument"
        )));
    }

    let mut sources = Lanes::starting_at(0, 0);
    let mut destinations = Lanes::starting_at(RESERVED_INT_ARGS, RESERVED_FP_ARGS);
    let placements: Vec<ArgPlacement> = signature
        .args
        .iter()
        .map(|tag| ArgPlacement {
            tag: *tag,
            src: sources.assign(tag.register_class()),
            dst: destinations.assign(tag.register_class()),
        })
        .collect();

    let outgoing_bytes = destinations.next_stack;
    let tag_bytes = signature.args.len() as u32 + 1;
    let frame = frame_layout(outgoing_bytes, tag_bytes)?;

    Ok(CallPlan {
        signature: signature.clone(),
        placements,
        frame,
    })
}

fn frame_layout(outgoing_bytes: u32, tag_bytes: u32) -> CodegenResult<FrameLayout> {
    let record_offset = outgoing_bytes;
    let tags_offset = record_offset + FRAME_RECORD_BYTES;
    let size = (tags_offset + tag_bytes).next_multiple_of(STACK_ALIGN);

    let shape = if outgoing_bytes == 0 && size <= PRE_INDEX_LIMIT {
        FrameShape::PreIndexed
    } else if size <= WIDE_IMM_LIMIT {
        FrameShape::Split
    } else {
        return Err(CodegenError::CodeGenFailed(format!(
            "frame of {size} bytes with {outgoing_bytes} outgoing bytes cannot be encoded"
        )));
    };

    Ok(FrameLayout {
        outgoing_bytes,
        record_offset,
        tags_offset,
        size,
        shape,
    })
}

/// Emits the stub for `signature` without placing it anywhere.
pub fn assemble(signature: &TagSignature, target: TrampolineTarget) -> CodegenResult<Vec<u8>> {
    let plan = plan_call(signature)?;
    let frame = plan.frame;
    let mut code = Vec::with_capacity(64 + plan.placements.len() * 12);

    emit_prologue(&mut code, &frame)?;
    emit_mov_imm64_fixed(&mut code, 0, target.env);

    // Destinations sit at or above their sources, so walking backwards never
    // overwrites a register that is still to be read.
    for placement in plan.placements.iter().rev() {
        emit_placement(&mut code, placement, frame.size)?;
    }

    emit_mov_imm64_fixed(&mut code, 0, target.function);
    // x1 was consumed by the placements above
    let tags = signature.tag_string();
    if frame.tags_offset + tags.len() as u32 <= BYTE_STORE_LIMIT {
        emit_tag_string(&mut code, &tags, SP, frame.tags_offset)?;
        emit_add_imm(&mut code, 1, SP, frame.tags_offset)?;
    } else {
        emit_add_imm_wide(&mut code, 1, SP, frame.tags_offset)?;
        emit_tag_string(&mut code, &tags, 1, 0)?;
    }
    emit_mov_imm64_fixed(&mut code, IP0, target.dispatcher);
    emit_blr(&mut code, IP0);

    match signature.ret {
        TypeTag::Float => emit_fmov_s_from_w(&mut code, 0, 0),
        TypeTag::Double => emit_fmov_d_from_x(&mut code, 0, 0),
        _ => {}
    }

    emit_epilogue(&mut code, &frame)?;
    emit_ret(&mut code);
    Ok(code)
}

/// Assembles the stub for `args -> ret` and installs it into `pages`.
pub fn generate(
    pages: &mut TrampolinePages,
    args: &[TypeTag],
    ret: TypeTag,
    target: TrampolineTarget,
) -> CodegenResult<Trampoline> {
    let signature = TagSignature::new(args.to_vec(), ret)?;
    let code = assemble(&signature, target)?;
    pages.install(&code)
}

fn emit_prologue(code: &mut Vec<u8>, frame: &FrameLayout) -> CodegenResult<()> {
    match frame.shape {
        FrameShape::PreIndexed => {
            emit_stp_pre(code, FP, LR, SP, -(frame.size as i32))?;
            emit_add_imm(code, FP, SP, 0)?;
        }
        FrameShape::Split if frame.record_offset <= PRE_INDEX_LIMIT => {
            emit_sub_imm_wide(code, SP, SP, frame.size)?;
            emit_stp_offset(code, FP, LR, SP, frame.record_offset as i32)?;
            emit_add_imm(code, FP, SP, frame.record_offset)?;
        }
        FrameShape::Split => {
            emit_sub_imm_wide(code, SP, SP, frame.size)?;
            emit_add_imm_wide(code, IP1, SP, frame.record_offset)?;
            emit_stp_offset(code, FP, LR, IP1, 0)?;
            emit_add_imm(code, FP, IP1, 0)?;
        }
    }
    Ok(())
}

fn emit_epilogue(code: &mut Vec<u8>, frame: &FrameLayout) -> CodegenResult<()> {
    match frame.shape {
        FrameShape::PreIndexed => emit_ldp_post(code, FP, LR, SP, frame.size as i32)?,
        FrameShape::Split => {
            if frame.record_offset <= PRE_INDEX_LIMIT {
                emit_ldp_offset(code, FP, LR, SP, frame.record_offset as i32)?;
            } else {
                emit_add_imm_wide(code, IP1, SP, frame.record_offset)?;
                emit_ldp_offset(code, FP, LR, IP1, 0)?;
            }
            emit_add_imm_wide(code, SP, SP, frame.size)?;
        }
    }
    Ok(())
}

fn emit_placement(
    code: &mut Vec<u8>,
    placement: &ArgPlacement,
    frame_size: u32,
) -> CodegenResult<()> {
    // incoming stack arguments sit just above our frame
    let incoming = |offset: u32| frame_size + offset;
    let wide = placement.tag.is_wide();

    match (placement.tag, placement.src, placement.dst) {
        (TypeTag::Float, src, dst) => emit_float_placement(code, src, dst, frame_size),
        (TypeTag::Double, Location::FpReg(src), Location::FpReg(dst)) => {
            if src != dst {
                emit_fmov_d(code, dst, src);
            }
            Ok(())
        }
        (TypeTag::Double, Location::FpReg(src), Location::Stack(dst)) => {
            emit_str_d_imm12(code, src, SP, dst)
        }
        (TypeTag::Double, Location::Stack(src), Location::FpReg(dst)) => {
            emit_ldr_d_imm12(code, dst, SP, incoming(src))
        }
        (TypeTag::Double, Location::Stack(src), Location::Stack(dst)) => {
            emit_ldr_d_imm12(code, VSCRATCH, SP, incoming(src))?;
            emit_str_d_imm12(code, VSCRATCH, SP, dst)
        }
        (_, Location::IntReg(src), Location::IntReg(dst)) => {
            if wide {
                emit_mov_reg(code, dst, src);
            } else {
                emit_mov_w_reg(code, dst, src);
            }
            Ok(())
        }
        (_, Location::IntReg(src), Location::Stack(dst)) => emit_str_x_imm12(code, src, SP, dst),
        (_, Location::Stack(src), Location::IntReg(dst)) if wide => {
            emit_ldr_x_imm12(code, dst, SP, incoming(src))
        }
        (_, Location::Stack(src), Location::IntReg(dst)) => {
            emit_ldr_w_imm12(code, dst, SP, incoming(src))
        }
        (_, Location::Stack(src), Location::Stack(dst)) if wide => {
            emit_ldr_x_imm12(code, IP1, SP, incoming(src))?;
            emit_str_x_imm12(code, IP1, SP, dst)
        }
        (_, Location::Stack(src), Location::Stack(dst)) => {
            emit_ldr_w_imm12(code, IP1, SP, incoming(src))?;
            emit_str_x_imm12(code, IP1, SP, dst)
        }
        (tag, src, dst) => Err(CodegenError::CodeGenFailed(format!(
            "cannot move '{tag}' from {src} to {dst}"
        ))),
    }
}

fn emit_float_placement(
    code: &mut Vec<u8>,
    src: Location,
    dst: Location,
    frame_size: u32,
) -> CodegenResult<()> {
    match (src, dst) {
        (Location::FpReg(src), Location::FpReg(dst)) => emit_fcvt_d_from_s(code, dst, src),
        (Location::FpReg(src), Location::Stack(dst)) => {
            emit_fcvt_d_from_s(code, VSCRATCH, src);
            emit_str_d_imm12(code, VSCRATCH, SP, dst)?;
        }
        (Location::Stack(src), Location::FpReg(dst)) => {
            emit_ldr_s_imm12(code, VSCRATCH, SP, frame_size + src)?;
            emit_fcvt_d_from_s(code, dst, VSCRATCH);
        }
        (Location::Stack(src), Location::Stack(dst)) => {
            emit_ldr_s_imm12(code, VSCRATCH, SP, frame_size + src)?;
            emit_fcvt_d_from_s(code, VSCRATCH, VSCRATCH);
            emit_str_d_imm12(code, VSCRATCH, SP, dst)?;
        }
        (src, dst) => {
            return Err(CodegenError::CodeGenFailed(format!(
                "cannot move 'f' from {src} to {dst}"
            )));
        }
    }
    Ok(())
}

/// Writes `tags` plus a NUL at `base + offset`, widest stores first.
fn emit_tag_string(code: &mut Vec<u8>, tags: &str, base: u8, offset: u32) -> CodegenResult<()> {
    let mut bytes = tags.as_bytes().to_vec();
    bytes.push(0);

    let mut at = 0usize;
    while bytes.len() - at >= 8 {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&bytes[at..at + 8]);
        emit_mov_imm64(code, IP1, u64::from_le_bytes(chunk));
        emit_str_x_imm12(code, IP1, base, offset + at as u32)?;
        at += 8;
    }
    if bytes.len() - at >= 4 {
        let mut chunk = [0u8; 4];
        chunk.copy_from_slice(&bytes[at..at + 4]);
        emit_mov_imm64(code, IP1, u32::from_le_bytes(chunk) as u64);
        emit_str_w_imm12(code, IP1, base, offset + at as u32)?;
        at += 4;
    }
    while at < bytes.len() {
        emit_mov_imm64(code, IP1, bytes[at] as u64);
        emit_str_b_imm12(code, IP1, base, offset + at as u32)?;
        at += 1;
    }
    Ok(())
}
