use crate::error::{CodegenError, CodegenResult};

pub(crate) const SP: u8 = 31;
pub(crate) const FP: u8 = 29;
pub(crate) const LR: u8 = 30;
/// Intra-procedure-call scratch registers; free to clobber in a stub.
pub(crate) const IP0: u8 = 16;
pub(crate) const IP1: u8 = 17;
/// Caller-saved vector register outside the argument range.
pub(crate) const VSCRATCH: u8 = 16;

pub(crate) const RET: u32 = 0xD65F03C0;

pub(crate) fn emit_u32(code: &mut Vec<u8>, insn: u32) {
    code.extend_from_slice(&insn.to_le_bytes());
}

pub(crate) fn emit_mov_reg(code: &mut Vec<u8>, dst: u8, src: u8) {
    let insn = 0xAA0003E0_u32 | ((src as u32) << 16) | (dst as u32);
    emit_u32(code, insn);
}

pub(crate) fn emit_mov_w_reg(code: &mut Vec<u8>, dst: u8, src: u8) {
    let insn = 0x2A0003E0_u32 | ((src as u32) << 16) | (dst as u32);
    emit_u32(code, insn);
}

/// Shortest `movz`/`movk` sequence for `value`.
pub(crate) fn emit_mov_imm64(code: &mut Vec<u8>, dst: u8, value: u64) {
    let parts = imm16_parts(value);

    let Some(first_index) = parts.iter().position(|part| *part != 0) else {
        emit_u32(code, 0xD2800000_u32 | (dst as u32));
        return;
    };

    emit_u32(
        code,
        0xD2800000_u32
            | ((first_index as u32) << 21)
            | ((parts[first_index] as u32) << 5)
            | (dst as u32),
    );

    for (i, part) in parts.iter().enumerate() {
        if i == first_index || *part == 0 {
            continue;
        }
        emit_u32(
            code,
            0xF2800000_u32 | ((i as u32) << 21) | ((*part as u32) << 5) | (dst as u32),
        );
    }
}

/// Always one `movz` and three `movk`, so address loads have a fixed length.
pub(crate) fn emit_mov_imm64_fixed(code: &mut Vec<u8>, dst: u8, value: u64) {
    let parts = imm16_parts(value);
    emit_u32(code, 0xD2800000_u32 | ((parts[0] as u32) << 5) | (dst as u32));
    for (i, part) in parts.iter().enumerate().skip(1) {
        emit_u32(
            code,
            0xF2800000_u32 | ((i as u32) << 21) | ((*part as u32) << 5) | (dst as u32),
        );
    }
}

fn imm16_parts(value: u64) -> [u16; 4] {
    [
        (value & 0xFFFF) as u16,
        ((value >> 16) & 0xFFFF) as u16,
        ((value >> 32) & 0xFFFF) as u16,
        ((value >> 48) & 0xFFFF) as u16,
    ]
}

pub(crate) fn emit_add_imm(code: &mut Vec<u8>, dst: u8, src: u8, imm: u32) -> CodegenResult<()> {
    let insn = 0x91000000_u32
        | encode_imm12_scaled(imm, 0, "add")?
        | ((src as u32) << 5)
        | (dst as u32);
    emit_u32(code, insn);
    Ok(())
}

/// Largest immediate reachable with a shifted and an unshifted `add`/`sub`.
pub(crate) const WIDE_IMM_LIMIT: u32 = 0xFF_FFFF;
const IMM12_LSL12: u32 = 1 << 22;

/// `add dst, src, #imm` as up to two instructions (`lsl #12` part first).
pub(crate) fn emit_add_imm_wide(
    code: &mut Vec<u8>,
    dst: u8,
    src: u8,
    imm: u32,
) -> CodegenResult<()> {
    emit_arith_imm_wide(code, 0x91000000, dst, src, imm, "add")
}

/// `sub dst, src, #imm` as up to two instructions (`lsl #12` part first).
pub(crate) fn emit_sub_imm_wide(
    code: &mut Vec<u8>,
    dst: u8,
    src: u8,
    imm: u32,
) -> CodegenResult<()> {
    emit_arith_imm_wide(code, 0xD1000000, dst, src, imm, "sub")
}

fn emit_arith_imm_wide(
    code: &mut Vec<u8>,
    base: u32,
    dst: u8,
    src: u8,
    imm: u32,
    label: &str,
) -> CodegenResult<()> {
    if imm > WIDE_IMM_LIMIT {
        return Err(CodegenError::CodeGenFailed(format!(
            "{label} immediate {imm} exceeds {WIDE_IMM_LIMIT}"
        )));
    }
    let (high, low) = (imm >> 12, imm & 0xFFF);
    if high == 0 {
        emit_u32(code, base | (low << 10) | ((src as u32) << 5) | (dst as u32));
        return Ok(());
    }
    emit_u32(
        code,
        base | IMM12_LSL12 | (high << 10) | ((src as u32) << 5) | (dst as u32),
    );
    if low != 0 {
        emit_u32(code, base | (low << 10) | ((dst as u32) << 5) | (dst as u32));
    }
    Ok(())
}

/// Unsigned offset in bytes to the `imm12` field (already shifted into bits 10..22).
pub(crate) fn encode_imm12_scaled(offset: u32, scale: u32, label: &str) -> CodegenResult<u32> {
    let unit = 1_u32 << scale;
    if offset % unit != 0 {
        return Err(CodegenError::CodeGenFailed(format!(
            "{label} offset {offset} misaligned for scale {unit}"
        )));
    }
    let imm = offset / unit;
    if imm > 4095 {
        return Err(CodegenError::CodeGenFailed(format!(
            "{label} offset {offset} exceeds immediate range"
        )));
    }
    Ok(imm << 10)
}

/// Signed pair offset in bytes to the `imm7` field (already shifted into bits 15..22).
pub(crate) fn encode_imm7_scaled(offset: i32, label: &str) -> CodegenResult<u32> {
    if offset % 8 != 0 {
        return Err(CodegenError::CodeGenFailed(format!(
            "{label} offset {offset} misaligned for scale 8"
        )));
    }
    let imm = offset / 8;
    if !(-64..=63).contains(&imm) {
        return Err(CodegenError::CodeGenFailed(format!(
            "{label} offset {offset} exceeds pair immediate range"
        )));
    }
    Ok(((imm as u32) & 0x7F) << 15)
}

fn pair(base: u32, rt: u8, rt2: u8, rn: u8, imm7: u32) -> u32 {
    base | imm7 | ((rt2 as u32) << 10) | ((rn as u32) << 5) | (rt as u32)
}

/// `stp rt, rt2, [rn, #offset]!`
pub(crate) fn emit_stp_pre(
    code: &mut Vec<u8>,
    rt: u8,
    rt2: u8,
    rn: u8,
    offset: i32,
) -> CodegenResult<()> {
    let imm7 = encode_imm7_scaled(offset, "stp pre-index")?;
    emit_u32(code, pair(0xA9800000, rt, rt2, rn, imm7));
    Ok(())
}

/// `stp rt, rt2, [rn, #offset]`
pub(crate) fn emit_stp_offset(
    code: &mut Vec<u8>,
    rt: u8,
    rt2: u8,
    rn: u8,
    offset: i32,
) -> CodegenResult<()> {
    let imm7 = encode_imm7_scaled(offset, "stp")?;
    emit_u32(code, pair(0xA9000000, rt, rt2, rn, imm7));
    Ok(())
}

/// `ldp rt, rt2, [rn, #offset]`
pub(crate) fn emit_ldp_offset(
    code: &mut Vec<u8>,
    rt: u8,
    rt2: u8,
    rn: u8,
    offset: i32,
) -> CodegenResult<()> {
    let imm7 = encode_imm7_scaled(offset, "ldp")?;
    emit_u32(code, pair(0xA9400000, rt, rt2, rn, imm7));
    Ok(())
}

/// `ldp rt, rt2, [rn], #offset`
pub(crate) fn emit_ldp_post(
    code: &mut Vec<u8>,
    rt: u8,
    rt2: u8,
    rn: u8,
    offset: i32,
) -> CodegenResult<()> {
    let imm7 = encode_imm7_scaled(offset, "ldp post-index")?;
    emit_u32(code, pair(0xA8C00000, rt, rt2, rn, imm7));
    Ok(())
}

fn load_store(
    code: &mut Vec<u8>,
    base: u32,
    scale: u32,
    label: &str,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    let insn = base | encode_imm12_scaled(offset, scale, label)? | ((rn as u32) << 5) | (rt as u32);
    emit_u32(code, insn);
    Ok(())
}

pub(crate) fn emit_ldr_x_imm12(
    code: &mut Vec<u8>,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xF9400000, 3, "ldr x", rt, rn, offset)
}

pub(crate) fn emit_str_x_imm12(
    code: &mut Vec<u8>,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xF9000000, 3, "str x", rt, rn, offset)
}

pub(crate) fn emit_ldr_w_imm12(
    code: &mut Vec<u8>,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xB9400000, 2, "ldr w", rt, rn, offset)
}

pub(crate) fn emit_str_w_imm12(
    code: &mut Vec<u8>,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xB9000000, 2, "str w", rt, rn, offset)
}

pub(crate) fn emit_str_b_imm12(
    code: &mut Vec<u8>,
    rt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0x39000000, 0, "str b", rt, rn, offset)
}

pub(crate) fn emit_ldr_s_imm12(
    code: &mut Vec<u8>,
    vt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xBD400000, 2, "ldr s", vt, rn, offset)
}

pub(crate) fn emit_ldr_d_imm12(
    code: &mut Vec<u8>,
    vt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xFD400000, 3, "ldr d", vt, rn, offset)
}

pub(crate) fn emit_str_d_imm12(
    code: &mut Vec<u8>,
    vt: u8,
    rn: u8,
    offset: u32,
) -> CodegenResult<()> {
    load_store(code, 0xFD000000, 3, "str d", vt, rn, offset)
}

/// `fcvt dd, sn`
pub(crate) fn emit_fcvt_d_from_s(code: &mut Vec<u8>, vd: u8, vn: u8) {
    emit_u32(code, 0x1E22C000_u32 | ((vn as u32) << 5) | (vd as u32));
}

/// `fmov dd, dn`
pub(crate) fn emit_fmov_d(code: &mut Vec<u8>, vd: u8, vn: u8) {
    emit_u32(code, 0x1E604000_u32 | ((vn as u32) << 5) | (vd as u32));
}

/// `fmov sd, wn`
pub(crate) fn emit_fmov_s_from_w(code: &mut Vec<u8>, vd: u8, wn: u8) {
    emit_u32(code, 0x1E270000_u32 | ((wn as u32) << 5) | (vd as u32));
}

/// `fmov dd, xn`
pub(crate) fn emit_fmov_d_from_x(code: &mut Vec<u8>, vd: u8, xn: u8) {
    emit_u32(code, 0x9E670000_u32 | ((xn as u32) << 5) | (vd as u32));
}

pub(crate) fn emit_blr(code: &mut Vec<u8>, rn: u8) {
    emit_u32(code, 0xD63F0000_u32 | ((rn as u32) << 5));
}

pub(crate) fn emit_ret(code: &mut Vec<u8>) {
    emit_u32(code, RET);
}
