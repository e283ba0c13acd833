//! Managed method descriptors (`(ILjava/lang/String;)V`) to type tags and back.

use crate::error::{CodegenError, CodegenResult};
use crate::types::{TagSignature, TypeTag};

const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

/// Decodes a full method descriptor. Arrays and object references collapse to
/// [`TypeTag::Pointer`]; nothing is returned for a descriptor that does not parse
/// completely.
pub fn decode_descriptor(descriptor: &str) -> CodegenResult<TagSignature> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(CodegenError::signature(descriptor, "missing '('"));
    }

    let mut cursor = 1usize;
    let mut args = Vec::new();
    loop {
        match bytes.get(cursor) {
            None => {
                return Err(CodegenError::signature(
                    descriptor,
                    "argument list ended before ')'",
                ));
            }
            Some(b')') => {
                cursor += 1;
                break;
            }
            Some(_) => {
                let (tag, next) = decode_one(descriptor, cursor, false)?;
                args.push(tag);
                cursor = next;
            }
        }
    }

    if cursor >= bytes.len() {
        return Err(CodegenError::signature(descriptor, "missing return type"));
    }
    let (ret, next) = decode_one(descriptor, cursor, true)?;
    if next != bytes.len() {
        return Err(CodegenError::signature(
            descriptor,
            format!("unexpected trailing input at offset {next}"),
        ));
    }

    Ok(TagSignature { args, ret })
}

/// Decodes one field descriptor starting at `at`, returning the tag and the offset just
/// past it.
fn decode_one(descriptor: &str, at: usize, allow_void: bool) -> CodegenResult<(TypeTag, usize)> {
    let bytes = descriptor.as_bytes();
    let mut cursor = at;
    let mut array = false;
    while bytes.get(cursor) == Some(&b'[') {
        array = true;
        cursor += 1;
    }

    let Some(&first) = bytes.get(cursor) else {
        return Err(CodegenError::signature(
            descriptor,
            "array descriptor ended before its element type",
        ));
    };

    let tag = match first {
        b'B' => TypeTag::Byte,
        b'C' => TypeTag::UShort,
        b'D' => TypeTag::Double,
        b'F' => TypeTag::Float,
        b'I' => TypeTag::Int,
        b'J' => TypeTag::Long,
        b'S' => TypeTag::Short,
        b'Z' => TypeTag::UByte,
        b'V' if allow_void && !array => TypeTag::Void,
        b'V' => {
            return Err(CodegenError::signature(
                descriptor,
                format!("void is only valid as the return type (offset {cursor})"),
            ));
        }
        b'L' => {
            let Some(end) = descriptor[cursor..].find(';') else {
                return Err(CodegenError::signature(
                    descriptor,
                    "object descriptor is missing ';'",
                ));
            };
            if end == 1 {
                return Err(CodegenError::signature(
                    descriptor,
                    format!("empty class name at offset {cursor}"),
                ));
            }
            cursor += end;
            TypeTag::Pointer
        }
        other => {
            return Err(CodegenError::signature(
                descriptor,
                format!("unexpected character '{}' at offset {cursor}", other as char),
            ));
        }
    };

    let tag = if array { TypeTag::Pointer } else { tag };
    Ok((tag, cursor + 1))
}

/// Renders tags back into descriptor form. Pointers come back as `java.lang.Object`, so
/// arrays and concrete classes do not survive a round trip.
pub fn encode_descriptor(signature: &TagSignature) -> CodegenResult<String> {
    let mut out = String::with_capacity(signature.args.len() * 2 + 3);
    out.push('(');
    for tag in &signature.args {
        if *tag == TypeTag::Void {
            return Err(CodegenError::UnencodableTag(tag.as_char()));
        }
        out.push_str(descriptor_for(*tag)?);
    }
    out.push(')');
    out.push_str(descriptor_for(signature.ret)?);
    Ok(out)
}

fn descriptor_for(tag: TypeTag) -> CodegenResult<&'static str> {
    Ok(match tag {
        TypeTag::Pointer => OBJECT_DESCRIPTOR,
        TypeTag::Int => "I",
        TypeTag::Short => "S",
        TypeTag::UShort => "C",
        TypeTag::Byte => "B",
        TypeTag::UByte => "Z",
        TypeTag::Long => "J",
        TypeTag::Float => "F",
        TypeTag::Double => "D",
        TypeTag::Void => "V",
        TypeTag::UInt | TypeTag::ULong => return Err(CodegenError::UnencodableTag(tag.as_char())),
    })
}
