//! Exported native-method symbol names: `Java_<class>_<method>[__<args>]`.

use bridge_abi::JNI_EXPORT_PREFIX;

use crate::error::{CodegenError, CodegenResult};

/// Upper bound on the escaped part of a symbol name (after the prefix).
pub const MAX_SYMBOL_LEN: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolIdentity {
    /// Slash separated, e.g. `com/example/Foo`.
    pub class_name: String,
    pub method_name: String,
    /// Argument descriptors wrapped in parens, e.g. `(I)`; present for overloaded
    /// methods only.
    pub short_signature: Option<String>,
}

impl SymbolIdentity {
    /// Descriptor of the declaring class as the runtime reports it: `L<class>;`.
    pub fn class_descriptor(&self) -> String {
        format!("L{};", self.class_name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Region {
    Name,
    Signature,
}

pub fn demangle(symbol: &str) -> CodegenResult<SymbolIdentity> {
    let Some(body) = symbol.strip_prefix(JNI_EXPORT_PREFIX) else {
        return Err(CodegenError::symbol(
            symbol,
            format!("missing '{JNI_EXPORT_PREFIX}' prefix"),
        ));
    };
    if body.len() >= MAX_SYMBOL_LEN {
        return Err(CodegenError::NameTooLong {
            len: body.len(),
            limit: MAX_SYMBOL_LEN,
        });
    }

    let bytes = body.as_bytes();
    let mut region = Region::Name;
    // `class` collects every closed name segment; `segment` is the one being read and
    // becomes the method name once the name region ends.
    let mut class: Option<String> = None;
    let mut segment = String::with_capacity(bytes.len());
    let mut method = String::new();
    let mut signature = String::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let byte = bytes[cursor];
        if !byte.is_ascii() {
            return Err(CodegenError::symbol(
                symbol,
                format!("non-ASCII byte {byte:#04x} at offset {cursor}"),
            ));
        }
        if byte != b'_' {
            let out = match region {
                Region::Name => &mut segment,
                Region::Signature => &mut signature,
            };
            out.push(byte as char);
            cursor += 1;
            continue;
        }

        let Some(&escape) = bytes.get(cursor + 1) else {
            return Err(CodegenError::symbol(symbol, "trailing '_'"));
        };
        match (escape, region) {
            (b'0', _) => {
                return Err(CodegenError::symbol(symbol, "unsupported '_0' escape"));
            }
            (b'1', Region::Name) => {
                segment.push('_');
                cursor += 2;
            }
            (b'1', Region::Signature) => {
                signature.push('_');
                cursor += 2;
            }
            (b'2', Region::Signature) => {
                signature.push(';');
                cursor += 2;
            }
            (b'3', Region::Signature) => {
                signature.push('[');
                cursor += 2;
            }
            (b'2' | b'3', Region::Name) => {
                return Err(CodegenError::symbol(
                    symbol,
                    format!("'_{}' outside the argument signature", escape as char),
                ));
            }
            (b'_', Region::Name) => {
                method = std::mem::take(&mut segment);
                region = Region::Signature;
                cursor += 2;
            }
            (b'_', Region::Signature) => {
                return Err(CodegenError::symbol(symbol, "second '__' separator"));
            }
            (_, Region::Name) => {
                let closed = std::mem::take(&mut segment);
                match class.as_mut() {
                    Some(class) => {
                        class.push('/');
                        class.push_str(&closed);
                    }
                    None => class = Some(closed),
                }
                // the escape character starts the next segment
                cursor += 1;
            }
            (_, Region::Signature) => {
                signature.push('/');
                cursor += 1;
            }
        }
    }

    let Some(class_name) = class else {
        return Err(CodegenError::symbol(symbol, "no method name boundary"));
    };
    let (method_name, short_signature) = match region {
        Region::Name => (segment, None),
        Region::Signature => (method, Some(format!("({signature})"))),
    };

    Ok(SymbolIdentity {
        class_name,
        method_name,
        short_signature,
    })
}

/// Inverse of [`demangle`]. Characters that would need a `_0xxxx` escape are rejected,
/// as are segments starting with a digit (they would read back as escapes).
pub fn mangle(identity: &SymbolIdentity) -> CodegenResult<String> {
    let mut out = String::with_capacity(
        JNI_EXPORT_PREFIX.len() + identity.class_name.len() + identity.method_name.len() + 8,
    );
    out.push_str(JNI_EXPORT_PREFIX);

    for (index, segment) in identity.class_name.split('/').enumerate() {
        if index > 0 {
            out.push('_');
        }
        push_name_segment(&mut out, segment, identity)?;
    }
    out.push('_');
    push_name_segment(&mut out, &identity.method_name, identity)?;

    if let Some(short) = &identity.short_signature {
        let inner = short
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| {
                CodegenError::symbol(&identity.method_name, "short signature must be '(...)'")
            })?;
        out.push_str("__");
        for ch in inner.chars() {
            match ch {
                '/' => out.push('_'),
                '_' => out.push_str("_1"),
                ';' => out.push_str("_2"),
                '[' => out.push_str("_3"),
                c if c.is_ascii_alphanumeric() => out.push(c),
                c => {
                    return Err(CodegenError::symbol(
                        inner,
                        format!("character '{c}' needs a unicode escape"),
                    ));
                }
            }
        }
    }

    if out.len() - JNI_EXPORT_PREFIX.len() >= MAX_SYMBOL_LEN {
        return Err(CodegenError::NameTooLong {
            len: out.len() - JNI_EXPORT_PREFIX.len(),
            limit: MAX_SYMBOL_LEN,
        });
    }
    Ok(out)
}

fn push_name_segment(
    out: &mut String,
    segment: &str,
    identity: &SymbolIdentity,
) -> CodegenResult<()> {
    let context = || format!("{}.{}", identity.class_name, identity.method_name);
    match segment.chars().next() {
        None => return Err(CodegenError::symbol(&context(), "empty name segment")),
        Some(first) if first.is_ascii_digit() => {
            return Err(CodegenError::symbol(
                &context(),
                format!("segment '{segment}' starts with a digit"),
            ));
        }
        Some(_) => {}
    }
    for ch in segment.chars() {
        match ch {
            '_' => out.push_str("_1"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                return Err(CodegenError::symbol(
                    &context(),
                    format!("character '{c}' needs a unicode escape"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_class() {
        let identity = demangle("Java_Foo_bar").expect("symbol should demangle");
        assert_eq!(identity.class_name, "Foo");
        assert_eq!(identity.method_name, "bar");
        assert_eq!(identity.short_signature, None);
    }

    #[test]
    fn signature_escapes_decode() {
        let identity = demangle("Java_a_B_m__Ljava_lang_String_2_3I")
            .expect("symbol should demangle");
        assert_eq!(identity.class_name, "a/B");
        assert_eq!(identity.method_name, "m");
        assert_eq!(
            identity.short_signature.as_deref(),
            Some("(Ljava/lang/String;[I)")
        );
    }

    #[test]
    fn rejects_escapes_outside_signature() {
        assert!(demangle("Java_a_B_m_2").is_err());
        assert!(demangle("Java_a_B_m_3").is_err());
        assert!(demangle("Java_a_B_m_0041").is_err());
        assert!(demangle("Java_a_B_m_").is_err());
        assert!(demangle("Java_a_B_m__I__J").is_err());
    }

    #[test]
    fn empty_signature_suffix_is_kept() {
        let identity = demangle("Java_a_B_m__").expect("symbol should demangle");
        assert_eq!(identity.short_signature.as_deref(), Some("()"));
    }
}
