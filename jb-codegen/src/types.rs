use crate::error::{CodegenError, CodegenResult};

/// One argument or return slot, spelled with the emulator's formatted-call letters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Pointer,
    Int,
    UInt,
    Short,
    /// Also used for the managed `char` type.
    UShort,
    Byte,
    /// Also used for the managed `boolean` type.
    UByte,
    Long,
    ULong,
    Float,
    Double,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterClass {
    Integer,
    Float,
}

impl TypeTag {
    pub const ALL: [TypeTag; 12] = [
        TypeTag::Pointer,
        TypeTag::Int,
        TypeTag::UInt,
        TypeTag::Short,
        TypeTag::UShort,
        TypeTag::Byte,
        TypeTag::UByte,
        TypeTag::Long,
        TypeTag::ULong,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::Void,
    ];

    pub fn as_char(self) -> char {
        match self {
            TypeTag::Pointer => 'p',
            TypeTag::Int => 'i',
            TypeTag::UInt => 'u',
            TypeTag::Short => 'w',
            TypeTag::UShort => 'W',
            TypeTag::Byte => 'c',
            TypeTag::UByte => 'C',
            TypeTag::Long => 'I',
            TypeTag::ULong => 'U',
            TypeTag::Float => 'f',
            TypeTag::Double => 'd',
            TypeTag::Void => 'v',
        }
    }

    pub fn from_char(tag: char) -> Option<TypeTag> {
        TypeTag::ALL.into_iter().find(|candidate| candidate.as_char() == tag)
    }

    pub fn register_class(self) -> RegisterClass {
        match self {
            TypeTag::Float | TypeTag::Double => RegisterClass::Float,
            _ => RegisterClass::Integer,
        }
    }

    /// Whether the slot needs a full 64-bit register or stack word.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            TypeTag::Pointer | TypeTag::Long | TypeTag::ULong | TypeTag::Double
        )
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Ordered argument tags plus the return tag of one native method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagSignature {
    pub args: Vec<TypeTag>,
    pub ret: TypeTag,
}

impl TagSignature {
    pub fn new(args: Vec<TypeTag>, ret: TypeTag) -> CodegenResult<Self> {
        if args.contains(&TypeTag::Void) {
            return Err(CodegenError::signature(
                &render_tags(&args),
                "void is only valid as a return tag",
            ));
        }
        Ok(Self { args, ret })
    }

    /// Parses the compact form, e.g. `("ppi", 'p')`.
    pub fn parse_tags(args: &str, ret: char) -> CodegenResult<Self> {
        let mut tags = Vec::with_capacity(args.len());
        for tag in args.chars() {
            let parsed = TypeTag::from_char(tag)
                .ok_or_else(|| CodegenError::signature(args, format!("unknown type tag '{tag}'")))?;
            tags.push(parsed);
        }
        let ret = TypeTag::from_char(ret)
            .ok_or_else(|| CodegenError::signature(args, format!("unknown return tag '{ret}'")))?;
        Self::new(tags, ret)
    }

    /// Native methods receive the environment pointer and the receiver (or class)
    /// reference ahead of the declared arguments.
    pub fn with_jni_prefix(&self) -> TagSignature {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        args.push(TypeTag::Pointer);
        args.push(TypeTag::Pointer);
        args.extend_from_slice(&self.args);
        TagSignature {
            args,
            ret: self.ret,
        }
    }

    /// Format string handed to the emulator: one letter per argument.
    pub fn tag_string(&self) -> String {
        render_tags(&self.args)
    }
}

impl std::fmt::Display for TagSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}){}", self.tag_string(), self.ret)
    }
}

fn render_tags(tags: &[TypeTag]) -> String {
    tags.iter().map(|tag| tag.as_char()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_letters_are_unique_and_parse_back() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_char(tag.as_char()), Some(tag));
        }
        assert_eq!(TypeTag::from_char('x'), None);
    }

    #[test]
    fn jni_prefix_adds_env_and_receiver() {
        let signature = TagSignature::parse_tags("if", 'v').expect("tags should parse");
        let prefixed = signature.with_jni_prefix();
        assert_eq!(prefixed.tag_string(), "ppif");
        assert_eq!(prefixed.ret, TypeTag::Void);
        assert_eq!(prefixed.to_string(), "(ppif)v");
    }

    #[test]
    fn void_argument_is_rejected() {
        let err = TagSignature::parse_tags("iv", 'i').expect_err("void arg should fail");
        assert!(matches!(err, CodegenError::MalformedSignature { .. }));
    }
}
