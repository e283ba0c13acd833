mod aarch64;
pub mod descriptor;
pub mod error;
pub mod mangle;
pub mod pages;
pub mod trampoline;
pub mod types;

pub use descriptor::{decode_descriptor, encode_descriptor};
pub use error::{CodegenError, CodegenResult};
pub use mangle::{MAX_SYMBOL_LEN, SymbolIdentity, demangle, mangle};
pub use pages::{ExecutablePage, Trampoline, TrampolinePages};
pub use trampoline::{
    ArgPlacement, CallPlan, FrameLayout, FrameShape, Location, TrampolineTarget, assemble,
    generate, plan_call,
};
pub use types::{RegisterClass, TagSignature, TypeTag};
