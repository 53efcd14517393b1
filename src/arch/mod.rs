pub mod x86_64;

pub use x86_64::{
    decode_callsite, decode_variant_kind, emit_jump, emit_patched_callsite, CallsiteKind,
    VariantKind,
};
