//! Builtin I/O routines.
//!
//! These are injected into the identifier table's global scope before any
//! user declaration is parsed, and their bodies are emitted into the
//! artifact ahead of user code. They are addressed through the exact same
//! calling convention as user procedures; nothing about a call site knows
//! or cares that the callee is a builtin.

use crate::emitter::CodeEmitter;
use crate::symbols::{DataType, Identifier, Parameter, ParamDirection, Storage, SymbolTable};

/// Kind tag used by the emitter to decide which routine body to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    ReadInteger,
    WriteInteger,
    ReadFloat,
    WriteFloat,
    ReadBool,
    WriteBool,
    /// Reads a word into the heap region; the only consumer of HP.
    ReadString,
    WriteString,
}

/// Metadata for one builtin symbol. Every builtin takes exactly one
/// parameter: reads produce an `out`, writes consume an `in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub param_type: DataType,
    pub direction: ParamDirection,
    pub kind: BuiltinKind,
}

/// The complete, fixed set of builtins.
pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: "getInteger",
        param_type: DataType::Integer,
        direction: ParamDirection::Out,
        kind: BuiltinKind::ReadInteger,
    },
    BuiltinDescriptor {
        name: "putInteger",
        param_type: DataType::Integer,
        direction: ParamDirection::In,
        kind: BuiltinKind::WriteInteger,
    },
    BuiltinDescriptor {
        name: "getFloat",
        param_type: DataType::Float,
        direction: ParamDirection::Out,
        kind: BuiltinKind::ReadFloat,
    },
    BuiltinDescriptor {
        name: "putFloat",
        param_type: DataType::Float,
        direction: ParamDirection::In,
        kind: BuiltinKind::WriteFloat,
    },
    BuiltinDescriptor {
        name: "getBool",
        param_type: DataType::Bool,
        direction: ParamDirection::Out,
        kind: BuiltinKind::ReadBool,
    },
    BuiltinDescriptor {
        name: "putBool",
        param_type: DataType::Bool,
        direction: ParamDirection::In,
        kind: BuiltinKind::WriteBool,
    },
    BuiltinDescriptor {
        name: "getString",
        param_type: DataType::Str,
        direction: ParamDirection::Out,
        kind: BuiltinKind::ReadString,
    },
    BuiltinDescriptor {
        name: "putString",
        param_type: DataType::Str,
        direction: ParamDirection::In,
        kind: BuiltinKind::WriteString,
    },
];

/// Register every builtin in the (still empty) global scope and emit its
/// body. Called once per compilation, before parsing begins.
pub fn install(table: &mut SymbolTable, emitter: &mut CodeEmitter) {
    for descriptor in BUILTINS {
        let entry = emitter.new_label();
        let identifier = Identifier {
            name: descriptor.name.to_string(),
            ty: DataType::Procedure,
            storage: Storage::Label(entry),
            params: Some(vec![Parameter {
                name: "value".to_string(),
                ty: descriptor.param_type,
                direction: descriptor.direction,
            }]),
        };
        table
            .add(identifier, false)
            .expect("builtin names are unique");
        emitter.emit_builtin_body(descriptor.kind, entry, descriptor.name);
    }
}
