//! Code emitter: owns the output buffer, every compile-time allocator,
//! and the calling-convention/addressing logic.
//!
//! The artifact is one portable C translation unit built on exactly three
//! storage abstractions: the main-memory array `MM`, the register array
//! `R` (with `R[0..3]` wired to FP/SP/HP), and the float scratch cells
//! `F0`/`F1`. All user-level control flow, including procedure call and
//! return, is labels and `goto`s inside a single `main`.
//!
//! Allocators are monotonic and never reused within one compilation; a
//! fresh `CodeEmitter` is constructed per job.

use crate::builtins::BuiltinKind;
use crate::symbols::{DataType, LabelId, Region};

/// Size of the main-memory array. Globals grow down from the top,
/// the call stack lives below them, and the string heap grows up
/// from just past the literal pool.
pub const MM_SIZE: u32 = 65536;

/// Size of the register array; registers are never reclaimed.
pub const REG_SIZE: u32 = 16384;

/// First register available to expression evaluation; `R[0..3]` are
/// the frame, stack, and heap pointers.
const FIRST_GENERAL_REG: u32 = 3;

/// Binary operators the emitter knows how to lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinOp {
    fn c_op(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }

}

/// Per-frame stack offset counters. Both start at 1: the cell at the
/// frame pointer itself holds the return address, and `FP + 1` holds
/// the caller's saved frame pointer.
#[derive(Debug, Clone, Copy)]
struct FrameOffsets {
    locals: u32,
    params: u32,
}

impl FrameOffsets {
    fn new() -> Self {
        FrameOffsets { locals: 1, params: 1 }
    }
}

#[derive(Debug)]
pub struct CodeEmitter {
    buf: String,
    indent: usize,
    annotate: bool,

    next_reg: u32,
    last_reg: u32,
    frames: Vec<FrameOffsets>,
    globals: u32,
    next_label: LabelId,
    next_call_site: u32,
    call_sites: Vec<u32>,

    /// Interned string literals: (MM base address, content).
    pool: Vec<(u32, String)>,
    pool_next: u32,

    entry: Option<LabelId>,
}

impl CodeEmitter {
    pub fn new(annotate: bool) -> Self {
        CodeEmitter {
            buf: String::new(),
            indent: 1,
            annotate,
            next_reg: FIRST_GENERAL_REG,
            last_reg: FIRST_GENERAL_REG,
            frames: vec![FrameOffsets::new()],
            globals: 0,
            next_label: 0,
            next_call_site: 0,
            call_sites: Vec::new(),
            pool: Vec::new(),
            pool_next: 0,
            entry: None,
        }
    }

    // ------------------------------------------------------------------
    // Allocators
    // ------------------------------------------------------------------

    pub fn fresh_register(&mut self) -> u32 {
        let reg = self.next_reg;
        self.next_reg += 1;
        self.last_reg = reg;
        reg
    }

    /// The register holding the value most recently produced.
    pub fn last_register(&self) -> u32 {
        self.last_reg
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Allocate a call-site id; each one becomes a `case` in the shared
    /// return dispatcher.
    pub fn new_call_site(&mut self) -> u32 {
        let site = self.next_call_site;
        self.next_call_site += 1;
        self.call_sites.push(site);
        site
    }

    /// Reserve the next free stack slot(s) for a declared variable or
    /// parameter of the current frame. Returns the assigned offset.
    pub fn reserve(&mut self, size: u32, is_param: bool) -> u32 {
        let frame = self
            .frames
            .last_mut()
            .expect("a frame is always open");
        if is_param {
            let offset = frame.params;
            frame.params += size;
            offset
        } else {
            let offset = frame.locals;
            frame.locals += size;
            offset
        }
    }

    /// Reserve cells in the global region at the top of main memory.
    pub fn reserve_global(&mut self, size: u32) -> u32 {
        let offset = self.globals;
        self.globals += size;
        offset
    }

    /// Open a fresh pair of offset counters on entering a program or
    /// procedure body.
    pub fn begin_frame(&mut self) {
        self.frames.push(FrameOffsets::new());
    }

    pub fn end_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Number of local cells reserved in the current frame, for the
    /// prologue's stack adjustment.
    pub fn locals_reserved(&self) -> u32 {
        self.frames
            .last()
            .map(|f| f.locals - 1)
            .unwrap_or(0)
    }

    /// Intern a string literal into the pool materialized at startup.
    /// Returns the MM address of its first character.
    pub fn intern_string(&mut self, text: &str) -> u32 {
        let base = self.pool_next;
        self.pool_next += text.len() as u32 + 1;
        self.pool.push((base, text.to_string()));
        base
    }

    /// Entry label of the top-level program; the header jumps here.
    pub fn set_entry(&mut self, label: LabelId) {
        self.entry = Some(label);
    }

    // ------------------------------------------------------------------
    // Low-level text output
    // ------------------------------------------------------------------

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    /// Non-semantic explanatory comment; emitted only in debug mode.
    pub fn comment(&mut self, text: &str) {
        if self.annotate {
            self.line(&format!("/* {text} */"));
        }
    }

    // ------------------------------------------------------------------
    // Addressing
    // ------------------------------------------------------------------

    /// Main-memory index expression for a declared identifier, with an
    /// optional register-held array index. The index moves away from
    /// the frame pointer in the region's growth direction.
    fn address(&self, region: Region, offset: u32, index: Option<u32>) -> String {
        let base = match region {
            Region::Global => format!("MM_SIZE - 1 - {offset}"),
            Region::Local => format!("FP - {offset}"),
            Region::Param => format!("FP + {}", offset + 1),
        };
        match index {
            None => base,
            Some(reg) => match region {
                Region::Param => format!("{base} + R[{reg}]"),
                Region::Global | Region::Local => format!("{base} - R[{reg}]"),
            },
        }
    }

    // ------------------------------------------------------------------
    // Loads, stores, literals
    // ------------------------------------------------------------------

    pub fn emit_load(&mut self, region: Region, offset: u32, index: Option<u32>) -> u32 {
        let addr = self.address(region, offset, index);
        let reg = self.fresh_register();
        self.line(&format!("R[{reg}] = MM[{addr}];"));
        reg
    }

    pub fn emit_store(&mut self, region: Region, offset: u32, index: Option<u32>, src: u32) {
        let addr = self.address(region, offset, index);
        self.line(&format!("MM[{addr}] = R[{src}];"));
    }

    pub fn emit_load_int(&mut self, value: i32) -> u32 {
        let reg = self.fresh_register();
        self.line(&format!("R[{reg}] = {value};"));
        reg
    }

    pub fn emit_load_bool(&mut self, value: bool) -> u32 {
        self.emit_load_int(if value { 1 } else { 0 })
    }

    pub fn emit_load_float(&mut self, value: f32) -> u32 {
        let reg = self.fresh_register();
        let literal = float_literal(value);
        self.line(&format!("R[{reg}] = FTOI({literal});"));
        reg
    }

    /// A string value is the MM address of its first character.
    pub fn emit_load_string(&mut self, base: u32) -> u32 {
        let reg = self.fresh_register();
        self.line(&format!("R[{reg}] = {base};"));
        reg
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Lower a binary operator. If either static type is float, both
    /// operands are routed through the float scratch cells and the raw
    /// result is copied back into an ordinary register; the register
    /// file itself stays untyped.
    pub fn emit_binary_op(
        &mut self,
        reg1: u32,
        type1: DataType,
        reg2: u32,
        type2: DataType,
        op: BinOp,
    ) -> u32 {
        if type1 == DataType::Float || type2 == DataType::Float {
            // Only arithmetic reaches this path: relational and logical
            // operators reject float operands during analysis.
            self.route_to_scratch("F0", reg1, type1);
            self.route_to_scratch("F1", reg2, type2);
            let result = self.fresh_register();
            self.line(&format!("R[{result}] = FTOI(F0 {} F1);", op.c_op()));
            result
        } else {
            let result = self.fresh_register();
            self.line(&format!("R[{result}] = R[{reg1}] {} R[{reg2}];", op.c_op()));
            result
        }
    }

    fn route_to_scratch(&mut self, cell: &str, reg: u32, ty: DataType) {
        if ty == DataType::Float {
            self.line(&format!("{cell} = ITOF(R[{reg}]);"));
        } else {
            self.line(&format!("{cell} = (float)R[{reg}];"));
        }
    }

    pub fn emit_not(&mut self, reg: u32, ty: DataType) -> u32 {
        let result = self.fresh_register();
        if ty == DataType::Bool {
            self.line(&format!("R[{result}] = !R[{reg}];"));
        } else {
            self.line(&format!("R[{result}] = ~R[{reg}];"));
        }
        result
    }

    pub fn emit_negate(&mut self, reg: u32, ty: DataType) -> u32 {
        if ty == DataType::Float {
            self.line(&format!("F0 = ITOF(R[{reg}]);"));
            let result = self.fresh_register();
            self.line(&format!("R[{result}] = FTOI(-F0);"));
            result
        } else {
            let result = self.fresh_register();
            self.line(&format!("R[{result}] = -R[{reg}];"));
            result
        }
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    pub fn emit_label(&mut self, label: LabelId) {
        self.buf.push_str(&format!("L{label}:;\n"));
    }

    pub fn emit_jump(&mut self, label: LabelId) {
        self.line(&format!("goto L{label};"));
    }

    pub fn emit_branch_if_false(&mut self, cond: u32, label: LabelId) {
        self.line(&format!("if (R[{cond}] == 0) goto L{label};"));
    }

    /// Entry of a program or procedure body: its unique label, then the
    /// prologue that claims space for the frame's declared locals.
    pub fn emit_frame_entry(&mut self, label: LabelId, name: &str) {
        self.emit_label(label);
        self.comment(&format!("entry of '{name}'"));
        let locals = self.locals_reserved();
        if locals > 0 {
            self.line(&format!("SP = SP - {locals};"));
        }
    }

    /// Push one register onto the call stack.
    pub fn emit_push(&mut self, reg: u32) {
        self.line(&format!("MM[SP] = R[{reg}];"));
        self.line("SP = SP - 1;");
    }

    /// The call sequence proper. Arguments have already been pushed,
    /// last parameter first, so the first parameter sits at `FP + 2`.
    pub fn emit_call(&mut self, callee_entry: LabelId, site: u32, callee_name: &str) {
        self.comment(&format!("call '{callee_name}' (site {site})"));
        self.line("MM[SP] = FP;");
        self.line("SP = SP - 1;");
        self.line("FP = SP;");
        self.line(&format!("MM[SP] = {site};"));
        self.line("SP = SP - 1;");
        self.line(&format!("goto L{callee_entry};"));
        self.buf.push_str(&format!("CS{site}:;\n"));
    }

    /// After control comes back: restore the caller's frame pointer,
    /// then pop each parameter in declaration order, copying popped
    /// values of `out` parameters into their bound identifiers.
    pub fn emit_call_epilogue(&mut self, store_backs: &[Option<(Region, u32)>]) {
        self.line("SP = SP + 1;");
        self.line("FP = MM[SP];");
        for store_back in store_backs {
            self.line("SP = SP + 1;");
            if let Some((region, offset)) = store_back {
                let addr = self.address(*region, *offset, None);
                self.line(&format!("MM[{addr}] = MM[SP];"));
            }
        }
    }

    /// Return from a procedure: discard locals, then transfer through
    /// the word stored at the frame pointer via the shared dispatcher.
    pub fn emit_return(&mut self) {
        self.line("SP = FP;");
        self.line("goto RET;");
    }

    /// End of the top-level program (explicit `return` or fall-through).
    pub fn emit_program_exit(&mut self) {
        self.line("exit(0);");
    }

    // ------------------------------------------------------------------
    // Builtin routine bodies
    // ------------------------------------------------------------------

    /// Emit the body of one builtin I/O routine. Builtins use the same
    /// frame layout as user procedures: one parameter at `FP + 2`,
    /// no locals.
    pub fn emit_builtin_body(&mut self, kind: BuiltinKind, entry: LabelId, name: &str) {
        self.emit_label(entry);
        self.comment(&format!("builtin '{name}'"));
        match kind {
            BuiltinKind::ReadInteger => {
                self.line("if (scanf(\"%d\", &MM[FP + 2]) != 1) MM[FP + 2] = 0;");
            }
            BuiltinKind::WriteInteger => {
                self.line("printf(\"%d\\n\", MM[FP + 2]);");
            }
            BuiltinKind::ReadFloat => {
                self.line("if (scanf(\"%f\", &F0) != 1) F0 = 0;");
                self.line("MM[FP + 2] = FTOI(F0);");
            }
            BuiltinKind::WriteFloat => {
                self.line("F0 = ITOF(MM[FP + 2]);");
                self.line("printf(\"%g\\n\", F0);");
            }
            BuiltinKind::ReadBool => {
                self.line("if (scanf(\"%d\", &MM[FP + 2]) != 1) MM[FP + 2] = 0;");
                self.line("MM[FP + 2] = (MM[FP + 2] != 0);");
            }
            BuiltinKind::WriteBool => {
                self.line("printf(\"%s\\n\", MM[FP + 2] ? \"true\" : \"false\");");
            }
            BuiltinKind::ReadString => {
                // Reads into the heap region; the out parameter receives
                // the address of the first character.
                let cursor = self.fresh_register();
                self.line("MM[FP + 2] = HP;");
                self.line("{");
                self.line("    char buf[256];");
                self.line(&format!("    R[{cursor}] = 0;"));
                self.line("    if (scanf(\"%255s\", buf) != 1) buf[0] = 0;");
                self.line(&format!("    while (buf[R[{cursor}]] != 0) {{"));
                self.line(&format!("        MM[HP] = buf[R[{cursor}]];"));
                self.line("        HP = HP + 1;");
                self.line(&format!("        R[{cursor}] = R[{cursor}] + 1;"));
                self.line("    }");
                self.line("    MM[HP] = 0;");
                self.line("    HP = HP + 1;");
                self.line("}");
            }
            BuiltinKind::WriteString => {
                let cursor = self.fresh_register();
                self.line(&format!("R[{cursor}] = MM[FP + 2];"));
                self.line(&format!("while (MM[R[{cursor}]] != 0) {{"));
                self.line(&format!("    putchar(MM[R[{cursor}]]);"));
                self.line(&format!("    R[{cursor}] = R[{cursor}] + 1;"));
                self.line("}");
                self.line("putchar('\\n');");
            }
        }
        self.emit_return();
    }

    // ------------------------------------------------------------------
    // Final assembly
    // ------------------------------------------------------------------

    /// Assemble header, accumulated body, and return dispatcher into the
    /// finished artifact. A no-op (returns `None`) when the compilation
    /// recorded any error.
    pub fn commit(self, had_errors: bool) -> Option<String> {
        if had_errors {
            return None;
        }

        let mut out = String::new();
        out.push_str("/* Generated by adelie. Do not edit. */\n");
        out.push_str("#include <stdio.h>\n");
        out.push_str("#include <stdlib.h>\n");
        out.push_str("#include <string.h>\n\n");
        out.push_str(&format!("#define MM_SIZE {MM_SIZE}\n"));
        out.push_str(&format!("#define REG_SIZE {REG_SIZE}\n\n"));
        out.push_str("static int MM[MM_SIZE];\n");
        out.push_str("static int R[REG_SIZE];\n");
        out.push_str("static float F0, F1;\n\n");
        out.push_str("#define FP R[0]\n");
        out.push_str("#define SP R[1]\n");
        out.push_str("#define HP R[2]\n\n");
        out.push_str("static int FTOI(float f) { int i; memcpy(&i, &f, sizeof i); return i; }\n");
        out.push_str("static float ITOF(int i) { float f; memcpy(&f, &i, sizeof f); return f; }\n\n");
        out.push_str("int main(void) {\n");

        // String literal pool at the bottom of main memory.
        for (base, text) in &self.pool {
            if self.annotate {
                out.push_str(&format!("    /* string literal at {base}: {text:?} */\n"));
            }
            for (i, byte) in text.bytes().enumerate() {
                out.push_str(&format!("    MM[{}] = {};\n", base + i as u32, byte));
            }
            out.push_str(&format!("    MM[{}] = 0;\n", base + text.len() as u32));
        }
        out.push_str(&format!("    HP = {};\n", self.pool_next));

        // Stack base sits just below the global region.
        out.push_str(&format!("    SP = MM_SIZE - 1 - {};\n", self.globals));
        out.push_str("    FP = SP;\n");
        if let Some(entry) = self.entry {
            out.push_str(&format!("    goto L{entry};\n"));
        } else {
            out.push_str("    exit(0);\n");
        }
        out.push('\n');

        out.push_str(&self.buf);

        // Shared return dispatcher: transfer indirectly through the word
        // stored at the frame pointer.
        out.push_str("\nRET:;\n");
        if !self.call_sites.is_empty() {
            out.push_str("    switch (MM[FP]) {\n");
            for site in &self.call_sites {
                out.push_str(&format!("    case {site}: goto CS{site};\n"));
            }
            out.push_str("    }\n");
        }
        out.push_str("    fprintf(stderr, \"corrupt return address\\n\");\n");
        out.push_str("    exit(2);\n");
        out.push_str("}\n");

        Some(out)
    }
}

fn float_literal(value: f32) -> String {
    if value.is_finite() {
        format!("{value:?}f")
    } else {
        "0.0f".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_monotonic_and_never_reused() {
        let mut emitter = CodeEmitter::new(false);
        let a = emitter.fresh_register();
        let b = emitter.fresh_register();
        assert_eq!(a, FIRST_GENERAL_REG);
        assert_eq!(b, a + 1);
        assert_eq!(emitter.last_register(), b);
    }

    #[test]
    fn frame_offsets_reset_per_frame() {
        let mut emitter = CodeEmitter::new(false);
        emitter.begin_frame();
        assert_eq!(emitter.reserve(1, false), 1);
        assert_eq!(emitter.reserve(4, false), 2); // array takes 4 slots
        assert_eq!(emitter.reserve(1, false), 6);
        assert_eq!(emitter.reserve(1, true), 1); // params count separately
        assert_eq!(emitter.locals_reserved(), 6);

        emitter.begin_frame();
        assert_eq!(emitter.reserve(1, false), 1);
        emitter.end_frame();

        // The outer frame resumes where it left off.
        assert_eq!(emitter.reserve(1, false), 7);
    }

    #[test]
    fn address_formulas() {
        let emitter = CodeEmitter::new(false);
        assert_eq!(emitter.address(Region::Local, 2, None), "FP - 2");
        assert_eq!(emitter.address(Region::Param, 1, None), "FP + 2");
        assert_eq!(emitter.address(Region::Global, 0, None), "MM_SIZE - 1 - 0");
        assert_eq!(emitter.address(Region::Local, 2, Some(7)), "FP - 2 - R[7]");
        assert_eq!(emitter.address(Region::Param, 1, Some(7)), "FP + 2 + R[7]");
        assert_eq!(
            emitter.address(Region::Global, 3, Some(7)),
            "MM_SIZE - 1 - 3 - R[7]"
        );
    }

    #[test]
    fn float_operand_routes_through_scratch_cells() {
        let mut emitter = CodeEmitter::new(false);
        let a = emitter.emit_load_int(1);
        let b = emitter.emit_load_float(2.5);
        emitter.emit_binary_op(a, DataType::Integer, b, DataType::Float, BinOp::Add);
        assert!(emitter.buf.contains("F0 = (float)R["));
        assert!(emitter.buf.contains("F1 = ITOF(R["));
        assert!(emitter.buf.contains("FTOI(F0 + F1)"));
    }

    #[test]
    fn integer_operands_never_touch_scratch_cells() {
        let mut emitter = CodeEmitter::new(false);
        let a = emitter.emit_load_int(1);
        let b = emitter.emit_load_int(2);
        emitter.emit_binary_op(a, DataType::Integer, b, DataType::Integer, BinOp::Add);
        assert!(!emitter.buf.contains("F0"));
        assert!(!emitter.buf.contains("F1"));
    }

    #[test]
    fn call_sites_are_distinct_and_dispatched() {
        let mut emitter = CodeEmitter::new(false);
        let entry = emitter.new_label();
        emitter.set_entry(entry);
        emitter.emit_label(entry);
        let s1 = emitter.new_call_site();
        let s2 = emitter.new_call_site();
        assert_ne!(s1, s2);
        emitter.emit_call(entry, s1, "p");
        emitter.emit_call(entry, s2, "p");
        let text = emitter.commit(false).expect("no errors recorded");
        assert!(text.contains("CS0:;"));
        assert!(text.contains("CS1:;"));
        assert!(text.contains("case 0: goto CS0;"));
        assert!(text.contains("case 1: goto CS1;"));
    }

    #[test]
    fn commit_is_a_no_op_after_errors() {
        let mut emitter = CodeEmitter::new(false);
        emitter.emit_load_int(1);
        assert!(emitter.commit(true).is_none());
    }

    #[test]
    fn string_pool_is_materialized_before_entry() {
        let mut emitter = CodeEmitter::new(false);
        let base = emitter.intern_string("hi");
        assert_eq!(base, 0);
        let second = emitter.intern_string("x");
        assert_eq!(second, 3); // 'h' 'i' NUL
        let text = emitter.commit(false).expect("artifact");
        assert!(text.contains("MM[0] = 104;"));
        assert!(text.contains("MM[1] = 105;"));
        assert!(text.contains("MM[2] = 0;"));
        assert!(text.contains("HP = 5;"));
    }

    #[test]
    fn comments_only_in_annotate_mode() {
        let mut quiet = CodeEmitter::new(false);
        quiet.comment("hello");
        assert!(quiet.buf.is_empty());

        let mut chatty = CodeEmitter::new(true);
        chatty.comment("hello");
        assert!(chatty.buf.contains("/* hello */"));
    }
}
