//! Stack-machine listings of a submission, for inspecting what the REPL runs.
//!
//! The listing is produced from the unit as [`wrap_plain`] builds it, so the
//! keyword rewrites the executor applies never show up. Instructions are two
//! bytes wide; jump arguments name the absolute target offset.

use std::{fmt, rc::Rc};

use strum::IntoStaticStr;

use crate::{
    expressions::{
        BoolOperator, CallArg, CallKwarg, ClassDef, CmpOperator, Comprehension, ConversionFlag, DictItem, Expr,
        ExprLoc, FStringPart, FunctionDef, Literal, Node, Operator, StmtLoc, Target, Try, UnaryOperator,
    },
    parse::ParseError,
    prepare::ScopeInfo,
    transform::wrap_plain,
    value::{float_repr, str_repr},
};

const INSTRUCTION_SIZE: usize = 2;

/// Wraps `source` the way the executor would, minus the rewrites, and lists
/// the resulting function's instructions.
///
/// Each row is `<line> <offset> <OPNAME> <arg>`; a blank row separates
/// instructions belonging to different source lines.
pub fn disassemble(source: &str, arg_names: &[&str]) -> Result<Vec<String>, ParseError> {
    let unit = wrap_plain(source, arg_names)?;
    let function = unit.function();
    let mut lowering = Lowering::new(&function.scope, function.position.start().line);
    lowering.emit(Opcode::ReturnGenerator);
    lowering.emit(Opcode::PopTop);
    lowering.emit_int(Opcode::Resume, 0);
    lowering.block(&function.body);
    let returned = lowering
        .instructions
        .last()
        .is_some_and(|last| matches!(last.op, Opcode::ReturnValue | Opcode::ReturnConst));
    if !returned {
        lowering.emit_text(Opcode::ReturnConst, "None");
    }
    Ok(lowering.listing())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum Opcode {
    Nop,
    PopTop,
    Copy,
    Swap,
    Resume,
    ReturnGenerator,
    ReturnValue,
    ReturnConst,
    LoadConst,
    LoadFast,
    StoreFast,
    DeleteFast,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    BuildSlice,
    BinaryOp,
    UnaryNot,
    UnaryNegative,
    UnaryInvert,
    CallIntrinsic1,
    CompareOp,
    IsOp,
    ContainsOp,
    BuildList,
    BuildTuple,
    BuildMap,
    BuildString,
    ListAppend,
    ListExtend,
    MapAdd,
    DictUpdate,
    DictMerge,
    ConvertValue,
    FormatSimple,
    FormatWithSpec,
    UnpackSequence,
    UnpackEx,
    Call,
    CallKw,
    CallFunctionEx,
    MakeFunction,
    SetFunctionAttribute,
    LoadBuildClass,
    GetIter,
    GetAiter,
    GetAnext,
    GetAwaitable,
    GetYieldFromIter,
    ForIter,
    EndFor,
    EndAsyncFor,
    Send,
    EndSend,
    YieldValue,
    JumpForward,
    JumpBackward,
    JumpBackwardNoInterrupt,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    PushExcInfo,
    CheckExcMatch,
    PopExcept,
    Reraise,
    RaiseVarargs,
    LoadAssertionError,
    ImportName,
}

#[derive(Debug, Clone)]
enum Arg {
    None,
    Int(usize),
    Text(String),
    Jump(usize),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
            Self::Jump(target) => write!(f, "to {target}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Instruction {
    op: Opcode,
    arg: Arg,
    line: u32,
}

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy)]
#[must_use]
struct JumpLabel(usize);

#[derive(Debug)]
struct Loop {
    start: usize,
    breaks: Vec<JumpLabel>,
}

#[derive(Clone, Copy)]
enum Access {
    Load,
    Store,
    Delete,
}

enum Element<'a> {
    List(&'a ExprLoc),
    Dict(&'a ExprLoc, &'a ExprLoc),
}

struct Lowering<'a> {
    scope: &'a ScopeInfo,
    /// Names bound by the comprehensions currently being lowered.
    comprehension_names: Vec<Rc<str>>,
    instructions: Vec<Instruction>,
    loops: Vec<Loop>,
    line: u32,
}

impl<'a> Lowering<'a> {
    fn new(scope: &'a ScopeInfo, line: u32) -> Self {
        Self {
            scope,
            comprehension_names: Vec::new(),
            instructions: Vec::new(),
            loops: Vec::new(),
            line,
        }
    }

    fn listing(&self) -> Vec<String> {
        let mut rows = Vec::with_capacity(self.instructions.len());
        let mut previous_line = None;
        for (index, instruction) in self.instructions.iter().enumerate() {
            if previous_line.is_some_and(|line| line != instruction.line) {
                rows.push(String::new());
            }
            previous_line = Some(instruction.line);
            let name: &'static str = instruction.op.into();
            let row = format!(
                "{:>4} {:>6} {:<24} {}",
                instruction.line,
                index * INSTRUCTION_SIZE,
                name,
                instruction.arg
            );
            rows.push(row.trim_end().to_owned());
        }
        rows
    }

    // emission

    fn push(&mut self, op: Opcode, arg: Arg) {
        self.instructions.push(Instruction {
            op,
            arg,
            line: self.line,
        });
    }

    fn emit(&mut self, op: Opcode) {
        self.push(op, Arg::None);
    }

    fn emit_int(&mut self, op: Opcode, value: usize) {
        self.push(op, Arg::Int(value));
    }

    fn emit_text(&mut self, op: Opcode, text: impl Into<String>) {
        self.push(op, Arg::Text(text.into()));
    }

    fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let label = JumpLabel(self.instructions.len());
        self.push(op, Arg::Jump(0));
        label
    }

    fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.current_offset();
        if let Some(instruction) = self.instructions.get_mut(label.0) {
            instruction.arg = Arg::Jump(target);
        }
    }

    fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        self.push(op, Arg::Jump(target));
    }

    fn current_offset(&self) -> usize {
        self.instructions.len() * INSTRUCTION_SIZE
    }

    fn name(&mut self, name: &Rc<str>, access: Access) {
        let op = if self.comprehension_names.contains(name) || self.scope.binds(name) {
            match access {
                Access::Load => Opcode::LoadFast,
                Access::Store => Opcode::StoreFast,
                Access::Delete => Opcode::DeleteFast,
            }
        } else if self.scope.nonlocals.contains(name) {
            match access {
                Access::Load => Opcode::LoadDeref,
                Access::Store => Opcode::StoreDeref,
                Access::Delete => Opcode::DeleteDeref,
            }
        } else {
            match access {
                Access::Load => Opcode::LoadGlobal,
                Access::Store => Opcode::StoreGlobal,
                Access::Delete => Opcode::DeleteGlobal,
            }
        };
        self.emit_text(op, name.as_ref());
    }

    // statements

    fn block(&mut self, body: &[StmtLoc]) {
        for stmt in body {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &StmtLoc) {
        self.line = stmt.position.start().line;
        match &stmt.node {
            Node::Pass => self.emit(Opcode::Nop),
            Node::Expr(value) => {
                self.expr(value);
                self.emit(Opcode::PopTop);
            }
            Node::Return(None) => self.emit_text(Opcode::ReturnConst, "None"),
            Node::Return(Some(value)) => {
                self.expr(value);
                self.emit(Opcode::ReturnValue);
            }
            Node::Assign { targets, value } => {
                self.expr(value);
                for (index, target) in targets.iter().enumerate() {
                    if index + 1 < targets.len() {
                        self.emit_int(Opcode::Copy, 1);
                    }
                    self.store(target);
                }
            }
            Node::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            Node::AnnAssign {
                target,
                value: Some(value),
            } => {
                self.expr(value);
                self.store(target);
            }
            Node::AnnAssign { value: None, .. } | Node::Global(_) | Node::Nonlocal(_) => {}
            Node::Delete(targets) => {
                for target in targets {
                    self.delete(target);
                }
            }
            Node::If { test, body, or_else } => {
                self.expr(test);
                let otherwise = self.emit_jump(Opcode::PopJumpIfFalse);
                self.block(body);
                if or_else.is_empty() {
                    self.patch_jump(otherwise);
                } else {
                    let end = self.emit_jump(Opcode::JumpForward);
                    self.patch_jump(otherwise);
                    self.block(or_else);
                    self.patch_jump(end);
                }
            }
            Node::While { test, body, or_else } => {
                let start = self.current_offset();
                self.loops.push(Loop {
                    start,
                    breaks: Vec::new(),
                });
                self.expr(test);
                let exit = self.emit_jump(Opcode::PopJumpIfFalse);
                self.block(body);
                self.emit_jump_to(Opcode::JumpBackward, start);
                self.patch_jump(exit);
                self.finish_loop(or_else);
            }
            Node::For {
                target,
                iter,
                body,
                or_else,
                is_async,
            } => {
                self.expr(iter);
                self.emit(if *is_async { Opcode::GetAiter } else { Opcode::GetIter });
                let start = self.current_offset();
                self.loops.push(Loop {
                    start,
                    breaks: Vec::new(),
                });
                let exit = if *is_async {
                    self.emit(Opcode::GetAnext);
                    self.send_loop();
                    None
                } else {
                    Some(self.emit_jump(Opcode::ForIter))
                };
                self.store(target);
                self.block(body);
                self.emit_jump_to(Opcode::JumpBackward, start);
                match exit {
                    Some(exit) => {
                        self.patch_jump(exit);
                        self.emit(Opcode::EndFor);
                    }
                    None => self.emit(Opcode::EndAsyncFor),
                }
                self.finish_loop(or_else);
            }
            Node::Break => {
                if self.loops.is_empty() {
                    self.emit(Opcode::Nop);
                } else {
                    let label = self.emit_jump(Opcode::JumpForward);
                    if let Some(current) = self.loops.last_mut() {
                        current.breaks.push(label);
                    }
                }
            }
            Node::Continue => match self.loops.last().map(|current| current.start) {
                Some(start) => self.emit_jump_to(Opcode::JumpBackward, start),
                None => self.emit(Opcode::Nop),
            },
            Node::Try(try_block) => self.try_block(try_block),
            Node::Raise { exc, cause } => match (exc, cause) {
                (None, _) => self.emit_int(Opcode::RaiseVarargs, 0),
                (Some(exc), None) => {
                    self.expr(exc);
                    self.emit_int(Opcode::RaiseVarargs, 1);
                }
                (Some(exc), Some(cause)) => {
                    self.expr(exc);
                    self.expr(cause);
                    self.emit_int(Opcode::RaiseVarargs, 2);
                }
            },
            Node::Assert { test, msg } => {
                self.expr(test);
                let end = self.emit_jump(Opcode::PopJumpIfTrue);
                self.emit(Opcode::LoadAssertionError);
                if let Some(msg) = msg {
                    self.expr(msg);
                    self.emit_int(Opcode::Call, 0);
                }
                self.emit_int(Opcode::RaiseVarargs, 1);
                self.patch_jump(end);
            }
            Node::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.expr(decorator);
                }
                self.make_function(def);
                for _ in &def.decorators {
                    self.emit_int(Opcode::Call, 0);
                }
                self.name(&def.name, Access::Store);
            }
            Node::ClassDef(class) => self.class(class),
            Node::Import(module) => {
                self.emit_text(Opcode::LoadConst, "0");
                self.emit_text(Opcode::LoadConst, "None");
                self.emit_text(Opcode::ImportName, module.as_ref());
                let top: Rc<str> = module.split('.').next().unwrap_or(&**module).into();
                self.name(&top, Access::Store);
            }
        }
    }

    /// Pops the innermost loop, lowers its `else` and lands its breaks after it.
    fn finish_loop(&mut self, or_else: &[StmtLoc]) {
        let finished = self.loops.pop();
        self.block(or_else);
        for label in finished.map(|current| current.breaks).unwrap_or_default() {
            self.patch_jump(label);
        }
    }

    fn try_block(&mut self, try_block: &Try) {
        self.block(&try_block.body);
        self.block(&try_block.or_else);
        if !try_block.handlers.is_empty() {
            let mut done = vec![self.emit_jump(Opcode::JumpForward)];
            self.emit(Opcode::PushExcInfo);
            for handler in &try_block.handlers {
                let next = match &handler.exc_type {
                    Some(exc_type) => {
                        self.expr(exc_type);
                        self.emit(Opcode::CheckExcMatch);
                        Some(self.emit_jump(Opcode::PopJumpIfFalse))
                    }
                    None => None,
                };
                match &handler.name {
                    Some(name) => self.name(name, Access::Store),
                    None => self.emit(Opcode::PopTop),
                }
                self.block(&handler.body);
                self.emit(Opcode::PopExcept);
                if let Some(name) = &handler.name {
                    self.emit_text(Opcode::LoadConst, "None");
                    self.name(name, Access::Store);
                    self.name(name, Access::Delete);
                }
                done.push(self.emit_jump(Opcode::JumpForward));
                if let Some(next) = next {
                    self.patch_jump(next);
                }
            }
            self.emit_int(Opcode::Reraise, 0);
            for label in done {
                self.patch_jump(label);
            }
        }
        if !try_block.finally.is_empty() {
            self.block(&try_block.finally);
            let end = self.emit_jump(Opcode::JumpForward);
            self.emit(Opcode::PushExcInfo);
            self.block(&try_block.finally);
            self.emit_int(Opcode::Reraise, 0);
            self.patch_jump(end);
        }
    }

    fn make_function(&mut self, def: &FunctionDef) {
        let mut attributes = Vec::new();
        let defaults: Vec<&ExprLoc> = def.signature.positional().filter_map(|p| p.default.as_ref()).collect();
        if !defaults.is_empty() {
            for default in &defaults {
                self.expr(default);
            }
            self.emit_int(Opcode::BuildTuple, defaults.len());
            attributes.push("defaults");
        }
        let kw_defaults: Vec<(&Rc<str>, &ExprLoc)> = def
            .signature
            .kw_only
            .iter()
            .filter_map(|p| p.default.as_ref().map(|default| (&p.name, default)))
            .collect();
        if !kw_defaults.is_empty() {
            for (name, default) in &kw_defaults {
                self.emit_text(Opcode::LoadConst, str_repr(name));
                self.expr(default);
            }
            self.emit_int(Opcode::BuildMap, kw_defaults.len());
            attributes.push("kwdefaults");
        }
        self.emit_text(Opcode::LoadConst, format!("<code object {}>", def.name));
        self.emit(Opcode::MakeFunction);
        for attribute in attributes.into_iter().rev() {
            self.emit_text(Opcode::SetFunctionAttribute, attribute);
        }
    }

    fn class(&mut self, class: &ClassDef) {
        for decorator in &class.decorators {
            self.expr(decorator);
        }
        self.emit(Opcode::LoadBuildClass);
        self.emit_text(Opcode::LoadConst, format!("<code object {}>", class.name));
        self.emit(Opcode::MakeFunction);
        self.emit_text(Opcode::LoadConst, str_repr(&class.name));
        for base in &class.bases {
            self.expr(base);
        }
        self.emit_int(Opcode::Call, class.bases.len() + 2);
        for _ in &class.decorators {
            self.emit_int(Opcode::Call, 0);
        }
        self.name(&class.name, Access::Store);
    }

    fn store(&mut self, target: &Target) {
        match target {
            Target::Name(name) => self.name(name, Access::Store),
            Target::Attribute { object, attr } => {
                self.expr(object);
                self.emit_text(Opcode::StoreAttr, attr.as_ref());
            }
            Target::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
                self.emit(Opcode::StoreSubscr);
            }
            Target::Tuple(items) => {
                match items.iter().position(|item| matches!(item, Target::Starred(_))) {
                    Some(star) => self.emit_int(Opcode::UnpackEx, star | ((items.len() - star - 1) << 8)),
                    None => self.emit_int(Opcode::UnpackSequence, items.len()),
                }
                for item in items {
                    self.store(item);
                }
            }
            Target::Starred(inner) => self.store(inner),
        }
    }

    fn delete(&mut self, target: &Target) {
        match target {
            Target::Name(name) => self.name(name, Access::Delete),
            Target::Attribute { object, attr } => {
                self.expr(object);
                self.emit_text(Opcode::DeleteAttr, attr.as_ref());
            }
            Target::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
                self.emit(Opcode::DeleteSubscr);
            }
            Target::Tuple(items) => {
                for item in items {
                    self.delete(item);
                }
            }
            Target::Starred(inner) => self.delete(inner),
        }
    }

    fn aug_assign(&mut self, target: &Target, op: Operator, value: &ExprLoc) {
        let symbol = format!("{}=", op.symbol());
        match target {
            Target::Name(name) => {
                self.name(name, Access::Load);
                self.expr(value);
                self.emit_text(Opcode::BinaryOp, symbol);
                self.name(name, Access::Store);
            }
            Target::Attribute { object, attr } => {
                self.expr(object);
                self.emit_int(Opcode::Copy, 1);
                self.emit_text(Opcode::LoadAttr, attr.as_ref());
                self.expr(value);
                self.emit_text(Opcode::BinaryOp, symbol);
                self.emit_int(Opcode::Swap, 2);
                self.emit_text(Opcode::StoreAttr, attr.as_ref());
            }
            Target::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
                self.emit_int(Opcode::Copy, 2);
                self.emit_int(Opcode::Copy, 2);
                self.emit(Opcode::BinarySubscr);
                self.expr(value);
                self.emit_text(Opcode::BinaryOp, symbol);
                self.emit_int(Opcode::Swap, 3);
                self.emit_int(Opcode::Swap, 2);
                self.emit(Opcode::StoreSubscr);
            }
            Target::Tuple(_) | Target::Starred(_) => {
                self.expr(value);
                self.store(target);
            }
        }
    }

    // expressions

    fn expr(&mut self, expr: &ExprLoc) {
        match &expr.expr {
            Expr::Literal(literal) => self.emit_text(Opcode::LoadConst, literal_repr(literal)),
            Expr::Name(name) => self.name(name, Access::Load),
            Expr::FString(parts) => self.fstring(parts),
            Expr::List(items) => self.sequence(items, Opcode::BuildList),
            Expr::Tuple(items) => self.sequence(items, Opcode::BuildTuple),
            Expr::Dict(items) => self.dict_display(items),
            Expr::Starred(inner) => self.expr(inner),
            Expr::BoolOp { op, values } => {
                let jump = match op {
                    BoolOperator::And => Opcode::JumpIfFalseOrPop,
                    BoolOperator::Or => Opcode::JumpIfTrueOrPop,
                };
                let mut labels = Vec::new();
                for (index, value) in values.iter().enumerate() {
                    self.expr(value);
                    if index + 1 < values.len() {
                        labels.push(self.emit_jump(jump));
                    }
                }
                for label in labels {
                    self.patch_jump(label);
                }
            }
            Expr::BinOp { left, op, right } => {
                self.expr(left);
                self.expr(right);
                self.emit_text(Opcode::BinaryOp, op.symbol());
            }
            Expr::UnaryOp { op, operand } => {
                self.expr(operand);
                match op {
                    UnaryOperator::Not => self.emit(Opcode::UnaryNot),
                    UnaryOperator::Neg => self.emit(Opcode::UnaryNegative),
                    UnaryOperator::Invert => self.emit(Opcode::UnaryInvert),
                    UnaryOperator::Pos => self.emit_text(Opcode::CallIntrinsic1, "INTRINSIC_UNARY_POSITIVE"),
                }
            }
            Expr::Compare { left, ops } => self.compare_chain(left, ops),
            Expr::IfElse { test, body, orelse } => {
                self.expr(test);
                let otherwise = self.emit_jump(Opcode::PopJumpIfFalse);
                self.expr(body);
                let end = self.emit_jump(Opcode::JumpForward);
                self.patch_jump(otherwise);
                self.expr(orelse);
                self.patch_jump(end);
            }
            Expr::Named { target, value } => {
                self.expr(value);
                self.emit_int(Opcode::Copy, 1);
                self.name(target, Access::Store);
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs),
            Expr::Attribute { object, attr } => {
                self.expr(object);
                self.emit_text(Opcode::LoadAttr, attr.as_ref());
            }
            Expr::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
                self.emit(Opcode::BinarySubscr);
            }
            Expr::Slice { lower, upper, step } => {
                for bound in [lower, upper] {
                    self.optional(bound.as_deref());
                }
                if let Some(step) = step {
                    self.expr(step);
                    self.emit_int(Opcode::BuildSlice, 3);
                } else {
                    self.emit_int(Opcode::BuildSlice, 2);
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp { elt, generators } => {
                self.emit_int(Opcode::BuildList, 0);
                self.comprehension(generators, &Element::List(elt));
            }
            Expr::DictComp { key, value, generators } => {
                self.emit_int(Opcode::BuildMap, 0);
                self.comprehension(generators, &Element::Dict(key, value));
            }
            Expr::GeneratorExp { generators, .. } => {
                self.emit_text(Opcode::LoadConst, "<code object <genexpr>>");
                self.emit(Opcode::MakeFunction);
                if let Some(first) = generators.first() {
                    self.expr(&first.iter);
                    self.emit(Opcode::GetIter);
                }
                self.emit_int(Opcode::Call, 0);
            }
            Expr::Await(inner) => {
                self.expr(inner);
                self.emit_int(Opcode::GetAwaitable, 0);
                self.send_loop();
            }
            Expr::Yield(value) => {
                self.optional(value.as_deref());
                self.emit(Opcode::YieldValue);
            }
            Expr::YieldFrom(inner) => {
                self.expr(inner);
                self.emit(Opcode::GetYieldFromIter);
                self.send_loop();
            }
        }
    }

    fn optional(&mut self, expr: Option<&ExprLoc>) {
        match expr {
            Some(expr) => self.expr(expr),
            None => self.emit_text(Opcode::LoadConst, "None"),
        }
    }

    /// Delegates to the awaitable or iterator on top of the stack until it finishes.
    fn send_loop(&mut self) {
        self.emit_text(Opcode::LoadConst, "None");
        let start = self.current_offset();
        let exit = self.emit_jump(Opcode::Send);
        self.emit(Opcode::YieldValue);
        self.emit_jump_to(Opcode::JumpBackwardNoInterrupt, start);
        self.patch_jump(exit);
        self.emit(Opcode::EndSend);
    }

    fn compare(&mut self, op: CmpOperator) {
        match op {
            CmpOperator::Is => self.emit_int(Opcode::IsOp, 0),
            CmpOperator::IsNot => self.emit_int(Opcode::IsOp, 1),
            CmpOperator::In => self.emit_int(Opcode::ContainsOp, 0),
            CmpOperator::NotIn => self.emit_int(Opcode::ContainsOp, 1),
            _ => self.emit_text(Opcode::CompareOp, op.symbol()),
        }
    }

    fn compare_chain(&mut self, left: &ExprLoc, ops: &[(CmpOperator, ExprLoc)]) {
        self.expr(left);
        let Some(((last_op, last), init)) = ops.split_last() else {
            return;
        };
        let mut cleanups = Vec::new();
        for (op, right) in init {
            self.expr(right);
            self.emit_int(Opcode::Swap, 2);
            self.emit_int(Opcode::Copy, 2);
            self.compare(*op);
            self.emit_int(Opcode::Copy, 1);
            cleanups.push(self.emit_jump(Opcode::PopJumpIfFalse));
            self.emit(Opcode::PopTop);
        }
        self.expr(last);
        self.compare(*last_op);
        if cleanups.is_empty() {
            return;
        }
        let end = self.emit_jump(Opcode::JumpForward);
        for label in cleanups {
            self.patch_jump(label);
        }
        self.emit_int(Opcode::Swap, 2);
        self.emit(Opcode::PopTop);
        self.patch_jump(end);
    }

    fn sequence(&mut self, items: &[ExprLoc], build: Opcode) {
        let leading = items
            .iter()
            .take_while(|item| !matches!(item.expr, Expr::Starred(_)))
            .count();
        if leading == items.len() {
            for item in items {
                self.expr(item);
            }
            self.emit_int(build, items.len());
            return;
        }
        for item in &items[..leading] {
            self.expr(item);
        }
        self.emit_int(Opcode::BuildList, leading);
        for item in &items[leading..] {
            if let Expr::Starred(inner) = &item.expr {
                self.expr(inner);
                self.emit_int(Opcode::ListExtend, 1);
            } else {
                self.expr(item);
                self.emit_int(Opcode::ListAppend, 1);
            }
        }
        if build == Opcode::BuildTuple {
            self.emit_text(Opcode::CallIntrinsic1, "INTRINSIC_LIST_TO_TUPLE");
        }
    }

    fn dict_display(&mut self, items: &[DictItem]) {
        let leading = items.iter().take_while(|item| item.key.is_some()).count();
        for item in &items[..leading] {
            self.optional(item.key.as_ref());
            self.expr(&item.value);
        }
        self.emit_int(Opcode::BuildMap, leading);
        for item in &items[leading..] {
            if let Some(key) = &item.key {
                self.expr(key);
                self.expr(&item.value);
                self.emit_int(Opcode::MapAdd, 1);
            } else {
                self.expr(&item.value);
                self.emit_int(Opcode::DictUpdate, 1);
            }
        }
    }

    fn call(&mut self, func: &ExprLoc, args: &[CallArg], kwargs: &[CallKwarg]) {
        self.expr(func);
        let unpacking = args.iter().any(|arg| matches!(arg, CallArg::Starred(_)))
            || kwargs.iter().any(|kwarg| kwarg.name.is_none());
        if !unpacking {
            for arg in args {
                if let CallArg::Positional(value) = arg {
                    self.expr(value);
                }
            }
            for kwarg in kwargs {
                self.expr(&kwarg.value);
            }
            if kwargs.is_empty() {
                self.emit_int(Opcode::Call, args.len());
            } else {
                let names: Vec<String> = kwargs
                    .iter()
                    .filter_map(|kwarg| kwarg.name.as_deref())
                    .map(str_repr)
                    .collect();
                self.emit_text(Opcode::LoadConst, tuple_repr(&names));
                self.emit_int(Opcode::CallKw, args.len() + kwargs.len());
            }
            return;
        }
        self.emit_int(Opcode::BuildList, 0);
        for arg in args {
            match arg {
                CallArg::Positional(value) => {
                    self.expr(value);
                    self.emit_int(Opcode::ListAppend, 1);
                }
                CallArg::Starred(value) => {
                    self.expr(value);
                    self.emit_int(Opcode::ListExtend, 1);
                }
            }
        }
        self.emit_text(Opcode::CallIntrinsic1, "INTRINSIC_LIST_TO_TUPLE");
        if !kwargs.is_empty() {
            self.emit_int(Opcode::BuildMap, 0);
            for kwarg in kwargs {
                if let Some(name) = &kwarg.name {
                    self.emit_text(Opcode::LoadConst, str_repr(name));
                    self.expr(&kwarg.value);
                    self.emit_int(Opcode::MapAdd, 1);
                } else {
                    self.expr(&kwarg.value);
                    self.emit_int(Opcode::DictMerge, 1);
                }
            }
        }
        self.emit_int(Opcode::CallFunctionEx, usize::from(!kwargs.is_empty()));
    }

    fn comprehension(&mut self, generators: &[Comprehension], element: &Element<'_>) {
        let bound = self.comprehension_names.len();
        for generator in generators {
            let names = &mut self.comprehension_names;
            generator.target.for_each_name(&mut |name| names.push(name.clone()));
        }
        self.comprehension_clause(generators, element, generators.len() + 1);
        self.comprehension_names.truncate(bound);
    }

    fn comprehension_clause(&mut self, generators: &[Comprehension], element: &Element<'_>, depth: usize) {
        let Some((first, rest)) = generators.split_first() else {
            match element {
                Element::List(elt) => {
                    self.expr(elt);
                    self.emit_int(Opcode::ListAppend, depth);
                }
                Element::Dict(key, value) => {
                    self.expr(key);
                    self.expr(value);
                    self.emit_int(Opcode::MapAdd, depth);
                }
            }
            return;
        };
        self.expr(&first.iter);
        self.emit(Opcode::GetIter);
        let start = self.current_offset();
        let exit = self.emit_jump(Opcode::ForIter);
        self.store(&first.target);
        for test in &first.ifs {
            self.expr(test);
            self.emit_jump_to(Opcode::PopJumpIfFalse, start);
        }
        self.comprehension_clause(rest, element, depth);
        self.emit_jump_to(Opcode::JumpBackward, start);
        self.patch_jump(exit);
        self.emit(Opcode::EndFor);
    }

    fn fstring(&mut self, parts: &[FStringPart]) {
        let mut pieces = 0;
        for part in parts {
            match part {
                FStringPart::Literal(text) => self.emit_text(Opcode::LoadConst, str_repr(text)),
                FStringPart::Interpolation {
                    expr,
                    conversion,
                    format_spec,
                    debug_prefix,
                } => {
                    if let Some(prefix) = debug_prefix {
                        self.emit_text(Opcode::LoadConst, str_repr(prefix));
                        pieces += 1;
                    }
                    self.expr(expr);
                    let conversion = match conversion {
                        ConversionFlag::None if debug_prefix.is_some() && format_spec.is_none() => Some("repr"),
                        ConversionFlag::None => None,
                        ConversionFlag::Str => Some("str"),
                        ConversionFlag::Repr => Some("repr"),
                        ConversionFlag::Ascii => Some("ascii"),
                    };
                    if let Some(conversion) = conversion {
                        self.emit_text(Opcode::ConvertValue, conversion);
                    }
                    match format_spec {
                        Some(spec) => {
                            self.fstring(spec);
                            self.emit(Opcode::FormatWithSpec);
                        }
                        None => self.emit(Opcode::FormatSimple),
                    }
                }
            }
            pieces += 1;
        }
        match pieces {
            0 => self.emit_text(Opcode::LoadConst, "''"),
            1 => {}
            n => self.emit_int(Opcode::BuildString, n),
        }
    }
}

fn literal_repr(literal: &Literal) -> String {
    match literal {
        Literal::Float(value) => float_repr(*value),
        Literal::Str(text) => str_repr(text),
        other => other.to_string(),
    }
}

fn tuple_repr(items: &[String]) -> String {
    match items {
        [single] => format!("({single},)"),
        _ => format!("({})", items.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn opnames(listing: &[String]) -> Vec<&str> {
        listing
            .iter()
            .filter_map(|row| row.split_whitespace().nth(2))
            .collect()
    }

    fn row<'a>(listing: &'a [String], opname: &str) -> Vec<&'a str> {
        listing
            .iter()
            .map(|row| row.split_whitespace().collect::<Vec<_>>())
            .find(|fields| fields.get(2) == Some(&opname))
            .unwrap_or_default()
    }

    #[test]
    fn trailing_expression_is_returned() {
        let listing = disassemble("1 + 2", &[]).unwrap();
        assert_eq!(
            listing,
            [
                "   1      0 RETURN_GENERATOR",
                "   1      2 POP_TOP",
                "   1      4 RESUME                   0",
                "   1      6 LOAD_CONST               1",
                "   1      8 LOAD_CONST               2",
                "   1     10 BINARY_OP                +",
                "   1     12 RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn source_lines_are_separated() {
        let listing = disassemble("x = 1\nx", &[]).unwrap();
        assert_eq!(
            opnames(&listing),
            ["RETURN_GENERATOR", "POP_TOP", "RESUME", "LOAD_CONST", "STORE_FAST", "LOAD_FAST", "RETURN_VALUE"]
        );
        assert_eq!(listing.iter().filter(|row| row.is_empty()).count(), 1);
        assert_eq!(listing[5], "");
    }

    #[test]
    fn arguments_are_fast_and_free_names_global() {
        let listing = disassemble("print(_ctx.value)", &["_ctx"]).unwrap();
        assert_eq!(row(&listing, "LOAD_GLOBAL"), ["1", "6", "LOAD_GLOBAL", "print"]);
        assert_eq!(row(&listing, "LOAD_FAST"), ["1", "8", "LOAD_FAST", "_ctx"]);
        assert_eq!(row(&listing, "LOAD_ATTR"), ["1", "10", "LOAD_ATTR", "value"]);
        assert_eq!(row(&listing, "CALL"), ["1", "12", "CALL", "1"]);
    }

    #[test]
    fn loops_jump_to_their_exit() {
        let listing = disassemble("for i in range(3):\n    print(i)", &[]).unwrap();
        let for_iter = row(&listing, "FOR_ITER");
        let end_for = row(&listing, "END_FOR");
        assert_eq!(for_iter[3..], ["to", end_for[1]]);
        let backward = row(&listing, "JUMP_BACKWARD");
        assert_eq!(backward[4], for_iter[1]);
        assert_eq!(backward[0], "2");
    }

    #[test]
    fn generators_keep_trailing_expression_statement() {
        let listing = disassemble("yield 1\n2", &[]).unwrap();
        assert_eq!(
            opnames(&listing)[3..],
            ["LOAD_CONST", "YIELD_VALUE", "POP_TOP", "LOAD_CONST", "POP_TOP", "RETURN_CONST"]
        );
    }

    #[test]
    fn keyword_calls_name_their_keywords() {
        let listing = disassemble("f(1, sep='-')", &[]).unwrap();
        assert_eq!(row(&listing, "CALL_KW")[3], "2");
        assert!(listing.iter().any(|row| row.ends_with("LOAD_CONST               ('sep',)")));
    }

    #[test]
    fn syntax_errors_are_returned() {
        assert!(disassemble("def (", &[]).is_err());
    }
}
