use std::{fmt, rc::Rc};

use num_bigint::BigInt;

use crate::{parse::CodeRange, prepare::ScopeInfo};

/// Literal constants appearing directly in source.
#[derive(Debug, Clone)]
pub enum Literal {
    Ellipsis,
    None,
    Bool(bool),
    Int(i64),
    LongInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::None => f.write_str("None"),
            Self::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::LongInt(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl Operator {
    /// The source symbol, as used in error messages and the disassembly listing.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
    Pos,
    Invert,
}

/// Comparison operators, including identity and membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOperator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

/// Conversion applied to an f-string replacement field before formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFlag {
    None,
    Str,
    Repr,
    Ascii,
}

/// One piece of an f-string: literal text or a replacement field.
#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(Rc<str>),
    Interpolation {
        expr: Box<ExprLoc>,
        conversion: ConversionFlag,
        /// The format spec may itself contain replacement fields.
        format_spec: Option<Vec<FStringPart>>,
        /// Source text preceding `=` for self-documenting fields (`f"{x=}"`).
        debug_prefix: Option<Rc<str>>,
    },
}

/// A positional argument at a call site.
#[derive(Debug, Clone)]
pub enum CallArg {
    Positional(ExprLoc),
    Starred(ExprLoc),
}

/// A keyword argument at a call site. `name: None` is `**mapping` unpacking.
#[derive(Debug, Clone)]
pub struct CallKwarg {
    pub name: Option<Rc<str>>,
    pub value: ExprLoc,
}

/// An entry of a dict display. `key: None` is `**mapping` unpacking.
#[derive(Debug, Clone)]
pub struct DictItem {
    pub key: Option<ExprLoc>,
    pub value: ExprLoc,
}

/// A single `for ... in ... if ...` clause of a comprehension.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Target,
    pub iter: ExprLoc,
    pub ifs: Vec<ExprLoc>,
    pub is_async: bool,
}

/// An expression together with the source range it was parsed from.
#[derive(Debug, Clone)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    #[must_use]
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Name(Rc<str>),
    FString(Vec<FStringPart>),
    List(Vec<ExprLoc>),
    Tuple(Vec<ExprLoc>),
    Dict(Vec<DictItem>),
    /// `*value` inside a list or tuple display.
    Starred(Box<ExprLoc>),
    BoolOp {
        op: BoolOperator,
        values: Vec<ExprLoc>,
    },
    BinOp {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<ExprLoc>,
    },
    /// A comparison chain `a < b < c`; each operand is evaluated at most once.
    Compare {
        left: Box<ExprLoc>,
        ops: Vec<(CmpOperator, ExprLoc)>,
    },
    IfElse {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Named {
        target: Rc<str>,
        value: Box<ExprLoc>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<CallArg>,
        kwargs: Vec<CallKwarg>,
    },
    Attribute {
        object: Box<ExprLoc>,
        attr: Rc<str>,
    },
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    Slice {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp {
        elt: Box<ExprLoc>,
        generators: Vec<Comprehension>,
    },
    /// Generator expressions are materialised eagerly into an iterator.
    GeneratorExp {
        elt: Box<ExprLoc>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<ExprLoc>,
        value: Box<ExprLoc>,
        generators: Vec<Comprehension>,
    },
    Await(Box<ExprLoc>),
    Yield(Option<Box<ExprLoc>>),
    YieldFrom(Box<ExprLoc>),
}

/// Assignment, `for` and `del` targets.
#[derive(Debug, Clone)]
pub enum Target {
    Name(Rc<str>),
    Attribute { object: ExprLoc, attr: Rc<str> },
    Subscript { object: ExprLoc, index: ExprLoc },
    Tuple(Vec<Target>),
    /// `*rest` inside a tuple target.
    Starred(Box<Target>),
}

impl Target {
    /// Calls `f` for every simple name this target binds.
    pub(crate) fn for_each_name(&self, f: &mut impl FnMut(&Rc<str>)) {
        match self {
            Self::Name(name) => f(name),
            Self::Tuple(items) => {
                for item in items {
                    item.for_each_name(f);
                }
            }
            Self::Starred(inner) => inner.for_each_name(f),
            Self::Attribute { .. } | Self::Subscript { .. } => {}
        }
    }
}

/// A statement together with its source range.
#[derive(Debug, Clone)]
pub struct StmtLoc {
    pub position: CodeRange,
    pub node: Node,
}

impl StmtLoc {
    #[must_use]
    pub fn new(position: CodeRange, node: Node) -> Self {
        Self { position, node }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Pass,
    Expr(ExprLoc),
    Return(Option<ExprLoc>),
    /// `a = b = value`: every target receives the same value, left to right.
    Assign {
        targets: Vec<Target>,
        value: ExprLoc,
    },
    AugAssign {
        target: Target,
        op: Operator,
        value: ExprLoc,
    },
    /// An annotated assignment; the annotation is never evaluated.
    AnnAssign {
        target: Target,
        value: Option<ExprLoc>,
    },
    Delete(Vec<Target>),
    If {
        test: ExprLoc,
        body: Vec<StmtLoc>,
        or_else: Vec<StmtLoc>,
    },
    While {
        test: ExprLoc,
        body: Vec<StmtLoc>,
        or_else: Vec<StmtLoc>,
    },
    For {
        target: Target,
        iter: ExprLoc,
        body: Vec<StmtLoc>,
        or_else: Vec<StmtLoc>,
        is_async: bool,
    },
    Break,
    Continue,
    Try(Try),
    Raise {
        exc: Option<ExprLoc>,
        cause: Option<ExprLoc>,
    },
    Assert {
        test: ExprLoc,
        msg: Option<ExprLoc>,
    },
    FunctionDef(Rc<FunctionDef>),
    ClassDef(Rc<ClassDef>),
    Global(Vec<Rc<str>>),
    Nonlocal(Vec<Rc<str>>),
    Import(Rc<str>),
}

#[derive(Debug, Clone, Default)]
pub struct Try {
    pub body: Vec<StmtLoc>,
    pub handlers: Vec<ExceptHandler>,
    pub or_else: Vec<StmtLoc>,
    pub finally: Vec<StmtLoc>,
}

/// `except ExcType as name:`; both parts are optional.
#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub exc_type: Option<ExprLoc>,
    pub name: Option<Rc<str>>,
    pub body: Vec<StmtLoc>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Rc<str>,
    pub default: Option<ExprLoc>,
}

/// A function signature in source order.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// Positional-only parameters (before `/`).
    pub pos_only: Vec<Param>,
    pub args: Vec<Param>,
    pub var_args: Option<Rc<str>>,
    /// Keyword-only parameters (after `*` or `*args`).
    pub kw_only: Vec<Param>,
    pub var_kwargs: Option<Rc<str>>,
}

impl Signature {
    /// Parameters that accept a positional argument, in order.
    pub fn positional(&self) -> impl Iterator<Item = &Param> {
        self.pos_only.iter().chain(self.args.iter())
    }

    /// Every name the signature binds, in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &Rc<str>> {
        self.positional()
            .map(|p| &p.name)
            .chain(self.var_args.iter())
            .chain(self.kw_only.iter().map(|p| &p.name))
            .chain(self.var_kwargs.iter())
    }
}

/// A function, async function or lambda, with its name resolution computed.
///
/// Built through [`FunctionDef::new`], which runs the scope analysis over the
/// body, so a `FunctionDef` can never disagree with its own body about which
/// names are local.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Rc<str>,
    pub position: CodeRange,
    pub signature: Signature,
    pub body: Vec<StmtLoc>,
    pub is_async: bool,
    pub decorators: Vec<ExprLoc>,
    pub scope: ScopeInfo,
}

impl FunctionDef {
    pub fn new(
        name: Rc<str>,
        position: CodeRange,
        signature: Signature,
        body: Vec<StmtLoc>,
        is_async: bool,
        decorators: Vec<ExprLoc>,
    ) -> Self {
        let scope = ScopeInfo::analyze(&signature, &body);
        Self {
            name,
            position,
            signature,
            body,
            is_async,
            decorators,
            scope,
        }
    }

    /// Whether calling this function produces a generator object.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.scope.is_generator
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: Rc<str>,
    pub position: CodeRange,
    pub bases: Vec<ExprLoc>,
    pub body: Vec<StmtLoc>,
    pub decorators: Vec<ExprLoc>,
}
