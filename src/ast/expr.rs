use serde::{Deserialize, Serialize};

use super::types::Type;

/// Source location for diagnostics and magic constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Expression with its resolved type and source location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Nop,
    Nil,
    Bool(bool),
    Char(char),
    String(String),
    Int(i64),
    Float(f64),
    Symbol(String),

    /// Local variable read.
    Var(String),
    SelfRef,

    /// Field of `self`.
    Field(String),
    Assign {
        target: String,
        value: Box<Expr>,
    },

    /// Namespace constant. One with an initializer runs it on first use.
    Const {
        name: String,
        #[serde(default)]
        initializer: bool,
    },
    Call(Box<ResolvedCall>),

    /// Transfer to the block of the innermost inlined call, optionally with
    /// a shifted `with` scope for implicit receivers inside the block.
    Yield {
        args: Vec<Expr>,
        #[serde(default)]
        scope: Option<Box<Expr>>,
    },
    Break(Option<Box<Expr>>),
    Next(Option<Box<Expr>>),

    /// By-reference outbound argument of a foreign call.
    Out(Box<Expr>),

    /// `_` as an out-argument target.
    Discard,
    ProcLiteral(Box<Block>),
    Seq(Vec<Expr>),

    /// Exception-handling region: calls in `body` unwind to `handler`.
    Rescue {
        body: Box<Expr>,
        handler: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            loc: Location::default(),
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn nil() -> Self {
        Self::new(ExprKind::Nil, Type::Nil)
    }

    pub fn var(name: &str, ty: Type) -> Self {
        Self::new(ExprKind::Var(name.to_string()), ty)
    }

    pub fn call(call: ResolvedCall, ty: Type) -> Self {
        let loc = call.location;
        Self::new(ExprKind::Call(Box::new(call)), ty).at(loc)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Nil
                | ExprKind::Bool(_)
                | ExprKind::Char(_)
                | ExprKind::String(_)
                | ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Symbol(_)
        )
    }

    /// Number and symbol literals may be autocast to the formal type, so
    /// overload resolution has already checked them against every candidate.
    pub fn supports_autocast(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Symbol(_)
        )
    }

    /// Receivers that can be skipped when the callee ignores them.
    pub fn is_side_effect_free(&self) -> bool {
        match &self.kind {
            ExprKind::Const { initializer, .. } => !initializer,
            ExprKind::Nop | ExprKind::Var(_) | ExprKind::SelfRef => true,
            _ => self.is_literal(),
        }
    }

    /// Whether evaluating this expression can reach a `yield`.
    pub fn contains_yield(&self) -> bool {
        match &self.kind {
            ExprKind::Yield { .. } => true,
            ExprKind::Assign { value, .. } => value.contains_yield(),
            ExprKind::Call(call) => {
                call.obj.as_ref().is_some_and(Expr::contains_yield)
                    || call.args.iter().any(Expr::contains_yield)
                    || call.block.as_ref().is_some_and(|b| b.body.contains_yield())
            }
            ExprKind::Break(Some(value)) | ExprKind::Next(Some(value)) | ExprKind::Out(value) => {
                value.contains_yield()
            }
            ExprKind::Seq(exprs) => exprs.iter().any(Expr::contains_yield),
            ExprKind::Rescue { body, handler } => body.contains_yield() || handler.contains_yield(),
            _ => false,
        }
    }
}

/// Call site as handed over by the type resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCall {
    #[serde(default)]
    pub obj: Option<Expr>,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(default)]
    pub block: Option<Block>,

    /// Names of the candidate target definitions, in resolver order.
    pub target_defs: Vec<String>,
    #[serde(default)]
    pub is_super: bool,
    #[serde(default)]
    pub uses_with_scope: bool,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub end_location: Option<Location>,
}

impl ResolvedCall {
    pub fn new(name: &str, target_defs: &[&str]) -> Self {
        Self {
            obj: None,
            name: name.to_string(),
            args: Vec::new(),
            block: None,
            target_defs: target_defs.iter().map(|d| d.to_string()).collect(),
            is_super: false,
            uses_with_scope: false,
            location: Location::default(),
            end_location: None,
        }
    }

    pub fn with_obj(mut self, obj: Expr) -> Self {
        self.obj = Some(obj);
        self
    }

    pub fn with_args(mut self, args: Vec<Expr>) -> Self {
        self.args = args;
        self
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockParam {
    pub name: String,
    pub ty: Type,
}

/// Block argument of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub params: Vec<BlockParam>,
    pub body: Expr,

    /// Type of values passed to `break` inside the block, if any.
    #[serde(default)]
    pub break_ty: Option<Type>,

    /// Enclosing variables the block refers to when it becomes a closure.
    #[serde(default)]
    pub captures: Vec<String>,
}

impl Block {
    pub fn proc_type(&self) -> Type {
        Type::Proc {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.body.ty.clone()),
        }
    }
}
