use serde::{Deserialize, Serialize};

use super::expr::{Expr, Location};
use super::types::{Type, TypeTable};
use crate::backend::CallConv;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Compile-time constant resolved at the call site, e.g. `__LINE__`.
    Magic(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl Param {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
        }
    }

    pub fn is_magic(&self) -> bool {
        matches!(self.default, Some(DefaultValue::Magic(_)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignSpec {
    pub symbol: String,
    #[serde(default)]
    pub conv: CallConv,
}

/// A resolved method body a call may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDef {
    /// Unique (mangled) name; call sites refer to definitions by it.
    pub name: String,
    pub owner: Type,
    #[serde(default)]
    pub params: Vec<Param>,
    pub ret: Type,
    #[serde(default)]
    pub raises: bool,
    #[serde(default)]
    pub foreign: Option<ForeignSpec>,
    #[serde(default)]
    pub variadic: bool,

    /// Receives its block as a callable value instead of inlining it.
    #[serde(default)]
    pub block_arg: bool,

    /// Implicit caller state (e.g. `$~`) passed by reference.
    #[serde(default)]
    pub special_vars: Vec<Param>,

    /// Compiler primitive: aggregate arguments stay in their storage.
    #[serde(default)]
    pub primitive: bool,
    #[serde(default)]
    pub body: Option<Expr>,
    #[serde(default)]
    pub location: Location,
}

impl TargetDef {
    pub fn new(name: &str, owner: Type, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.to_string(),
            owner,
            params,
            ret,
            raises: false,
            foreign: None,
            variadic: false,
            block_arg: false,
            special_vars: Vec::new(),
            primitive: false,
            body: None,
            location: Location::default(),
        }
    }

    pub fn with_body(mut self, body: Expr) -> Self {
        self.body = Some(body);
        self
    }

    pub fn foreign(mut self, symbol: &str, conv: CallConv) -> Self {
        self.foreign = Some(ForeignSpec {
            symbol: symbol.to_string(),
            conv,
        });
        self
    }

    pub fn raising(mut self) -> Self {
        self.raises = true;
        self
    }

    pub fn is_foreign(&self) -> bool {
        self.foreign.is_some()
    }

    pub fn takes_receiver(&self) -> bool {
        !self.is_foreign() && self.owner.passed_as_self()
    }

    /// Formals before the first magic-default one. Magic formals are passed
    /// after the special variables.
    pub fn fixed_arity(&self) -> usize {
        self.params
            .iter()
            .position(Param::is_magic)
            .unwrap_or(self.params.len())
    }

    /// Definitions whose body yields are always inlined at their call
    /// sites and never become standalone functions.
    pub fn is_inline_only(&self) -> bool {
        self.body.as_ref().is_some_and(Expr::contains_yield)
    }

    pub fn needs_function(&self) -> bool {
        !self.is_foreign() && self.body.is_some() && !self.is_inline_only()
    }
}

/// A fully resolved compilation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub types: TypeTable,
    #[serde(default)]
    pub defs: Vec<TargetDef>,
}

impl Program {
    pub fn def(&self, name: &str) -> Option<&TargetDef> {
        self.defs.iter().find(|def| def.name == name)
    }
}
