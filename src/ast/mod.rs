pub mod def;
pub mod expr;
pub mod types;

pub use def::{DefaultValue, ForeignSpec, Param, Program, TargetDef};
pub use expr::{Block, BlockParam, Expr, ExprKind, Location, ResolvedCall};
pub use types::{Field, Type, TypeDecl, TypeTable};
