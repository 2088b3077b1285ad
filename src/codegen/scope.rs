use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Type;
use crate::backend::ValueId;

/// How a name is bound in a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Stack slot holding the value; reads load from it.
    Slot { ptr: ValueId, ty: Type },
    /// Already computed value that is never reassigned.
    Value { value: ValueId, ty: Type },
}

impl Binding {
    pub fn ty(&self) -> &Type {
        match self {
            Binding::Slot { ty, .. } | Binding::Value { ty, .. } => ty,
        }
    }
}

/// One level of lexical variable scope. Nested scopes (block bodies,
/// closures) point at their parent; lookups walk the chain outwards.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Bind `name` in this scope, shadowing any outer binding.
    pub fn declare(&self, name: &str, binding: Binding) {
        self.vars.borrow_mut().insert(name.to_string(), binding);
    }

    pub fn lookup(&self, name: &str) -> Option<Binding> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    pub fn lookup_local(&self, name: &str) -> Option<Binding> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn parent(&self) -> Option<&Rc<Scope>> {
        self.parent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u32) -> Binding {
        Binding::Slot {
            ptr: ValueId(n),
            ty: Type::int(32),
        }
    }

    #[test]
    fn child_shadows_without_touching_parent() {
        let outer = Scope::root();
        outer.declare("x", slot(1));
        let inner = Scope::child(&outer);
        assert_eq!(inner.lookup("x"), Some(slot(1)));

        inner.declare("x", slot(2));
        assert_eq!(inner.lookup("x"), Some(slot(2)));
        assert_eq!(outer.lookup("x"), Some(slot(1)));
    }

    #[test]
    fn lookup_walks_several_levels() {
        let outer = Scope::root();
        outer.declare("y", slot(7));
        let middle = Scope::child(&outer);
        let inner = Scope::child(&middle);
        assert_eq!(inner.lookup("y"), Some(slot(7)));
        assert!(inner.lookup_local("y").is_none());
        assert!(Rc::ptr_eq(inner.parent().unwrap().parent().unwrap(), &outer));
    }
}
