//! Subtyping over value and reference types.
//!
//! Abstract heap types form three hierarchies:
//!
//! ```text
//!        any              func         extern
//!         |                 |             |
//!         eq            concrete      noextern
//!      /  |   \          func types
//!    i31 struct array       |
//!          |     |       nofunc
//!      concrete concrete
//!          \     /
//!           none
//! ```
//!
//! Concrete types are related through their declared supertype chains.
//! Structurally identical type definitions are treated as equal.

use crate::decoder::{CompositeType, HeapType, Module, RefType, ValType};

/// The three disjoint reference hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    Any,
    Func,
    Extern,
}

pub struct Subtyping<'a> {
    module: &'a Module,
}

impl<'a> Subtyping<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn val(&self, a: ValType, b: ValType) -> bool {
        match (a, b) {
            (ValType::Ref(ra), ValType::Ref(rb)) => self.reference(ra, rb),
            _ => a == b,
        }
    }

    pub fn reference(&self, a: RefType, b: RefType) -> bool {
        (!a.nullable || b.nullable) && self.heap(a.heap, b.heap)
    }

    pub fn heap(&self, a: HeapType, b: HeapType) -> bool {
        if a == b {
            return true;
        }
        match (a, b) {
            (HeapType::Concrete(i), HeapType::Concrete(j)) => self.concrete(i, j),
            (HeapType::Concrete(i), abs) => match self.composite(i) {
                Some(CompositeType::Func(_)) => abs == HeapType::Func,
                Some(CompositeType::Struct(_)) => {
                    matches!(abs, HeapType::Struct | HeapType::Eq | HeapType::Any)
                }
                Some(CompositeType::Array(_)) => {
                    matches!(abs, HeapType::Array | HeapType::Eq | HeapType::Any)
                }
                None => false,
            },
            (HeapType::NoFunc, HeapType::Concrete(j)) => {
                matches!(self.composite(j), Some(CompositeType::Func(_)))
            }
            (HeapType::None, HeapType::Concrete(j)) => matches!(
                self.composite(j),
                Some(CompositeType::Struct(_) | CompositeType::Array(_))
            ),
            (HeapType::NoFunc, HeapType::Func) => true,
            (HeapType::NoExtern, HeapType::Extern) => true,
            (HeapType::None, other) => self.hierarchy(other) == Some(Hierarchy::Any),
            (HeapType::I31 | HeapType::Struct | HeapType::Array, HeapType::Eq | HeapType::Any) => {
                true
            }
            (HeapType::Eq, HeapType::Any) => true,
            _ => false,
        }
    }

    fn composite(&self, idx: u32) -> Option<&'a CompositeType> {
        self.module.types.get(idx as usize).map(|t| &t.composite)
    }

    fn concrete(&self, sub: u32, sup: u32) -> bool {
        let types = &self.module.types;
        let Some(target) = types.get(sup as usize) else {
            return false;
        };
        let mut cur = Some(sub);
        // Supertypes always have smaller indices, so the walk terminates.
        while let Some(idx) = cur {
            let Some(t) = types.get(idx as usize) else {
                return false;
            };
            if idx == sup || t == target {
                return true;
            }
            cur = t.supertype.filter(|s| *s < idx);
        }
        false
    }

    /// Hierarchy a heap type belongs to.
    pub fn hierarchy(&self, heap: HeapType) -> Option<Hierarchy> {
        match heap {
            HeapType::Func | HeapType::NoFunc => Some(Hierarchy::Func),
            HeapType::Extern | HeapType::NoExtern => Some(Hierarchy::Extern),
            HeapType::Any
            | HeapType::Eq
            | HeapType::I31
            | HeapType::Struct
            | HeapType::Array
            | HeapType::None => Some(Hierarchy::Any),
            HeapType::Concrete(idx) => match self.composite(idx)? {
                CompositeType::Func(_) => Some(Hierarchy::Func),
                _ => Some(Hierarchy::Any),
            },
        }
    }

    /// Top heap type of the hierarchy containing `heap`.
    pub fn top(&self, heap: HeapType) -> Option<HeapType> {
        Some(match self.hierarchy(heap)? {
            Hierarchy::Any => HeapType::Any,
            Hierarchy::Func => HeapType::Func,
            Hierarchy::Extern => HeapType::Extern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{FieldType, FuncType, StorageType, SubType};

    fn module() -> Module {
        let field = FieldType {
            storage: StorageType::Val(ValType::I32),
            mutable: false,
        };
        Module {
            types: vec![
                // 0: open struct
                SubType {
                    is_final: false,
                    supertype: None,
                    composite: CompositeType::Struct(vec![field]),
                },
                // 1: struct extending 0
                SubType {
                    is_final: true,
                    supertype: Some(0),
                    composite: CompositeType::Struct(vec![field, field]),
                },
                // 2: func type
                SubType {
                    is_final: true,
                    supertype: None,
                    composite: CompositeType::Func(FuncType::default()),
                },
                // 3: array
                SubType {
                    is_final: true,
                    supertype: None,
                    composite: CompositeType::Array(field),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn numeric_types_are_invariant() {
        let m = module();
        let s = Subtyping::new(&m);
        assert!(s.val(ValType::I32, ValType::I32));
        assert!(!s.val(ValType::I32, ValType::I64));
        assert!(!s.val(ValType::FUNCREF, ValType::I64));
    }

    #[test]
    fn nullability() {
        let m = module();
        let s = Subtyping::new(&m);
        let nn = RefType::non_null(HeapType::Func);
        assert!(s.reference(nn, RefType::FUNCREF));
        assert!(!s.reference(RefType::FUNCREF, nn));
    }

    #[test]
    fn abstract_hierarchy() {
        let m = module();
        let s = Subtyping::new(&m);
        assert!(s.heap(HeapType::I31, HeapType::Any));
        assert!(s.heap(HeapType::Struct, HeapType::Eq));
        assert!(s.heap(HeapType::None, HeapType::Array));
        assert!(s.heap(HeapType::NoFunc, HeapType::Func));
        assert!(!s.heap(HeapType::Func, HeapType::Any));
        assert!(!s.heap(HeapType::Extern, HeapType::Any));
    }

    #[test]
    fn concrete_types() {
        let m = module();
        let s = Subtyping::new(&m);
        assert!(s.heap(HeapType::Concrete(1), HeapType::Concrete(0)));
        assert!(!s.heap(HeapType::Concrete(0), HeapType::Concrete(1)));
        assert!(s.heap(HeapType::Concrete(1), HeapType::Struct));
        assert!(s.heap(HeapType::Concrete(2), HeapType::Func));
        assert!(!s.heap(HeapType::Concrete(2), HeapType::Any));
        assert!(s.heap(HeapType::Concrete(3), HeapType::Array));
        assert!(s.heap(HeapType::NoFunc, HeapType::Concrete(2)));
        assert!(s.heap(HeapType::None, HeapType::Concrete(0)));
        assert!(!s.heap(HeapType::None, HeapType::Concrete(2)));
    }

    #[test]
    fn tops() {
        let m = module();
        let s = Subtyping::new(&m);
        assert_eq!(s.top(HeapType::Concrete(2)), Some(HeapType::Func));
        assert_eq!(s.top(HeapType::Concrete(3)), Some(HeapType::Any));
        assert_eq!(s.top(HeapType::NoExtern), Some(HeapType::Extern));
        assert_eq!(s.top(HeapType::Concrete(99)), None);
    }
}
