//! Class and prototype dispatch.

use std::rc::Rc;

use crate::ordered_map::OrderedMap;
use crate::value::Value;

/// A class: a name, instance/static property tables, an optional factory
/// native invoked when the class itself is called, and an optional parent
/// for prototype-chain lookup.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub instance_properties: OrderedMap<Value>,
    pub static_properties: OrderedMap<Value>,
    pub factory: Option<crate::value::function::NativeFn>,
    pub parent: Option<Rc<Class>>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_properties: OrderedMap::new(),
            static_properties: OrderedMap::new(),
            factory: None,
            parent: None,
        }
    }

    pub fn with_parent(name: impl Into<String>, parent: Rc<Class>) -> Self {
        Self {
            name: name.into(),
            instance_properties: OrderedMap::new(),
            static_properties: OrderedMap::new(),
            factory: None,
            parent: Some(parent),
        }
    }

    /// Walk `self → parent → …` looking for an instance property.
    pub fn lookup_instance(self: &Rc<Self>, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if let Some(v) = class.instance_properties.get(name) {
                return Some(v.clone());
            }
            current = class.parent.clone();
        }
        None
    }

    /// Walk `self → parent → …` looking for a static property.
    pub fn lookup_static(self: &Rc<Self>, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if let Some(v) = class.static_properties.get(name) {
                return Some(v.clone());
            }
            current = class.parent.clone();
        }
        None
    }

    /// Does `self`'s class chain contain `target`? Used for `instanceof`.
    /// Classes are compared by identity (pointer equality on the `Rc`
    /// allocation), matching reference-type class semantics.
    pub fn chain_contains(self: &Rc<Self>, target: &Rc<Class>) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if Rc::ptr_eq(&class, target) {
                return true;
            }
            current = class.parent.clone();
        }
        false
    }
}

/// ADT ("data" declaration) support.
///
/// A case class carries its declared parameter names (in order) as a
/// `__params__` static property; instances carry `__type`, `__case_type`
/// (`"singleton"` or `"constructor"`), and one field per parameter.
pub fn params_of(class: &Rc<Class>) -> Vec<String> {
    match class.lookup_static("__params__") {
        Some(Value::Array(arr)) => arr
            .borrow()
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let mut base = Class::new("Animal");
        base.instance_properties.insert("speak", Value::Int32(1));
        let base = Rc::new(base);

        let derived = Rc::new(Class::with_parent("Dog", base.clone()));
        assert_eq!(derived.lookup_instance("speak"), Some(Value::Int32(1)));
        assert_eq!(derived.lookup_instance("missing"), None);
    }

    #[test]
    fn instanceof_checks_chain_identity() {
        let base = Rc::new(Class::new("Animal"));
        let derived = Rc::new(Class::with_parent("Dog", base.clone()));
        let unrelated = Rc::new(Class::new("Plant"));

        assert!(derived.chain_contains(&base));
        assert!(derived.chain_contains(&derived));
        assert!(!derived.chain_contains(&unrelated));
    }
}
