//! Object (insertion-ordered string→Value map) and buffer-reader state.

use std::rc::Rc;

use crate::ordered_map::OrderedMap;
use crate::value::class::Class;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct ObjectValue {
    pub entries: OrderedMap<Value>,
    /// Back-reference to the instance's class, if any. Plain object
    /// literals (`{k: v}`) have none; instances produced by a class
    /// factory or a `data` case always do. No `Weak` is needed here:
    /// `Class` never points back at its instances, so there is no cycle to
    /// break — an `Rc` is enough to keep the class alive as long as any
    /// instance references it.
    pub class: Option<Rc<Class>>,
}

impl ObjectValue {
    pub fn new() -> Self {
        Self {
            entries: OrderedMap::new(),
            class: None,
        }
    }

    pub fn with_class(class: Rc<Class>) -> Self {
        Self {
            entries: OrderedMap::new(),
            class: Some(class),
        }
    }
}

/// Cursor over a `Buffer`, for the `BufferReader` value.
#[derive(Debug, Clone)]
pub struct BufferReaderState {
    pub buffer: Value,
    pub position: usize,
}

impl BufferReaderState {
    pub fn new(buffer: Value) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }
}
