pub mod sorted_set;

use sorted_set::SortedSet;

/// The value a key can hold — a sum type dispatched on at operation time.
/// Rejection of the wrong variant is a first-class typed error, not an
/// exception escape.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Vec<u8>),
    SortedSet(SortedSet),
}

impl Value {
    pub fn as_str(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSet> {
        match self {
            Value::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_sorted_set_mut(&mut self) -> Option<&mut SortedSet> {
        match self {
            Value::SortedSet(z) => Some(z),
            _ => None,
        }
    }
}
