//! Modification expressions. A `ModifyList` stores the ordered series of
//! changes a modify operation applies to an entry; each step observes the
//! state left by the one before it.

use std::slice;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::value::AttributeValue;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Modify {
    // These values are added to the attribute's set.
    Add(AttrString, Vec<AttributeValue>),
    // These values are removed; an empty value list removes the attribute
    // entirely.
    Delete(AttrString, Vec<AttributeValue>),
    // The attribute's set becomes exactly these values.
    Replace(AttrString, Vec<AttributeValue>),
}

pub fn m_add(attr: &str, values: Vec<AttributeValue>) -> Modify {
    Modify::Add(attr.into(), values)
}

pub fn m_delete(attr: &str, values: Vec<AttributeValue>) -> Modify {
    Modify::Delete(attr.into(), values)
}

pub fn m_purge(attr: &str) -> Modify {
    Modify::Delete(attr.into(), Vec::with_capacity(0))
}

pub fn m_replace(attr: &str, values: Vec<AttributeValue>) -> Modify {
    Modify::Replace(attr.into(), values)
}

impl Modify {
    pub fn attr(&self) -> &str {
        match self {
            Modify::Add(a, _) | Modify::Delete(a, _) | Modify::Replace(a, _) => a,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyList {
    // The order of this list matters. Each change must be done in order.
    mods: Vec<Modify>,
}

impl<'a> IntoIterator for &'a ModifyList {
    type IntoIter = slice::Iter<'a, Modify>;
    type Item = &'a Modify;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

impl ModifyList {
    pub fn new() -> Self {
        ModifyList {
            mods: Vec::with_capacity(0),
        }
    }

    pub fn new_list(mods: Vec<Modify>) -> Self {
        ModifyList { mods }
    }

    pub fn push_mod(&mut self, modify: Modify) {
        self.mods.push(modify)
    }

    pub fn iter(&self) -> slice::Iter<'_, Modify> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
