//! Server side entry representation: a dn plus a map of attribute value
//! sets. This is the shape Add events carry and the evaluator tests
//! filters against. Attribute names are stored lowercased so lookups are
//! case insensitive, values are stored verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::dn::Dn;
use crate::error::OperationError;
use crate::filter::FilterNode;
use crate::modify::{Modify, ModifyList};
use crate::value::AttributeValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attrs: BTreeMap<AttrString, Vec<AttributeValue>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Entry {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// A copy of this entry relocated under a different dn. Used by the
    /// rename and move paths.
    pub fn with_dn(&self, dn: Dn) -> Self {
        Entry {
            dn,
            attrs: self.attrs.clone(),
        }
    }

    /// Add an attribute value, preserving insertion order and ignoring an
    /// exact duplicate.
    pub fn add_ava(&mut self, attr: &str, value: AttributeValue) {
        let vs = self.attrs.entry(norm_attr(attr)).or_default();
        if !vs.contains(&value) {
            vs.push(value);
        }
    }

    pub fn get_ava(&self, attr: &str) -> Option<&[AttributeValue]> {
        self.attrs.get(&norm_attr(attr)).map(|vs| vs.as_slice())
    }

    pub fn attribute_pres(&self, attr: &str) -> bool {
        self.attrs.contains_key(&norm_attr(attr))
    }

    pub fn attribute_value_pres(&self, attr: &str, value: &AttributeValue) -> bool {
        self.get_ava(attr)
            .map(|vs| vs.contains(value))
            .unwrap_or(false)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &[AttributeValue])> {
        self.attrs.iter().map(|(a, vs)| (a.as_str(), vs.as_slice()))
    }

    /// Apply an ordered modification list, producing the changed entry.
    /// Each step sees the result of the previous one.
    pub fn apply_modlist(&self, modlist: &ModifyList) -> Result<Entry, OperationError> {
        let mut next = self.clone();
        for modify in modlist {
            match modify {
                Modify::Add(attr, values) => {
                    for v in values {
                        next.add_ava(attr, v.clone());
                    }
                }
                Modify::Delete(attr, values) => {
                    let key = norm_attr(attr);
                    if values.is_empty() {
                        next.attrs.remove(&key);
                    } else if let Some(vs) = next.attrs.get_mut(&key) {
                        vs.retain(|v| !values.contains(v));
                        if vs.is_empty() {
                            next.attrs.remove(&key);
                        }
                    }
                }
                Modify::Replace(attr, values) => {
                    let key = norm_attr(attr);
                    if values.is_empty() {
                        next.attrs.remove(&key);
                    } else {
                        next.attrs.insert(key, values.clone());
                    }
                }
            }
        }
        Ok(next)
    }

    /// Test this entry against a filter with the default byte-exact leaf
    /// predicate.
    pub fn matches(&self, filter: &FilterNode) -> bool {
        filter.matches_with(&mut |leaf| self.test_leaf(leaf))
    }

    fn test_leaf(&self, leaf: &FilterNode) -> bool {
        use crate::filter::FilterExpr;
        match leaf.expr() {
            FilterExpr::Equality(attr, value) => self.attribute_value_pres(attr, value),
            FilterExpr::Greater(attr, value) => self
                .get_ava(attr)
                .map(|vs| vs.iter().any(|v| v >= value))
                .unwrap_or(false),
            FilterExpr::Less(attr, value) => self
                .get_ava(attr)
                .map(|vs| vs.iter().any(|v| v <= value))
                .unwrap_or(false),
            FilterExpr::Approx(attr, value) => self
                .get_ava(attr)
                .map(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)))
                .unwrap_or(false),
            FilterExpr::Presence(attr) => self.attribute_pres(attr),
            FilterExpr::Substring {
                attr,
                initial,
                any,
                final_,
            } => self
                .get_ava(attr)
                .map(|vs| {
                    vs.iter()
                        .any(|v| substring_match(v.as_bytes(), initial, any, final_))
                })
                .unwrap_or(false),
            FilterExpr::Extensible {
                attr,
                value,
                dn_attributes,
                ..
            } => {
                // Without a matching rule engine, an extensible assertion
                // degrades to a case insensitive equality on the named
                // attribute, optionally also testing dn components.
                let attr_hit = attr
                    .as_ref()
                    .map(|a| {
                        self.get_ava(a)
                            .map(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                let dn_hit = *dn_attributes
                    && self.dn.rdns().iter().any(|rdn| {
                        rdn.avas().iter().any(|ava| {
                            value
                                .as_str()
                                .map(|s| s.eq_ignore_ascii_case(ava.value()))
                                .unwrap_or(false)
                        })
                    });
                attr_hit || dn_hit
            }
            // Branch kinds never reach the leaf predicate.
            _ => false,
        }
    }
}

fn norm_attr(attr: &str) -> AttrString {
    let mut a = AttrString::from(attr);
    a.make_ascii_lowercase();
    a
}

fn substring_match(
    val: &[u8],
    initial: &Option<AttributeValue>,
    any: &[AttributeValue],
    final_: &Option<AttributeValue>,
) -> bool {
    let mut lo = 0;
    let mut hi = val.len();

    if let Some(i) = initial {
        if !val.starts_with(i.as_bytes()) {
            return false;
        }
        lo = i.len();
    }
    if let Some(f) = final_ {
        if hi < lo + f.len() || !val[lo..].ends_with(f.as_bytes()) {
            return false;
        }
        hi -= f.len();
    }
    for a in any {
        match find_subslice(&val[lo..hi], a.as_bytes()) {
            Some(idx) => lo += idx + a.len(),
            None => return false,
        }
    }
    true
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
