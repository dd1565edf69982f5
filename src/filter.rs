//! The filter expression model. Every search request is parsed into one of
//! these trees, which is then evaluated against entries, rewritten by the
//! optimiser, and rendered back to its string form for logging and
//! diagnostics. Trees are immutable value types once built: rewrites
//! produce new nodes, and a built tree can be shared across threads
//! without synchronisation.

use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::error::OperationError;
use crate::value::AttributeValue;

const OBJECT_CLASS_AT: &str = "objectClass";

/// Opaque scalar metadata attached to a node by external tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Text(String),
}

/// Node metadata. The selectivity count the optimiser attaches is common
/// enough to deserve its own field; anything else goes through the keyed
/// map. Annotations never participate in equality or hashing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotations {
    count: Option<u64>,
    extra: HashMap<AttrString, AnnotationValue>,
}

impl Annotations {
    fn is_empty(&self) -> bool {
        self.count.is_none() && self.extra.is_empty()
    }
}

/// The tagged expression sum. Children of branch kinds are owned
/// exclusively by their parent; there is no sharing and there are no
/// cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterExpr {
    Equality(AttrString, AttributeValue),
    // These are >= and <= assertions, matching their wire forms.
    Greater(AttrString, AttributeValue),
    Less(AttrString, AttributeValue),
    Approx(AttrString, AttributeValue),
    Presence(AttrString),
    Substring {
        attr: AttrString,
        initial: Option<AttributeValue>,
        any: Vec<AttributeValue>,
        final_: Option<AttributeValue>,
    },
    Extensible {
        attr: Option<AttrString>,
        value: AttributeValue,
        matching_rule: Option<String>,
        dn_attributes: bool,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

/// A node of the filter tree: the expression plus its annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterNode {
    expr: FilterExpr,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    note: Annotations,
}

// Structural equality ignores annotations, and compares children pairwise
// in order against the *other* node's children.
impl PartialEq for FilterNode {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for FilterNode {}

impl Hash for FilterNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expr.hash(state)
    }
}

/// The traversal protocol. Implementations choose what they can visit,
/// whether the walk is pre or post order, and may reorder the children of
/// every branch they pass through (an optimiser evaluating the most
/// selective child first, for example). Reordering must be a permutation:
/// a hook that drops or duplicates children is ignored for that branch.
pub trait FilterVisitor {
    fn can_visit(&self, _node: &FilterNode) -> bool {
        true
    }

    fn visit(&mut self, node: &FilterNode);

    /// True for pre order (parent before children).
    fn is_prefix(&self) -> bool {
        false
    }

    fn reorder_children<'a>(
        &mut self,
        _parent: &FilterNode,
        children: Vec<&'a FilterNode>,
    ) -> Vec<&'a FilterNode> {
        children
    }
}

impl FilterNode {
    // === construction ===

    fn leaf(expr: FilterExpr) -> Self {
        FilterNode {
            expr,
            note: Annotations::default(),
        }
    }

    pub fn equality(attr: &str, value: AttributeValue) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        Ok(Self::leaf(FilterExpr::Equality(attr.into(), value)))
    }

    pub fn greater_or_equal(attr: &str, value: AttributeValue) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        Ok(Self::leaf(FilterExpr::Greater(attr.into(), value)))
    }

    pub fn less_or_equal(attr: &str, value: AttributeValue) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        Ok(Self::leaf(FilterExpr::Less(attr.into(), value)))
    }

    pub fn approx(attr: &str, value: AttributeValue) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        Ok(Self::leaf(FilterExpr::Approx(attr.into(), value)))
    }

    pub fn presence(attr: &str) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        Ok(Self::leaf(FilterExpr::Presence(attr.into())))
    }

    pub fn substring(
        attr: &str,
        initial: Option<AttributeValue>,
        any: Vec<AttributeValue>,
        final_: Option<AttributeValue>,
    ) -> Result<Self, OperationError> {
        Self::assertion_attr(attr)?;
        if initial.is_none() && any.is_empty() && final_.is_none() {
            return Err(OperationError::InvalidFilter(
                "substring assertion with no components".to_string(),
            ));
        }
        Ok(Self::leaf(FilterExpr::Substring {
            attr: attr.into(),
            initial,
            any,
            final_,
        }))
    }

    pub fn extensible(
        attr: Option<&str>,
        value: AttributeValue,
        matching_rule: Option<&str>,
        dn_attributes: bool,
    ) -> Result<Self, OperationError> {
        if attr.is_none() && matching_rule.is_none() {
            return Err(OperationError::InvalidFilter(
                "extensible assertion needs an attribute or a matching rule".to_string(),
            ));
        }
        if let Some(a) = attr {
            Self::assertion_attr(a)?;
        }
        Ok(Self::leaf(FilterExpr::Extensible {
            attr: attr.map(|a| a.into()),
            value,
            matching_rule: matching_rule.map(|m| m.to_string()),
            dn_attributes,
        }))
    }

    pub fn and(children: Vec<FilterNode>) -> Result<Self, OperationError> {
        if children.is_empty() {
            return Err(OperationError::InvalidFilter(
                "empty conjunction".to_string(),
            ));
        }
        Ok(Self::leaf(FilterExpr::And(children)))
    }

    pub fn or(children: Vec<FilterNode>) -> Result<Self, OperationError> {
        if children.is_empty() {
            return Err(OperationError::InvalidFilter(
                "empty disjunction".to_string(),
            ));
        }
        Ok(Self::leaf(FilterExpr::Or(children)))
    }

    pub fn not(child: FilterNode) -> Self {
        Self::leaf(FilterExpr::Not(Box::new(child)))
    }

    fn assertion_attr(attr: &str) -> Result<(), OperationError> {
        if attr.is_empty() {
            Err(OperationError::InvalidFilter(
                "empty attribute description".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    // === accessors ===

    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(
            self.expr,
            FilterExpr::And(_) | FilterExpr::Or(_) | FilterExpr::Not(_)
        )
    }

    pub fn children(&self) -> &[FilterNode] {
        match &self.expr {
            FilterExpr::And(cs) | FilterExpr::Or(cs) => cs,
            FilterExpr::Not(c) => std::slice::from_ref(c),
            _ => &[],
        }
    }

    // === annotations ===

    pub fn count(&self) -> Option<u64> {
        self.note.count
    }

    pub fn set_count(&mut self, count: u64) {
        self.note.count = Some(count);
    }

    pub fn annotate(&mut self, key: &str, value: AnnotationValue) {
        self.note.extra.insert(key.into(), value);
    }

    pub fn annotation(&self, key: &str) -> Option<&AnnotationValue> {
        self.note.extra.get(key)
    }

    // === traversal ===

    pub fn accept(&self, visitor: &mut dyn FilterVisitor) {
        if self.is_leaf() {
            if visitor.can_visit(self) {
                visitor.visit(self);
            }
            return;
        }

        let children: Vec<&FilterNode> = self.children().iter().collect();
        let expected = children.len();
        let mut order = visitor.reorder_children(self, children);
        if order.len() != expected {
            debug_assert!(false, "reorder_children must return a permutation");
            order = self.children().iter().collect();
        }

        if visitor.is_prefix() {
            if visitor.can_visit(self) {
                visitor.visit(self);
            }
            for child in order {
                child.accept(visitor);
            }
        } else {
            for child in order {
                child.accept(visitor);
            }
            if visitor.can_visit(self) {
                visitor.visit(self);
            }
        }
    }

    /// Total number of nodes in the tree, via a post order walk. Used to
    /// enforce the configured filter element limit on inbound searches.
    pub fn size(&self) -> usize {
        struct Counter(usize);
        impl FilterVisitor for Counter {
            fn visit(&mut self, _node: &FilterNode) {
                self.0 += 1;
            }
        }
        let mut counter = Counter(0);
        self.accept(&mut counter);
        counter.0
    }

    // === evaluation ===

    /// Evaluate the tree against a leaf predicate, post order with short
    /// circuit: a conjunction stops at the first false child, a
    /// disjunction at the first true one.
    pub fn matches_with<F>(&self, test: &mut F) -> bool
    where
        F: FnMut(&FilterNode) -> bool,
    {
        match &self.expr {
            FilterExpr::And(cs) => cs.iter().all(|c| c.matches_with(test)),
            FilterExpr::Or(cs) => cs.iter().any(|c| c.matches_with(test)),
            FilterExpr::Not(c) => !c.matches_with(test),
            _ => test(self),
        }
    }

    // === rendering ===

    /// The canonical string form. A node annotated with a selectivity
    /// count renders with a `[count] ` suffix for explain style output;
    /// unannotated trees are pure wire form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_to(&mut out);
        out
    }

    fn render_to(&self, out: &mut String) {
        match &self.expr {
            FilterExpr::Equality(attr, value) => {
                out.push('(');
                out.push_str(attr);
                out.push('=');
                escape_assertion_value(value.as_bytes(), out);
                out.push(')');
            }
            FilterExpr::Greater(attr, value) => {
                out.push('(');
                out.push_str(attr);
                out.push_str(">=");
                escape_assertion_value(value.as_bytes(), out);
                out.push(')');
            }
            FilterExpr::Less(attr, value) => {
                out.push('(');
                out.push_str(attr);
                out.push_str("<=");
                escape_assertion_value(value.as_bytes(), out);
                out.push(')');
            }
            FilterExpr::Approx(attr, value) => {
                out.push('(');
                out.push_str(attr);
                out.push_str("~=");
                escape_assertion_value(value.as_bytes(), out);
                out.push(')');
            }
            FilterExpr::Presence(attr) => {
                out.push('(');
                out.push_str(attr);
                out.push_str("=*)");
            }
            FilterExpr::Substring {
                attr,
                initial,
                any,
                final_,
            } => {
                out.push('(');
                out.push_str(attr);
                out.push('=');
                if let Some(i) = initial {
                    escape_assertion_value(i.as_bytes(), out);
                }
                for a in any {
                    out.push('*');
                    escape_assertion_value(a.as_bytes(), out);
                }
                match final_ {
                    Some(f) => {
                        out.push('*');
                        escape_assertion_value(f.as_bytes(), out);
                    }
                    None => out.push('*'),
                }
                out.push(')');
            }
            FilterExpr::Extensible {
                attr,
                value,
                matching_rule,
                dn_attributes,
            } => {
                out.push('(');
                if let Some(a) = attr {
                    out.push_str(a);
                }
                if *dn_attributes {
                    out.push_str(":dn");
                }
                if let Some(rule) = matching_rule {
                    out.push(':');
                    out.push_str(rule);
                }
                out.push_str(":=");
                escape_assertion_value(value.as_bytes(), out);
                out.push(')');
            }
            FilterExpr::And(cs) => {
                out.push_str("(&");
                for c in cs {
                    c.render_to(out);
                }
                out.push(')');
            }
            FilterExpr::Or(cs) => {
                out.push_str("(|");
                for c in cs {
                    c.render_to(out);
                }
                out.push(')');
            }
            FilterExpr::Not(c) => {
                out.push_str("(!");
                c.render_to(out);
                out.push(')');
            }
        }
        if let Some(count) = self.note.count {
            // Diagnostic suffix consumed by explain tooling.
            let _ = write!(out, "[{count}] ");
        }
    }

    /// The subtree refinement form. Refinements only admit conjunction,
    /// disjunction, negation and equality on objectClass; anything else is
    /// refused.
    pub fn render_refinement(&self) -> Result<String, OperationError> {
        let mut out = String::new();
        self.refinement_to(&mut out)?;
        Ok(out)
    }

    fn refinement_to(&self, out: &mut String) -> Result<(), OperationError> {
        match &self.expr {
            FilterExpr::Equality(attr, value) => {
                if !attr.eq_ignore_ascii_case(OBJECT_CLASS_AT) {
                    return Err(OperationError::NotRefinable(format!(
                        "invalid attribute {attr} for a refinement"
                    )));
                }
                out.push_str("item: ");
                out.push_str(&value.to_string_lossy());
                Ok(())
            }
            FilterExpr::And(cs) => {
                out.push_str("and: { ");
                let mut first = true;
                for c in cs {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    c.refinement_to(out)?;
                }
                out.push_str(" }");
                Ok(())
            }
            FilterExpr::Or(cs) => {
                out.push_str("or: { ");
                let mut first = true;
                for c in cs {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    c.refinement_to(out)?;
                }
                out.push_str(" }");
                Ok(())
            }
            FilterExpr::Not(c) => {
                out.push_str("not: ");
                c.refinement_to(out)
            }
            _ => Err(OperationError::NotRefinable(format!(
                "{} assertion cannot be part of a refinement",
                self.kind_name()
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match &self.expr {
            FilterExpr::Equality(_, _) => "equality",
            FilterExpr::Greater(_, _) => "greaterOrEqual",
            FilterExpr::Less(_, _) => "lessOrEqual",
            FilterExpr::Approx(_, _) => "approxMatch",
            FilterExpr::Presence(_) => "present",
            FilterExpr::Substring { .. } => "substrings",
            FilterExpr::Extensible { .. } => "extensibleMatch",
            FilterExpr::And(_) => "and",
            FilterExpr::Or(_) => "or",
            FilterExpr::Not(_) => "not",
        }
    }

    // === optimisation ===

    /// Produce a semantically equal tree that evaluates cheaper: nested
    /// conjunctions and disjunctions of the same kind fold into their
    /// parent, duplicate siblings collapse, double negation cancels, and
    /// children are ordered most selective first. Annotated counts are the
    /// primary order, assertion kind the tie break.
    pub fn optimize(&self) -> FilterNode {
        match &self.expr {
            FilterExpr::And(cs) => {
                let children = Self::optimize_branch(cs, true);
                FilterNode {
                    expr: FilterExpr::And(children),
                    note: self.note.clone(),
                }
            }
            FilterExpr::Or(cs) => {
                let children = Self::optimize_branch(cs, false);
                FilterNode {
                    expr: FilterExpr::Or(children),
                    note: self.note.clone(),
                }
            }
            FilterExpr::Not(c) => {
                let inner = c.optimize();
                if let FilterExpr::Not(grandchild) = inner.expr {
                    // Double negation.
                    return (*grandchild).clone();
                }
                FilterNode {
                    expr: FilterExpr::Not(Box::new(inner)),
                    note: self.note.clone(),
                }
            }
            _ => self.clone(),
        }
    }

    fn optimize_branch(children: &[FilterNode], conjunction: bool) -> Vec<FilterNode> {
        let mut flat: Vec<FilterNode> = Vec::with_capacity(children.len());
        for child in children {
            let child = child.optimize();
            match (conjunction, child.expr) {
                (true, FilterExpr::And(inner)) => flat.extend(inner),
                (false, FilterExpr::Or(inner)) => flat.extend(inner),
                (_, expr) => flat.push(FilterNode {
                    expr,
                    note: child.note,
                }),
            }
        }

        let mut deduped: Vec<FilterNode> = Vec::with_capacity(flat.len());
        for child in flat {
            if !deduped.contains(&child) {
                deduped.push(child);
            }
        }

        // Stable: equally ranked children keep their request order.
        deduped.sort_by_key(|c| (c.count().unwrap_or(u64::MAX), c.selectivity_rank()));
        deduped
    }

    // Lower ranks are expected to produce smaller candidate sets, as these
    // are the assertion kinds the indexes answer best.
    fn selectivity_rank(&self) -> u8 {
        match &self.expr {
            FilterExpr::Equality(_, _) => 0,
            FilterExpr::Presence(_) => 1,
            FilterExpr::Greater(_, _) | FilterExpr::Less(_, _) | FilterExpr::Approx(_, _) => 2,
            FilterExpr::Substring { .. } => 3,
            FilterExpr::Extensible { .. } => 4,
            FilterExpr::Not(_) => 5,
            FilterExpr::And(_) | FilterExpr::Or(_) => 6,
        }
    }
}

impl std::fmt::Display for FilterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl FromStr for FilterNode {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        rfc4515::filter(s.trim())
            .map_err(|e| OperationError::InvalidFilter(format!("parse failure: {e}")))
    }
}

// Assertion values escape the grammar's structural characters and any non
// printable byte as a two digit uppercase hex pair.
fn escape_assertion_value(bytes: &[u8], out: &mut String) {
    for b in bytes {
        match b {
            b'(' | b')' | b'*' | b'\\' => {
                let _ = write!(out, "\\{b:02X}");
            }
            0x20..=0x7e => out.push(*b as char),
            _ => {
                let _ = write!(out, "\\{b:02X}");
            }
        }
    }
}

// === helper constructors ===
//
// Infallible builders for statically known assertion shapes. The checked
// constructors above are the path request parsing uses.

pub fn f_eq(attr: &str, value: AttributeValue) -> FilterNode {
    debug_assert!(!attr.is_empty());
    FilterNode {
        expr: FilterExpr::Equality(attr.into(), value),
        note: Annotations::default(),
    }
}

pub fn f_pres(attr: &str) -> FilterNode {
    debug_assert!(!attr.is_empty());
    FilterNode {
        expr: FilterExpr::Presence(attr.into()),
        note: Annotations::default(),
    }
}

pub fn f_sub(
    attr: &str,
    initial: Option<AttributeValue>,
    any: Vec<AttributeValue>,
    final_: Option<AttributeValue>,
) -> FilterNode {
    debug_assert!(!attr.is_empty());
    debug_assert!(initial.is_some() || !any.is_empty() || final_.is_some());
    FilterNode {
        expr: FilterExpr::Substring {
            attr: attr.into(),
            initial,
            any,
            final_,
        },
        note: Annotations::default(),
    }
}

pub fn f_and(children: Vec<FilterNode>) -> FilterNode {
    debug_assert!(!children.is_empty());
    FilterNode {
        expr: FilterExpr::And(children),
        note: Annotations::default(),
    }
}

pub fn f_or(children: Vec<FilterNode>) -> FilterNode {
    debug_assert!(!children.is_empty());
    FilterNode {
        expr: FilterExpr::Or(children),
        note: Annotations::default(),
    }
}

pub fn f_not(child: FilterNode) -> FilterNode {
    FilterNode::not(child)
}

// === parsing ===

peg::parser! {
    grammar rfc4515() for str {
        pub rule filter() -> FilterNode =
            "(" f:filtercomp() ")" { f }

        rule filtercomp() -> FilterNode =
            and() / or() / not() / item()

        rule and() -> FilterNode =
            "&" fs:filter()+ {? FilterNode::and(fs).map_err(|_| "and") }

        rule or() -> FilterNode =
            "|" fs:filter()+ {? FilterNode::or(fs).map_err(|_| "or") }

        rule not() -> FilterNode =
            "!" f:filter() { FilterNode::not(f) }

        rule item() -> FilterNode =
            present() / substring() / extensible() / simple()

        rule present() -> FilterNode =
            a:attrdesc() "=*" {? FilterNode::presence(a).map_err(|_| "present") }

        rule substring() -> FilterNode =
            a:attrdesc() "=" i:value1()? "*" m:(v:value1() "*" { v })* f:value1()? {?
                FilterNode::substring(a, i, m, f).map_err(|_| "substring")
            }

        rule extensible() -> FilterNode =
            a:attrdesc() d:dnflag()? r:rule_oid()? ":=" v:value0() {?
                FilterNode::extensible(Some(a), v, r.as_deref(), d.is_some())
                    .map_err(|_| "extensible")
            }
            / d:dnflag()? r:rule_oid() ":=" v:value0() {?
                FilterNode::extensible(None, v, Some(&r), d.is_some()).map_err(|_| "extensible")
            }

        rule dnflag() -> () = ":dn" &[':'] {}

        rule rule_oid() -> String =
            ":" r:$(['a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.']+) { r.to_string() }

        rule simple() -> FilterNode =
            a:attrdesc() ">=" v:value0() {?
                FilterNode::greater_or_equal(a, v).map_err(|_| "greaterOrEqual")
            }
            / a:attrdesc() "<=" v:value0() {?
                FilterNode::less_or_equal(a, v).map_err(|_| "lessOrEqual")
            }
            / a:attrdesc() "~=" v:value0() {? FilterNode::approx(a, v).map_err(|_| "approx") }
            / a:attrdesc() "=" v:value0() {? FilterNode::equality(a, v).map_err(|_| "equality") }

        rule attrdesc() -> &'input str =
            $(['a'..='z' | 'A'..='Z' | '0'..='9']
              ['a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' | ';']*)

        // An assertion value, possibly empty.
        rule value0() -> AttributeValue =
            bs:value_byte()* { AttributeValue::new(bs.concat()) }

        // A substring component, never empty.
        rule value1() -> AttributeValue =
            bs:value_byte()+ { AttributeValue::new(bs.concat()) }

        rule value_byte() -> Vec<u8> =
            escaped_byte() / normal_char()

        rule escaped_byte() -> Vec<u8> =
            "\\" h:$(['0'..='9' | 'a'..='f' | 'A'..='F']['0'..='9' | 'a'..='f' | 'A'..='F']) {?
                u8::from_str_radix(h, 16).map(|b| vec![b]).map_err(|_| "hex escape")
            }

        rule normal_char() -> Vec<u8> =
            c:$([^ '(' | ')' | '*' | '\\' | '\0']) { c.as_bytes().to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::str::FromStr;

    use super::{
        f_and, f_eq, f_not, f_or, f_pres, f_sub, AnnotationValue, FilterExpr, FilterNode,
        FilterVisitor,
    };
    use crate::error::OperationError;

    fn hash_of(node: &FilterNode) -> u64 {
        let mut hasher = DefaultHasher::new();
        node.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_filter_construction_invariants() {
        assert!(matches!(
            FilterNode::equality("", "x".into()),
            Err(OperationError::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterNode::substring("cn", None, vec![], None),
            Err(OperationError::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterNode::extensible(None, "x".into(), None, false),
            Err(OperationError::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterNode::and(vec![]),
            Err(OperationError::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterNode::or(vec![]),
            Err(OperationError::InvalidFilter(_))
        ));

        assert!(FilterNode::substring("cn", Some("a".into()), vec![], None).is_ok());
        assert!(FilterNode::extensible(None, "x".into(), Some("2.5.13.2"), false).is_ok());
    }

    #[test]
    fn test_filter_equality_ignores_annotations() {
        let a = f_eq("cn", "alice".into());
        let mut b = a.clone();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        b.set_count(42);
        b.annotate("source", AnnotationValue::Text("index".to_string()));
        // Annotations are invisible to equality and hashing.
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = f_eq("cn", "bob".into());
        assert_ne!(a, c);
    }

    #[test]
    fn test_filter_branch_equality_pairwise() {
        let a = f_or(vec![f_eq("cn", "x".into()), f_eq("sn", "y".into())]);
        let b = f_or(vec![f_eq("cn", "x".into()), f_eq("sn", "y".into())]);
        // Same multiset, different order: not structurally equal.
        let c = f_or(vec![f_eq("sn", "y".into()), f_eq("cn", "x".into())]);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn test_filter_render_and_presence() {
        let f = f_and(vec![f_eq("cn", "alice".into()), f_pres("mail")]);
        assert_eq!(f.render(), "(&(cn=alice)(mail=*))");
    }

    #[test]
    fn test_filter_render_annotated() {
        let mut f = f_and(vec![f_eq("cn", "alice".into()), f_pres("mail")]);
        f.set_count(42);
        assert_eq!(f.render(), "(&(cn=alice)(mail=*))[42] ");
    }

    #[test]
    fn test_filter_render_substring() {
        let f = f_sub("cn", Some("a".into()), vec!["b".into()], Some("c".into()));
        assert_eq!(f.render(), "(cn=a*b*c)");

        let open_end = f_sub("cn", Some("a".into()), vec!["b".into()], None);
        assert_eq!(open_end.render(), "(cn=a*b*)");

        let open_both = f_sub("cn", None, vec!["b".into()], None);
        assert_eq!(open_both.render(), "(cn=*b*)");

        let tail_only = f_sub("cn", None, vec![], Some("c".into()));
        assert_eq!(tail_only.render(), "(cn=*c)");
    }

    #[test]
    fn test_filter_render_extensible() {
        let f = FilterNode::extensible(Some("cn"), "foo".into(), Some("2.5.13.2"), true)
            .expect("construct failure");
        assert_eq!(f.render(), "(cn:dn:2.5.13.2:=foo)");

        let no_dn = FilterNode::extensible(Some("cn"), "foo".into(), Some("2.5.13.2"), false)
            .expect("construct failure");
        assert_eq!(no_dn.render(), "(cn:2.5.13.2:=foo)");

        let rule_only = FilterNode::extensible(None, "foo".into(), Some("2.5.13.2"), false)
            .expect("construct failure");
        assert_eq!(rule_only.render(), "(:2.5.13.2:=foo)");

        let attr_only =
            FilterNode::extensible(Some("cn"), "foo".into(), None, false).expect("construct failure");
        assert_eq!(attr_only.render(), "(cn:=foo)");
    }

    #[test]
    fn test_filter_render_escapes() {
        let f = f_eq("cn", "a*b(c)d\\e".into());
        assert_eq!(f.render(), r"(cn=a\2Ab\28c\29d\5Ce)");

        let binary = f_eq("userCertificate", vec![0x00u8, 0x1f, 0x7f].into());
        assert_eq!(binary.render(), r"(userCertificate=\00\1F\7F)");
    }

    #[test]
    fn test_filter_refinement_render() {
        let f = f_or(vec![
            f_eq("objectClass", "person".into()),
            f_not(f_eq("objectClass", "alias".into())),
        ]);
        assert_eq!(
            f.render_refinement().expect("refinement failure"),
            "or: { item: person, not: item: alias }"
        );

        let nested = f_and(vec![
            f_eq("ObjectClass", "top".into()),
            f_eq("objectclass", "person".into()),
        ]);
        assert_eq!(
            nested.render_refinement().expect("refinement failure"),
            "and: { item: top, item: person }"
        );
    }

    #[test]
    fn test_filter_refinement_rejects() {
        // Equality on anything but objectClass.
        let f = f_eq("cn", "alice".into());
        assert!(matches!(
            f.render_refinement(),
            Err(OperationError::NotRefinable(_))
        ));

        // A disallowed kind anywhere in the tree poisons the whole render.
        let buried = f_and(vec![f_eq("objectClass", "person".into()), f_pres("mail")]);
        assert!(matches!(
            buried.render_refinement(),
            Err(OperationError::NotRefinable(_))
        ));
    }

    #[test]
    fn test_filter_parse_round_trip() {
        for src in [
            "(cn=alice)",
            "(cn>=5)",
            "(cn<=5)",
            "(cn~=alys)",
            "(mail=*)",
            "(cn=a*b*c)",
            "(cn=a*b*)",
            "(cn=*b*c)",
            "(cn=*b*)",
            "(&(cn=alice)(mail=*))",
            "(|(cn=a)(cn=b)(cn=c))",
            "(!(objectClass=alias))",
            "(&(|(cn=a)(sn=b))(!(mail=*)))",
            "(cn:dn:2.5.13.2:=foo)",
            "(cn:2.5.13.2:=foo)",
            "(:2.5.13.2:=foo)",
            "(cn:=foo)",
            "(:dn:2.5.13.2:=foo)",
            r"(cn=a\2Ab\28c\29d\5Ce)",
        ] {
            let parsed = FilterNode::from_str(src).expect(src);
            assert_eq!(parsed.render(), src, "round trip failure for {src}");
        }
    }

    #[test]
    fn test_filter_render_parse_identity() {
        // Rebuilding a tree from its rendered form yields an equal tree.
        // Annotations are not expected to survive.
        let trees = [
            f_eq("cn", "alice".into()),
            f_sub("cn", Some("a".into()), vec!["b".into()], Some("c".into())),
            f_and(vec![f_eq("cn", "alice".into()), f_pres("mail")]),
            f_or(vec![
                f_eq("objectClass", "person".into()),
                f_not(f_eq("objectClass", "alias".into())),
            ]),
            f_eq("cn", "binary\u{0} value".into()),
        ];
        for tree in trees {
            let reparsed = FilterNode::from_str(&tree.render()).expect("parse failure");
            assert_eq!(tree, reparsed);
        }
    }

    #[test]
    fn test_filter_parse_structure() {
        let f = FilterNode::from_str("(&(cn=alice)(mail=*))").expect("parse failure");
        assert_eq!(
            f,
            f_and(vec![f_eq("cn", "alice".into()), f_pres("mail")])
        );

        let sub = FilterNode::from_str("(cn=a*b*c)").expect("parse failure");
        assert_eq!(
            sub,
            f_sub("cn", Some("a".into()), vec!["b".into()], Some("c".into()))
        );
    }

    #[test]
    fn test_filter_parse_rejects() {
        for src in ["", "cn=alice", "(cn=alice", "(&)", "(|)", "(!)", "(=value)", "(cn=a**b)"] {
            assert!(
                FilterNode::from_str(src).is_err(),
                "expected parse failure for {src}"
            );
        }
    }

    #[test]
    fn test_filter_visitor_orders() {
        let tree = f_and(vec![
            f_eq("a", "1".into()),
            f_or(vec![f_eq("b", "2".into()), f_eq("c", "3".into())]),
        ]);

        struct Collector {
            prefix: bool,
            seen: Vec<String>,
        }
        impl FilterVisitor for Collector {
            fn visit(&mut self, node: &FilterNode) {
                let tag = match node.expr() {
                    FilterExpr::Equality(a, _) => a.to_string(),
                    FilterExpr::And(_) => "&".to_string(),
                    FilterExpr::Or(_) => "|".to_string(),
                    _ => "?".to_string(),
                };
                self.seen.push(tag);
            }
            fn is_prefix(&self) -> bool {
                self.prefix
            }
        }

        let mut pre = Collector {
            prefix: true,
            seen: Vec::new(),
        };
        tree.accept(&mut pre);
        assert_eq!(pre.seen, vec!["&", "a", "|", "b", "c"]);

        let mut post = Collector {
            prefix: false,
            seen: Vec::new(),
        };
        tree.accept(&mut post);
        assert_eq!(post.seen, vec!["a", "b", "c", "|", "&"]);

        // Both orders visit every node exactly once.
        assert_eq!(pre.seen.len(), tree.size());
        assert_eq!(post.seen.len(), tree.size());
    }

    #[test]
    fn test_filter_visitor_reorder_is_permutation() {
        let tree = f_or(vec![
            f_eq("a", "1".into()),
            f_eq("b", "2".into()),
            f_eq("c", "3".into()),
        ]);

        struct Reverser {
            seen: Vec<String>,
        }
        impl FilterVisitor for Reverser {
            fn can_visit(&self, node: &FilterNode) -> bool {
                node.is_leaf()
            }
            fn visit(&mut self, node: &FilterNode) {
                if let FilterExpr::Equality(a, _) = node.expr() {
                    self.seen.push(a.to_string());
                }
            }
            fn reorder_children<'a>(
                &mut self,
                _parent: &FilterNode,
                mut children: Vec<&'a FilterNode>,
            ) -> Vec<&'a FilterNode> {
                children.reverse();
                children
            }
        }

        let mut v = Reverser { seen: Vec::new() };
        tree.accept(&mut v);
        // Reordered, but nothing dropped or duplicated.
        assert_eq!(v.seen, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_filter_visitor_can_visit_filters() {
        let tree = f_and(vec![f_eq("a", "1".into()), f_pres("b")]);

        struct LeavesOnly(usize);
        impl FilterVisitor for LeavesOnly {
            fn can_visit(&self, node: &FilterNode) -> bool {
                node.is_leaf()
            }
            fn visit(&mut self, _node: &FilterNode) {
                self.0 += 1;
            }
        }

        let mut v = LeavesOnly(0);
        tree.accept(&mut v);
        assert_eq!(v.0, 2);
    }

    #[test]
    fn test_filter_optimize_flatten_and_order() {
        let tree = f_and(vec![
            f_sub("cn", Some("a".into()), vec![], None),
            f_and(vec![f_eq("uid", "1".into()), f_pres("mail")]),
            f_eq("uid", "1".into()),
        ]);
        let optimized = tree.optimize();

        // Nested conjunction folded up, duplicate equality removed,
        // equality sorted ahead of presence ahead of substring.
        assert_eq!(optimized.render(), "(&(uid=1)(mail=*)(cn=a*))");
    }

    #[test]
    fn test_filter_optimize_count_order() {
        let mut selective = f_eq("uid", "1".into());
        selective.set_count(3);
        let mut broad = f_eq("objectClass", "person".into());
        broad.set_count(5000);

        let tree = f_and(vec![broad, selective]);
        let optimized = tree.optimize();
        assert_eq!(
            optimized.render(),
            "(&(uid=1)[3] (objectClass=person)[5000] )"
        );
    }

    #[test]
    fn test_filter_optimize_double_negation() {
        let tree = f_not(f_not(f_eq("cn", "a".into())));
        assert_eq!(tree.optimize().render(), "(cn=a)");
    }

    #[test]
    fn test_filter_optimize_preserves_matching() {
        use crate::dn::Dn;
        use crate::entry::Entry;

        let mut e = Entry::new(Dn::from_str("cn=alice,dc=example").expect("bad dn"));
        e.add_ava("objectClass", "person".into());
        e.add_ava("cn", "alice".into());
        e.add_ava("uid", "1".into());

        let trees = [
            f_and(vec![
                f_pres("cn"),
                f_and(vec![f_eq("uid", "1".into()), f_eq("uid", "1".into())]),
            ]),
            f_or(vec![f_eq("cn", "bob".into()), f_or(vec![f_pres("uid")])]),
            f_not(f_not(f_eq("cn", "alice".into()))),
            f_not(f_eq("cn", "bob".into())),
        ];
        for tree in trees {
            assert_eq!(
                e.matches(&tree),
                e.matches(&tree.optimize()),
                "optimize changed semantics of {}",
                tree.render()
            );
        }
    }

    #[test]
    fn test_filter_size() {
        let tree = f_and(vec![
            f_eq("a", "1".into()),
            f_or(vec![f_eq("b", "2".into()), f_eq("c", "3".into())]),
        ]);
        assert_eq!(tree.size(), 5);
        assert_eq!(f_pres("a").size(), 1);
    }

    #[test]
    fn test_filter_short_circuit_evaluation() {
        let tree = f_or(vec![f_eq("cn", "hit".into()), f_eq("cn", "miss".into())]);

        let mut tested = Vec::new();
        let matched = tree.matches_with(&mut |leaf| {
            if let FilterExpr::Equality(_, v) = leaf.expr() {
                tested.push(v.to_string_lossy().to_string());
                v.as_str() == Some("hit")
            } else {
                false
            }
        });
        assert!(matched);
        // The second disjunct was never evaluated.
        assert_eq!(tested, vec!["hit"]);
    }

    #[test]
    fn test_filter_serde_round_trip() {
        let tree = f_and(vec![f_eq("cn", "alice".into()), f_pres("mail")]);
        let serialized = serde_json::to_string(&tree).expect("serialise failure");
        let restored: FilterNode = serde_json::from_str(&serialized).expect("parse failure");
        assert_eq!(tree, restored);
    }
}
