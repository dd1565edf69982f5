//! Distinguished name value types. A `Dn` is an ordered sequence of `Rdn`s
//! in LDAP canonical order: the most specific component first, the closest
//! to the root last. Both types are immutable once constructed; anything
//! that looks like mutation returns a new value.
//!
//! Parsing covers the practical subset of RFC 4514: backslash escaped
//! specials, `\HH` hex pairs, and multi valued rdns joined with `+`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

use crate::error::OperationError;

const ESCAPED_SPECIALS: &[char] = &['"', '#', '+', ',', ';', '<', '>', '=', '\\', ' '];

/// A single attribute value assertion within an rdn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ava {
    attr: AttrString,
    value: String,
}

impl Ava {
    fn parse(raw: &str) -> Result<Self, OperationError> {
        let eq = find_unescaped(raw, '=')
            .ok_or_else(|| OperationError::InvalidRdn(format!("missing '=' in '{raw}'")))?;
        let attr = raw[..eq].trim();
        let value = unescape_value(raw[eq + 1..].trim())?;

        if attr.is_empty()
            || !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(OperationError::InvalidRdn(format!(
                "invalid attribute type '{attr}'"
            )));
        }
        if value.is_empty() {
            return Err(OperationError::InvalidRdn(format!(
                "empty value for '{attr}'"
            )));
        }

        Ok(Ava {
            attr: attr.into(),
            value,
        })
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    fn normalized(&self) -> (String, String) {
        (self.attr.to_lowercase(), self.value.to_lowercase())
    }
}

impl fmt::Display for Ava {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, escape_value(&self.value))
    }
}

/// A relative distinguished name: one or more avas joined with `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// The first (usually only) attribute type of this rdn.
    pub fn attr(&self) -> &str {
        self.avas[0].attr()
    }

    /// The first (usually only) value of this rdn.
    pub fn value(&self) -> &str {
        self.avas[0].value()
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// Case insensitive comparison in normalized form. Multi valued rdns
    /// compare as sets, so `cn=a+ou=b` equals `OU=B+CN=A`.
    pub fn eq_normalized(&self, other: &Rdn) -> bool {
        if self.avas.len() != other.avas.len() {
            return false;
        }
        let mut a: Vec<_> = self.avas.iter().map(Ava::normalized).collect();
        let mut b: Vec<_> = other.avas.iter().map(Ava::normalized).collect();
        a.sort();
        b.sort();
        a == b
    }
}

impl FromStr for Rdn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let avas = split_unescaped(s, '+')
            .iter()
            .map(|p| Ava::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        if avas.is_empty() {
            return Err(OperationError::InvalidRdn("empty rdn".to_string()));
        }
        Ok(Rdn { avas })
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ava in &self.avas {
            if !first {
                write!(f, "+")?;
            }
            first = false;
            write!(f, "{ava}")?;
        }
        Ok(())
    }
}

/// A distinguished name. May be empty (the root DSE).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn empty() -> Self {
        Dn { rdns: Vec::new() }
    }

    /// Build a dn from an rdn and the dn of its parent.
    pub fn from_rdn_and_parent(rdn: Rdn, parent: &Dn) -> Self {
        let mut rdns = Vec::with_capacity(parent.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(parent.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// The most specific component, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Everything but the most specific component. The parent of the empty
    /// dn is the empty dn.
    pub fn parent(&self) -> Dn {
        Dn {
            rdns: self.rdns.iter().skip(1).cloned().collect(),
        }
    }

    /// Replace the most specific component, keeping the parent.
    pub fn with_rdn(&self, rdn: Rdn) -> Dn {
        Dn::from_rdn_and_parent(rdn, &self.parent())
    }

    /// The canonical comparison form: attribute types and values lowercased.
    pub fn normalized(&self) -> String {
        let mut out = String::new();
        let mut first = true;
        for rdn in &self.rdns {
            if !first {
                out.push(',');
            }
            first = false;
            let mut norm: Vec<_> = rdn.avas.iter().map(Ava::normalized).collect();
            norm.sort();
            let mut inner_first = true;
            for (a, v) in norm {
                if !inner_first {
                    out.push('+');
                }
                inner_first = false;
                out.push_str(&a);
                out.push('=');
                out.push_str(&escape_value(&v));
            }
        }
        out
    }

    pub fn eq_normalized(&self, other: &Dn) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(other.rdns.iter())
                .all(|(a, b)| a.eq_normalized(b))
    }

    /// True when `self` names an entry at or above `other` in the tree.
    /// The empty dn is an ancestor of everything.
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        if self.rdns.len() > other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        self.rdns
            .iter()
            .zip(other.rdns[offset..].iter())
            .all(|(a, b)| a.eq_normalized(b))
    }

    /// Strip an ancestor `prefix` from this name, yielding the relative
    /// remainder. Walks the components from the most specific end toward
    /// the root until the remainder head lines up with the prefix
    /// (case-insensitive); the removed components are the composed name.
    pub fn relative_to(&self, prefix: &Dn) -> Result<Dn, OperationError> {
        if !prefix.is_ancestor_of(self) {
            warn!(name = %self, prefix = %prefix, "compose failed, prefix is not an ancestor");
            return Err(OperationError::PrefixNotAnAncestor);
        }
        Ok(Dn {
            rdns: self.rdns[..self.rdns.len() - prefix.rdns.len()].to_vec(),
        })
    }
}

impl FromStr for Dn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Dn::empty());
        }
        let rdns = split_unescaped(s, ',')
            .iter()
            .map(|p| Rdn::from_str(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                // An unparseable component poisons the whole name.
                OperationError::InvalidRdn(r) => OperationError::InvalidDn(r),
                e => e,
            })?;
        Ok(Dn { rdns })
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rdn in &self.rdns {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

// Splitting a dn string needs escape awareness, a plain str::split would
// tear `cn=a\,b` apart.
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn find_unescaped(s: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == target {
            return Some(idx);
        }
    }
    None
}

fn unescape_value(raw: &str) -> Result<String, OperationError> {
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let next = chars
            .next()
            .ok_or_else(|| OperationError::InvalidRdn("trailing escape".to_string()))?;
        if ESCAPED_SPECIALS.contains(&next) {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
        } else if next.is_ascii_hexdigit() {
            let second = chars
                .next()
                .filter(|c| c.is_ascii_hexdigit())
                .ok_or_else(|| OperationError::InvalidRdn("truncated hex escape".to_string()))?;
            let mut hex = String::with_capacity(2);
            hex.push(next);
            hex.push(second);
            let b = u8::from_str_radix(&hex, 16)
                .map_err(|_| OperationError::InvalidRdn("invalid hex escape".to_string()))?;
            bytes.push(b);
        } else {
            return Err(OperationError::InvalidRdn(format!(
                "invalid escape '\\{next}'"
            )));
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| OperationError::InvalidRdn("value is not valid utf8".to_string()))
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len());
    for (idx, c) in value.chars().enumerate() {
        let leading = idx == 0;
        let trailing = idx == last;
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '=' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '#' | ' ' if leading => {
                out.push('\\');
                out.push(c);
            }
            ' ' if trailing => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\{:02X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{Dn, Rdn};
    use crate::error::OperationError;

    #[test]
    fn test_dn_parse_and_display() {
        let dn = Dn::from_str("cn=alice,ou=people,dc=example,dc=com").expect("parse failure");
        assert_eq!(dn.len(), 4);
        assert_eq!(dn.rdn().map(|r| r.attr()), Some("cn"));
        assert_eq!(dn.rdn().map(|r| r.value()), Some("alice"));
        assert_eq!(dn.to_string(), "cn=alice,ou=people,dc=example,dc=com");
    }

    #[test]
    fn test_dn_empty() {
        let dn = Dn::from_str("").expect("parse failure");
        assert!(dn.is_empty());
        assert_eq!(dn.to_string(), "");
        assert_eq!(dn.parent(), Dn::empty());
    }

    #[test]
    fn test_dn_escapes() {
        let dn = Dn::from_str(r"cn=smith\, john,dc=example").expect("parse failure");
        assert_eq!(dn.len(), 2);
        assert_eq!(dn.rdn().map(|r| r.value()), Some("smith, john"));
        // Round trips with the escape restored.
        assert_eq!(dn.to_string(), r"cn=smith\, john,dc=example");

        let hex = Dn::from_str(r"cn=a\2bb,dc=example").expect("parse failure");
        assert_eq!(hex.rdn().map(|r| r.value()), Some("a+b"));
    }

    #[test]
    fn test_dn_invalid() {
        assert!(matches!(
            Dn::from_str("not a dn"),
            Err(OperationError::InvalidDn(_))
        ));
        assert!(matches!(
            Dn::from_str("cn=a,=b"),
            Err(OperationError::InvalidDn(_))
        ));
        assert!(matches!(
            Rdn::from_str("cn="),
            Err(OperationError::InvalidRdn(_))
        ));
    }

    #[test]
    fn test_rdn_multivalued() {
        let a = Rdn::from_str("cn=a+ou=b").expect("parse failure");
        let b = Rdn::from_str("OU=B+CN=A").expect("parse failure");
        assert!(a.eq_normalized(&b));
        assert_eq!(a.to_string(), "cn=a+ou=b");
    }

    #[test]
    fn test_dn_parent_and_rebuild() {
        let dn = Dn::from_str("cn=a,ou=x,dc=y").expect("parse failure");
        assert_eq!(dn.parent().to_string(), "ou=x,dc=y");

        let renamed = dn.with_rdn(Rdn::from_str("cn=b").expect("parse failure"));
        assert_eq!(renamed.to_string(), "cn=b,ou=x,dc=y");

        let moved = Dn::from_rdn_and_parent(
            dn.rdn().expect("empty dn").clone(),
            &Dn::from_str("ou=z,dc=y").expect("parse failure"),
        );
        assert_eq!(moved.to_string(), "cn=a,ou=z,dc=y");
    }

    #[test]
    fn test_dn_ancestry() {
        let base = Dn::from_str("ou=people,DC=Example,DC=Com").expect("parse failure");
        let leaf = Dn::from_str("cn=alice,ou=People,dc=example,dc=com").expect("parse failure");

        assert!(base.is_ancestor_of(&leaf));
        assert!(!leaf.is_ancestor_of(&base));
        assert!(Dn::empty().is_ancestor_of(&leaf));
        // Ancestry includes self.
        assert!(leaf.is_ancestor_of(&leaf));
    }

    #[test]
    fn test_dn_relative_to() {
        let leaf = Dn::from_str("cn=alice,ou=people,dc=example,dc=com").expect("parse failure");
        let prefix = Dn::from_str("OU=People,DC=EXAMPLE,dc=com").expect("parse failure");

        let rel = leaf.relative_to(&prefix).expect("compose failure");
        assert_eq!(rel.to_string(), "cn=alice");

        // The full name relative to itself is empty.
        let nothing = leaf.relative_to(&leaf).expect("compose failure");
        assert!(nothing.is_empty());

        let stranger = Dn::from_str("ou=groups,dc=example,dc=com").expect("parse failure");
        assert_eq!(
            leaf.relative_to(&stranger),
            Err(OperationError::PrefixNotAnAncestor)
        );
    }

    #[test]
    fn test_dn_normalized() {
        let a = Dn::from_str("CN=Alice,OU=People,DC=Example").expect("parse failure");
        let b = Dn::from_str("cn=alice,ou=people,dc=example").expect("parse failure");
        assert_eq!(a.normalized(), b.normalized());
        assert!(a.eq_normalized(&b));
        assert_ne!(a, b);
    }
}
