//! An in memory nexus for exercising the chain in tests. Entries live in
//! an ordered map keyed by normalized dn, so results come back in a
//! deterministic order. This is deliberately a flat store: tree structure
//! comes entirely from dn ancestry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::dn::{Dn, Rdn};
use crate::entry::Entry;
use crate::error::OperationError;
use crate::event::SearchScope;
use crate::filter::FilterNode;
use crate::modify::ModifyList;
use crate::server::DirectoryNexus;
use crate::value::AttributeValue;

pub(crate) struct MemoryNexus {
    entries: Mutex<BTreeMap<String, Arc<Entry>>>,
}

impl MemoryNexus {
    pub(crate) fn new() -> Self {
        MemoryNexus {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn take(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError> {
        self.entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .remove(&dn.normalized())
            .ok_or(OperationError::NoSuchEntry)
    }

    fn store(&self, entry: Entry) -> Result<(), OperationError> {
        self.entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .insert(entry.dn().normalized(), Arc::new(entry));
        Ok(())
    }
}

impl DirectoryNexus for MemoryNexus {
    fn add(&self, entry: &Entry) -> Result<(), OperationError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?;
        let key = entry.dn().normalized();
        if entries.contains_key(&key) {
            return Err(OperationError::EntryAlreadyExists);
        }
        entries.insert(key, Arc::new(entry.clone()));
        Ok(())
    }

    fn delete(&self, dn: &Dn) -> Result<(), OperationError> {
        self.take(dn).map(|_| ())
    }

    fn modify(&self, dn: &Dn, modlist: &ModifyList) -> Result<(), OperationError> {
        let entry = self.lookup(dn)?;
        let changed = entry.apply_modlist(modlist)?;
        self.store(changed)
    }

    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<(), OperationError> {
        let entry = self.take(dn)?;
        let old_rdn = dn
            .rdn()
            .ok_or_else(|| OperationError::InvalidDn("cannot rename the root dse".to_string()))?;

        let mut renamed = entry.with_dn(dn.with_rdn(new_rdn.clone()));
        if delete_old_rdn {
            let old_value = AttributeValue::from(old_rdn.value());
            let purge = ModifyList::new_list(vec![crate::modify::m_delete(
                old_rdn.attr(),
                vec![old_value],
            )]);
            renamed = renamed.apply_modlist(&purge)?;
        }
        renamed.add_ava(new_rdn.attr(), AttributeValue::from(new_rdn.value()));
        self.store(renamed)
    }

    fn move_entry(&self, dn: &Dn, new_superior: &Dn) -> Result<(), OperationError> {
        let entry = self.take(dn)?;
        let rdn = dn
            .rdn()
            .ok_or_else(|| OperationError::InvalidDn("cannot move the root dse".to_string()))?;
        self.store(entry.with_dn(Dn::from_rdn_and_parent(rdn.clone(), new_superior)))
    }

    fn lookup(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError> {
        self.entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .get(&dn.normalized())
            .cloned()
            .ok_or(OperationError::NoSuchEntry)
    }

    fn has_entry(&self, dn: &Dn) -> Result<bool, OperationError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .contains_key(&dn.normalized()))
    }

    fn list(&self, dn: &Dn) -> Result<Vec<Arc<Entry>>, OperationError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .values()
            .filter(|e| e.dn().parent().eq_normalized(dn))
            .cloned()
            .collect())
    }

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &FilterNode,
    ) -> Result<Vec<Arc<Entry>>, OperationError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| OperationError::Backend("lock poisoned".to_string()))?
            .values()
            .filter(|e| match scope {
                SearchScope::Base => e.dn().eq_normalized(base),
                SearchScope::OneLevel => e.dn().parent().eq_normalized(base),
                SearchScope::Subtree => base.is_ancestor_of(e.dn()),
                SearchScope::Subordinate => {
                    base.is_ancestor_of(e.dn()) && !e.dn().eq_normalized(base)
                }
            })
            .filter(|e| e.matches(filter))
            .cloned()
            .collect())
    }

    fn compare(
        &self,
        dn: &Dn,
        attr: &str,
        value: &AttributeValue,
    ) -> Result<bool, OperationError> {
        let entry = self.lookup(dn)?;
        Ok(entry.attribute_value_pres(attr, value))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::MemoryNexus;
    use crate::dn::{Dn, Rdn};
    use crate::entry::Entry;
    use crate::error::OperationError;
    use crate::server::DirectoryNexus;

    fn seeded() -> MemoryNexus {
        let nexus = MemoryNexus::new();
        for dn in ["dc=example", "ou=people,dc=example", "cn=a,ou=people,dc=example"] {
            let mut e = Entry::new(Dn::from_str(dn).expect("bad dn"));
            e.add_ava("objectClass", "top".into());
            if let Some(rdn) = e.dn().rdn() {
                let attr = rdn.attr().to_string();
                let value = rdn.value().to_string();
                e.add_ava(&attr, value.as_str().into());
            }
            nexus.add(&e).expect("seed failure");
        }
        nexus
    }

    #[test]
    fn test_memory_nexus_rename_rewrites_rdn_attr() {
        let nexus = seeded();
        let dn = Dn::from_str("cn=a,ou=people,dc=example").expect("bad dn");
        nexus
            .rename(&dn, &Rdn::from_str("cn=b").expect("bad rdn"), true)
            .expect("rename failure");

        assert_eq!(nexus.has_entry(&dn), Ok(false));
        let renamed = nexus
            .lookup(&Dn::from_str("cn=b,ou=people,dc=example").expect("bad dn"))
            .expect("lookup failure");
        assert!(renamed.attribute_value_pres("cn", &"b".into()));
        assert!(!renamed.attribute_value_pres("cn", &"a".into()));
    }

    #[test]
    fn test_memory_nexus_rename_keep_old_rdn() {
        let nexus = seeded();
        let dn = Dn::from_str("cn=a,ou=people,dc=example").expect("bad dn");
        nexus
            .rename(&dn, &Rdn::from_str("cn=b").expect("bad rdn"), false)
            .expect("rename failure");

        let renamed = nexus
            .lookup(&Dn::from_str("cn=b,ou=people,dc=example").expect("bad dn"))
            .expect("lookup failure");
        assert!(renamed.attribute_value_pres("cn", &"a".into()));
        assert!(renamed.attribute_value_pres("cn", &"b".into()));
    }

    #[test]
    fn test_memory_nexus_list_children() {
        let nexus = seeded();
        let children = nexus
            .list(&Dn::from_str("dc=example").expect("bad dn"))
            .expect("list failure");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].dn().to_string(), "ou=people,dc=example");
    }

    #[test]
    fn test_memory_nexus_missing_entry() {
        let nexus = seeded();
        let missing = Dn::from_str("cn=ghost,dc=example").expect("bad dn");
        assert_eq!(nexus.delete(&missing), Err(OperationError::NoSuchEntry));
        assert!(nexus.lookup(&missing).is_err());
    }
}
