//! Hierarchical handles (`Parent/Kind[key]/Child`) and the per-invocation registry
//! of live objects.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{HandleError, RegistrationError};

pub const SEPARATOR: char = '/';
const RESERVED: [char; 3] = [SEPARATOR, '[', ']'];

/// Address of one object in the invocation's object graph.
///
/// Equality, ordering and hashing use the canonical path only, so a handle can
/// be used directly as a store key.
#[derive(Clone)]
pub struct Handle {
    parent: Option<Box<Handle>>,
    kind: String,
    key: Option<String>,
    path: String,
}

impl Handle {
    pub fn new(parent: Option<&Handle>, kind: &str, key: Option<&str>) -> Result<Self, HandleError> {
        validate_part("kind", kind)?;
        if let Some(key) = key {
            validate_part("key", key)?;
        }
        let segment = match key {
            Some(key) => format!("{kind}[{key}]"),
            None => kind.to_string(),
        };
        let path = match parent {
            Some(parent) => format!("{}{SEPARATOR}{segment}", parent.path),
            None => segment,
        };
        Ok(Self {
            parent: parent.map(|p| Box::new(p.clone())),
            kind: kind.to_string(),
            key: key.map(str::to_string),
            path,
        })
    }

    pub fn root(kind: &str) -> Result<Self, HandleError> {
        Self::new(None, kind, None)
    }

    /// Child handle under `self`.
    pub fn nest(&self, kind: &str, key: Option<&str>) -> Result<Self, HandleError> {
        Self::new(Some(self), kind, key)
    }

    pub fn parse(path: &str) -> Result<Self, HandleError> {
        if path.is_empty() {
            return Err(malformed(path, "empty path"));
        }
        let mut handle: Option<Handle> = None;
        for segment in path.split(SEPARATOR) {
            let (kind, key) = split_segment(segment).map_err(|reason| malformed(path, &reason))?;
            let next = Handle::new(handle.as_ref(), kind, key)
                .map_err(|err| malformed(path, &err.to_string()))?;
            handle = Some(next);
        }
        handle.ok_or_else(|| malformed(path, "no segments"))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn parent(&self) -> Option<&Handle> {
        self.parent.as_deref()
    }
}

fn validate_part(field: &'static str, value: &str) -> Result<(), HandleError> {
    if value.is_empty() {
        return Err(HandleError::Empty { field });
    }
    if let Some(ch) = value.chars().find(|ch| RESERVED.contains(ch)) {
        return Err(HandleError::InvalidChar {
            field,
            value: value.to_string(),
            ch,
        });
    }
    Ok(())
}

fn split_segment(segment: &str) -> Result<(&str, Option<&str>), String> {
    match segment.find('[') {
        None => Ok((segment, None)),
        Some(open) => {
            let rest = &segment[open + 1..];
            let key = rest
                .strip_suffix(']')
                .ok_or_else(|| format!("segment '{segment}' has an unterminated key"))?;
            Ok((&segment[..open], Some(key)))
        }
    }
}

fn malformed(path: &str, reason: &str) -> HandleError {
    HandleError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.path).finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl FromStr for Handle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Handle::parse(s)
    }
}

/// Live objects constructed in this invocation, by canonical path.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    live: BTreeSet<String>,
}

impl HandleRegistry {
    pub fn register(&mut self, handle: &Handle) -> Result<(), RegistrationError> {
        if !self.live.insert(handle.path().to_string()) {
            return Err(RegistrationError::DuplicateObject(handle.path().to_string()));
        }
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.live.contains(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.live.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn canonical_path_nests_kinds_and_keys() {
        let charm = Handle::root("Charm").unwrap();
        let rel = charm.nest("Relation", Some("db:4")).unwrap();
        let unit = rel.nest("Unit", Some("mysql-0")).unwrap();
        assert_eq!(unit.path(), "Charm/Relation[db:4]/Unit[mysql-0]");
        assert_eq!(unit.parent().unwrap().path(), "Charm/Relation[db:4]");
        assert_eq!(unit.key(), Some("mysql-0"));
        assert_eq!(unit.kind(), "Unit");
    }

    #[test]
    fn parse_inverts_path() {
        let cases = [
            Handle::root("Charm").unwrap(),
            Handle::root("Charm").unwrap().nest("on", None).unwrap(),
            Handle::root("Charm")
                .unwrap()
                .nest("Relation", Some("7"))
                .unwrap()
                .nest("StoredStateData", Some("_stored"))
                .unwrap(),
        ];
        for handle in cases {
            let parsed = Handle::parse(handle.path()).unwrap();
            assert_eq!(parsed, handle);
            assert_eq!(parsed.key(), handle.key());
            assert_eq!(parsed.kind(), handle.kind());
            assert_eq!(parsed.parent(), handle.parent());
        }
    }

    #[test]
    fn rejects_reserved_characters() {
        assert!(matches!(
            Handle::root("a/b"),
            Err(HandleError::InvalidChar { ch: '/', .. })
        ));
        assert!(Handle::root("Charm").unwrap().nest("x", Some("k]")).is_err());
        assert!(matches!(Handle::root(""), Err(HandleError::Empty { .. })));
        assert!(Handle::root("Charm").unwrap().nest("x", Some("")).is_err());
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for bad in ["", "Charm//on", "Charm/on[", "Charm/on[x]y", "Charm/[x]"] {
            assert!(
                matches!(Handle::parse(bad), Err(HandleError::Malformed { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn equality_and_hashing_follow_path() {
        let a = Handle::root("Charm").unwrap().nest("on", None).unwrap();
        let b: Handle = "Charm/on".parse().unwrap();
        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn registry_rejects_two_live_objects_on_one_path() {
        let mut registry = HandleRegistry::default();
        let charm = Handle::root("Charm").unwrap();
        registry.register(&charm).unwrap();
        let err = registry.register(&Handle::parse("Charm").unwrap()).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateObject(path) if path == "Charm"));
        assert!(registry.contains("Charm"));
        assert_eq!(registry.len(), 1);
    }
}
