use std::{borrow::Cow, fmt};

/// Who owns a registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Process-wide entries, e.g. cooldowns.
    Global,
    /// Entries owned by a tenant (a guild).  Dropped together by `Registry::remove_scope`.
    Tenant(u64),
}

/// Composite key shared by the state store, the cache and the interval functions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub scope: Scope,
    pub name: Cow<'static, str>,
}

impl Key {
    pub fn global(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            scope: Scope::Global,
            name: name.into(),
        }
    }

    pub fn tenant(id: impl Into<u64>, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            scope: Scope::Tenant(id.into()),
            name: name.into(),
        }
    }

    pub fn is_in(&self, scope: Scope) -> bool {
        self.scope == scope
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.scope {
            Scope::Global => write!(f, "global/{}", self.name),
            Scope::Tenant(id) => write!(f, "{}/{}", id, self.name),
        }
    }
}
