//! Build-time bucket registration and lookup.
//!
//! The router is an ordered, immutable mapping from bucket name to
//! definition, constructed once at startup and passed by reference to
//! the dispatcher — never ambient global state.

use crate::models::bucket::BucketDefinition;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("bucket `{0}` is already registered")]
pub struct DuplicateBucket(pub String);

/// Collects bucket definitions before the router is sealed.
#[derive(Debug)]
pub struct RouterBuilder<C> {
    buckets: BTreeMap<String, BucketDefinition<C>>,
}

impl<C: 'static> RouterBuilder<C> {
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    /// Register a bucket. Names are unique; reuse is a build error.
    pub fn register(mut self, def: BucketDefinition<C>) -> Result<Self, DuplicateBucket> {
        let name = def.name().to_string();
        if self.buckets.contains_key(&name) {
            return Err(DuplicateBucket(name));
        }
        self.buckets.insert(name, def);
        Ok(self)
    }

    /// Seal the table. No dynamic add/remove after this point.
    pub fn build(self) -> BucketRouter<C> {
        BucketRouter {
            buckets: Arc::new(self.buckets),
        }
    }
}

impl<C: 'static> Default for RouterBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, cheaply cloneable bucket table.
#[derive(Debug)]
pub struct BucketRouter<C> {
    buckets: Arc<BTreeMap<String, BucketDefinition<C>>>,
}

impl<C> Clone for BucketRouter<C> {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
        }
    }
}

impl<C> BucketRouter<C> {
    pub fn resolve(&self, name: &str) -> Option<&BucketDefinition<C>> {
        self.buckets.get(name)
    }

    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bucket::BucketKind;

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = RouterBuilder::<()>::new()
            .register(BucketDefinition::new("avatars", BucketKind::File))
            .unwrap()
            .register(BucketDefinition::new("avatars", BucketKind::File))
            .unwrap_err();
        assert_eq!(err.0, "avatars");
    }

    #[test]
    fn resolve_finds_registered_buckets_only() {
        let router = RouterBuilder::<()>::new()
            .register(BucketDefinition::new("avatars", BucketKind::File))
            .unwrap()
            .build();
        assert!(router.resolve("avatars").is_some());
        assert!(router.resolve("missing").is_none());
    }
}
