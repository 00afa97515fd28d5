//! Identity canonicalization.
//!
//! Linked identities (LIDs) are rewritten to their phone-number form whenever
//! the resolver knows the mapping. Phone-number identities are already
//! canonical and are returned untouched.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::config::IdentityConfig;
use crate::error::Result;
use crate::jid::{DEFAULT_USER_SERVER, Jid, LID_SERVER};

/// External identity mapping provider (usually the transport's LID store).
///
/// Implementations must tolerate concurrent calls.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Phone-number identity for a linked identity, if known.
    async fn resolve_canonical(&self, jid: &Jid) -> Result<Option<Jid>>;

    /// Linked identity for a phone-number identity, if known.
    async fn resolve_alias_for(&self, jid: &Jid) -> Result<Option<Jid>>;
}

/// Canonicalize `jid`. Returns the canonical identity and whether it differs
/// from the input. Resolver failures count as "no mapping yet".
pub async fn canonicalize(resolver: &dyn IdentityResolver, jid: &Jid) -> (Jid, bool) {
    if !jid.is_lid() {
        return (jid.clone(), false);
    }
    match resolver.resolve_canonical(jid).await {
        Ok(Some(pn)) if pn != *jid => (pn, true),
        Ok(_) => (jid.clone(), false),
        Err(err) => {
            warn!(jid = %jid, error = %err, "Failed to get PN for LID");
            (jid.clone(), false)
        }
    }
}

/// In-process bidirectional LID/PN map keyed by user part.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    // lid user -> pn user, pn user -> lid user
    maps: RwLock<(HashMap<String, String>, HashMap<String, String>)>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver seeded from the `[identity]` config section.
    pub fn from_config(config: &IdentityConfig) -> Self {
        let resolver = Self::new();
        for mapping in &config.mappings {
            resolver.insert(&mapping.lid, &mapping.pn);
        }
        resolver
    }

    /// Record that linked user `lid` is phone user `pn`.
    pub fn insert(&self, lid: &str, pn: &str) {
        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        maps.0.insert(lid.to_string(), pn.to_string());
        maps.1.insert(pn.to_string(), lid.to_string());
    }

    pub fn len(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdentityResolver for MemoryResolver {
    async fn resolve_canonical(&self, jid: &Jid) -> Result<Option<Jid>> {
        if !jid.is_lid() {
            return Ok(None);
        }
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        Ok(maps
            .0
            .get(&jid.user)
            .map(|pn| jid.with_user_on(pn, DEFAULT_USER_SERVER)))
    }

    async fn resolve_alias_for(&self, jid: &Jid) -> Result<Option<Jid>> {
        if !jid.is_pn() {
            return Ok(None);
        }
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        Ok(maps
            .1
            .get(&jid.user)
            .map(|lid| jid.with_user_on(lid, LID_SERVER)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LidMapping;
    use crate::error::Error;

    struct Failing;

    #[async_trait]
    impl IdentityResolver for Failing {
        async fn resolve_canonical(&self, _jid: &Jid) -> Result<Option<Jid>> {
            Err(Error::Identity("store offline".to_string()))
        }

        async fn resolve_alias_for(&self, _jid: &Jid) -> Result<Option<Jid>> {
            Err(Error::Identity("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn phone_number_is_already_canonical() {
        let resolver = MemoryResolver::new();
        resolver.insert("77", "1001");
        let (jid, changed) = canonicalize(&resolver, &Jid::pn("1001")).await;
        assert_eq!(jid, Jid::pn("1001"));
        assert!(!changed);
    }

    #[tokio::test]
    async fn known_lid_resolves_to_phone_number() {
        let resolver = MemoryResolver::new();
        resolver.insert("77", "1001");
        let (jid, changed) = canonicalize(&resolver, &Jid::lid("77")).await;
        assert_eq!(jid, Jid::pn("1001"));
        assert!(changed);
    }

    #[tokio::test]
    async fn device_survives_canonicalization() {
        let resolver = MemoryResolver::new();
        resolver.insert("77", "1001");
        let sender: Jid = "77:3@lid".parse().expect("parse");
        let (jid, _) = canonicalize(&resolver, &sender).await;
        assert_eq!(jid.to_string(), "1001:3@s.whatsapp.net");
    }

    #[tokio::test]
    async fn unknown_lid_is_returned_unchanged() {
        let resolver = MemoryResolver::new();
        let (jid, changed) = canonicalize(&resolver, &Jid::lid("77")).await;
        assert_eq!(jid, Jid::lid("77"));
        assert!(!changed);
    }

    #[tokio::test]
    async fn resolver_failure_is_a_miss() {
        let (jid, changed) = canonicalize(&Failing, &Jid::lid("77")).await;
        assert_eq!(jid, Jid::lid("77"));
        assert!(!changed);
    }

    #[tokio::test]
    async fn reverse_lookup_finds_alias() {
        let resolver = MemoryResolver::from_config(&IdentityConfig {
            mappings: vec![LidMapping {
                lid: "77".to_string(),
                pn: "1001".to_string(),
            }],
        });
        assert_eq!(resolver.len(), 1);
        let alias = resolver
            .resolve_alias_for(&Jid::pn("1001"))
            .await
            .expect("resolve");
        assert_eq!(alias, Some(Jid::lid("77")));
        let none = resolver
            .resolve_alias_for(&Jid::lid("77"))
            .await
            .expect("resolve");
        assert!(none.is_none());
    }
}
