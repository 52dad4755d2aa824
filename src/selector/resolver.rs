//! Candidate endpoint resolution
//!
//! Resolution turns a target reference into the ordered list of endpoints the
//! selector picks from. The static resolver keeps that table in memory and is
//! filled from configuration or by tests.

use std::collections::HashSet;

use dashmap::DashMap;
use log::{debug, info};

use crate::core::{error::OrbResult, traits::EndpointResolver};

use super::endpoint::{Endpoint, ObjectRef, TargetIdentity};

/// In-memory resolver keyed by target identity.
///
/// Targets without an entry resolve to their primary endpoint alone.
#[derive(Default)]
pub struct StaticResolver {
    targets: DashMap<TargetIdentity, Vec<Endpoint>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the candidates of a target. Endpoints are re-owned by
    /// `identity`.
    pub fn insert(&self, identity: TargetIdentity, endpoints: Vec<Endpoint>) {
        debug!(
            "Inserting {} endpoints for target {identity}",
            endpoints.len()
        );
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.with_owner(identity.clone()))
            .collect();
        self.targets.insert(identity, endpoints);
    }

    pub fn remove(&self, identity: &TargetIdentity) -> Option<Vec<Endpoint>> {
        debug!("Removing endpoints for target {identity}");
        self.targets
            .remove(identity)
            .map(|(_, endpoints)| endpoints)
    }

    /// Replace the whole table, dropping targets not present in `entries`.
    pub fn reload(&self, entries: Vec<(TargetIdentity, Vec<Endpoint>)>) {
        info!("Reloading {} targets", entries.len());

        let new_ids: HashSet<TargetIdentity> = entries.iter().map(|(id, _)| id.clone()).collect();
        self.targets.retain(|id, _| new_ids.contains(id));

        for (identity, endpoints) in entries {
            self.insert(identity, endpoints);
        }
    }

    pub fn list_target_ids(&self) -> Vec<TargetIdentity> {
        self.targets
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl EndpointResolver for StaticResolver {
    fn resolve(&self, target: &ObjectRef) -> OrbResult<Vec<Endpoint>> {
        match self.targets.get(target.identity()) {
            Some(entry) => Ok(entry.value().clone()),
            None => Ok(vec![target.primary().clone()]),
        }
    }
}
