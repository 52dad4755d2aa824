//! Sticky endpoint selection with ordered failover
//!
//! For every logical target the selector remembers which endpoint was used
//! last and hands it out again until a failure makes the caller advance
//! through the freshly resolved candidate list.

pub mod endpoint;
pub mod resolver;

use std::collections::HashMap;

use log::{debug, info};
use parking_lot::Mutex;

use crate::core::error::{OrbError, OrbResult};

pub use endpoint::{Endpoint, ObjectRef, StickyKey, TargetIdentity, EPHEMERAL_PORT};
pub use resolver::StaticResolver;

/// Primary-to-endpoint manager.
///
/// A single lock covers every read and write of the sticky map, so concurrent
/// requests to the same target always observe one serialized sticky choice.
/// Which of several concurrent first requests records the entry is not
/// defined (last writer wins).
#[derive(Default)]
pub struct EndpointSelector {
    sticky: Mutex<HashMap<StickyKey, Endpoint>>,
}

impl EndpointSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sticky map key for a primary endpoint.
    pub fn key(primary: &Endpoint) -> StickyKey {
        if primary.is_ephemeral() {
            StickyKey::Target(primary.owner().clone())
        } else {
            StickyKey::Endpoint(primary.clone())
        }
    }

    /// Forget the endpoint remembered for `primary`.
    pub fn reset(&self, primary: &Endpoint) {
        let mut sticky = self.sticky.lock();
        if let Some(previous) = sticky.remove(&Self::key(primary)) {
            info!("Reset sticky endpoint {previous} for primary {primary}");
        }
    }

    /// Whether another candidate follows `previous`.
    ///
    /// The first attempt (`previous` is `None`) always has a candidate.
    pub fn has_next(
        &self,
        primary: &Endpoint,
        previous: Option<&Endpoint>,
        candidates: &[Endpoint],
    ) -> OrbResult<bool> {
        let _sticky = self.sticky.lock();
        let Some(previous) = previous else {
            return Ok(true);
        };
        let index = Self::position(primary, previous, candidates)?;
        Ok(index + 1 < candidates.len())
    }

    /// Endpoint to use for the next attempt.
    pub fn next(
        &self,
        primary: &Endpoint,
        previous: Option<&Endpoint>,
        candidates: &[Endpoint],
    ) -> OrbResult<Endpoint> {
        let key = Self::key(primary);
        let mut sticky = self.sticky.lock();

        let Some(previous) = previous else {
            return Self::select_sticky(&mut sticky, key, primary, candidates);
        };

        let index = Self::position(primary, previous, candidates)?;
        let chosen = candidates.get(index + 1).cloned().ok_or_else(|| {
            OrbError::StaleCandidateList(format!(
                "no candidate after {previous} for primary {primary}"
            ))
        })?;

        debug!("Failing over from {previous} to {chosen} for primary {primary}");
        sticky.insert(key, chosen.clone());
        Ok(chosen)
    }

    /// Endpoint currently remembered for `primary`, if any.
    pub fn sticky(&self, primary: &Endpoint) -> Option<Endpoint> {
        self.sticky.lock().get(&Self::key(primary)).cloned()
    }

    pub fn len(&self) -> usize {
        self.sticky.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sticky.lock().is_empty()
    }

    fn select_sticky(
        sticky: &mut HashMap<StickyKey, Endpoint>,
        key: StickyKey,
        primary: &Endpoint,
        candidates: &[Endpoint],
    ) -> OrbResult<Endpoint> {
        if let Some(remembered) = sticky.get(&key) {
            // The cached value may be owned by an outdated reference, hand out
            // the matching element of the current list instead.
            if let Some(current) = candidates.iter().find(|c| c.same_contact(remembered)) {
                return Ok(current.clone());
            }
            debug!("Sticky endpoint {remembered} for primary {primary} is gone, reselecting");
            sticky.remove(&key);
        }

        let first = candidates.first().cloned().ok_or_else(|| {
            OrbError::NoCandidates(format!("empty candidate list for primary {primary}"))
        })?;

        debug!("Selected {first} for primary {primary}");
        sticky.insert(key, first.clone());
        Ok(first)
    }

    fn position(
        primary: &Endpoint,
        previous: &Endpoint,
        candidates: &[Endpoint],
    ) -> OrbResult<usize> {
        candidates
            .iter()
            .position(|c| c.same_contact(previous))
            .ok_or_else(|| {
                OrbError::StaleCandidateList(format!(
                    "{previous} missing from candidates of primary {primary}"
                ))
            })
    }
}
