//! Administrative authority capability.
//!
//! The ledger never decides on its own who may advance epochs, publish
//! roots or halt operations. It asks an injected `Authority`, which can be
//! backed by a single key, a key set, or anything else that answers yes/no.

use std::collections::HashSet;

use tracing::warn;

use tranche_core::{short_hex, Address};

use crate::{Result, SettlementError};

/// Actions that require administrative authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    AdvanceEpoch,
    PublishRoot,
    HaltDeposits,
    HaltClaims,
}

pub trait Authority: Send + Sync {
    /// Whether `caller` may perform `action`.
    fn authorize(&self, caller: &Address, action: AdminAction) -> bool;
}

/// Fail with `NotAuthorized` unless the authority approves.
pub(crate) fn require(authority: &dyn Authority, caller: &Address, action: AdminAction) -> Result<()> {
    if authority.authorize(caller, action) {
        Ok(())
    } else {
        warn!("Rejected {:?} from {}", action, short_hex(caller));
        Err(SettlementError::NotAuthorized)
    }
}

/// One admin key authorizes everything
#[derive(Debug, Clone)]
pub struct SingleKeyAuthority {
    admin: Address,
}

impl SingleKeyAuthority {
    pub fn new(admin: Address) -> Self {
        Self { admin }
    }
}

impl Authority for SingleKeyAuthority {
    fn authorize(&self, caller: &Address, _action: AdminAction) -> bool {
        *caller == self.admin
    }
}

/// A set of operator keys, each with its own set of permitted actions
#[derive(Debug, Clone, Default)]
pub struct KeySetAuthority {
    grants: HashSet<(Address, AdminAction)>,
}

impl KeySetAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, key: Address, action: AdminAction) -> Self {
        self.grants.insert((key, action));
        self
    }

    pub fn grant_all(self, key: Address) -> Self {
        [
            AdminAction::AdvanceEpoch,
            AdminAction::PublishRoot,
            AdminAction::HaltDeposits,
            AdminAction::HaltClaims,
        ]
        .into_iter()
        .fold(self, |auth, action| auth.grant(key, action))
    }
}

impl Authority for KeySetAuthority {
    fn authorize(&self, caller: &Address, action: AdminAction) -> bool {
        self.grants.contains(&(*caller, action))
    }
}
