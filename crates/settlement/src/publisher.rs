//! Root publisher: one active root, plus the replaced one for audit.

use std::sync::Arc;

use tracing::info;

use tranche_core::{short_hex, Address};

use crate::authority::{require, AdminAction, Authority};
use crate::Result;

pub struct RootPublisher {
    active: Option<[u8; 32]>,
    prior: Option<[u8; 32]>,
    /// When the active root last replaced another (unix seconds)
    replaced_at: Option<u64>,
    authority: Arc<dyn Authority>,
}

impl RootPublisher {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self {
            active: None,
            prior: None,
            replaced_at: None,
            authority,
        }
    }

    /// Make `root` the active root; the previous active root becomes prior.
    pub fn publish(&mut self, caller: &Address, root: [u8; 32], now: u64) -> Result<()> {
        require(self.authority.as_ref(), caller, AdminAction::PublishRoot)?;

        self.prior = self.active.replace(root);
        if self.prior.is_some() {
            self.replaced_at = Some(now);
        }

        info!(
            "Published root {} (prior {})",
            short_hex(&root),
            self.prior.map(|p| short_hex(&p)).unwrap_or_else(|| "none".to_string()),
        );
        Ok(())
    }

    /// The only root new claims are verified against
    pub fn active_root(&self) -> Option<&[u8; 32]> {
        self.active.as_ref()
    }

    pub fn prior_root(&self) -> Option<&[u8; 32]> {
        self.prior.as_ref()
    }

    pub fn replaced_at(&self) -> Option<u64> {
        self.replaced_at
    }

    /// Active or prior root. For audit queries; claims ignore the prior root.
    pub fn is_known_root(&self, root: &[u8; 32]) -> bool {
        self.active.as_ref() == Some(root) || self.prior.as_ref() == Some(root)
    }
}

impl std::fmt::Debug for RootPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootPublisher")
            .field("active", &self.active.map(hex::encode))
            .field("prior", &self.prior.map(hex::encode))
            .field("replaced_at", &self.replaced_at)
            .finish_non_exhaustive()
    }
}
