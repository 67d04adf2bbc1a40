use chrono::Utc;
use plug_common::{Grant, Identity};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::db::{self, SharedDb};
use crate::error::{EngineError, EngineResult};
use crate::registry::Registry;

/// Admins reach every plug; everyone else needs an explicit grant.
#[derive(Clone)]
pub struct AccessPolicy {
    registry: Arc<Registry>,
    db: SharedDb,
}

impl AccessPolicy {
    pub fn new(registry: Arc<Registry>, db: SharedDb) -> Self {
        AccessPolicy { registry, db }
    }

    pub fn can_access(&self, user: &Identity, plug_id: &str) -> EngineResult<bool> {
        if user.is_admin() {
            return Ok(true);
        }
        if !self.registry.contains(plug_id) {
            return Ok(false);
        }
        let conn = db::lock(&self.db);
        Ok(db::has_grant(&conn, &user.user_id, plug_id)?)
    }

    /// Plugs this user may see, limited to plugs still in the registry.
    pub fn list_accessible(&self, user: &Identity) -> EngineResult<BTreeSet<String>> {
        if user.is_admin() {
            return Ok(self.registry.ids().map(str::to_string).collect());
        }
        let conn = db::lock(&self.db);
        let granted = db::granted_plugs(&conn, &user.user_id)?;
        Ok(granted
            .into_iter()
            .filter(|plug| self.registry.contains(plug))
            .collect())
    }

    pub fn grant(&self, actor: &Identity, user_id: &str, plug_id: &str) -> EngineResult<()> {
        self.require_admin(actor, plug_id)?;
        if !self.registry.contains(plug_id) {
            return Err(EngineError::NotFound(plug_id.to_string()));
        }
        let conn = db::lock(&self.db);
        if db::insert_grant(&conn, user_id, plug_id, Utc::now())? {
            info!(admin = %actor.user_id, user = %user_id, plug = %plug_id, "Granted plug access");
        }
        Ok(())
    }

    /// Revoking a grant that does not exist succeeds.
    pub fn revoke(&self, actor: &Identity, user_id: &str, plug_id: &str) -> EngineResult<()> {
        self.require_admin(actor, plug_id)?;
        let conn = db::lock(&self.db);
        if db::delete_grant(&conn, user_id, plug_id)? {
            info!(admin = %actor.user_id, user = %user_id, plug = %plug_id, "Revoked plug access");
        }
        Ok(())
    }

    pub fn grants(&self, actor: &Identity) -> EngineResult<Vec<Grant>> {
        self.require_admin(actor, "*")?;
        let conn = db::lock(&self.db);
        Ok(db::load_grants(&conn)?)
    }

    pub fn require_admin(&self, actor: &Identity, plug_id: &str) -> EngineResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                plug: plug_id.to_string(),
                user: actor.user_id.clone(),
            })
        }
    }
}
