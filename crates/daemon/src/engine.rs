//! Reservation engine.
//!
//! Turns concurrent reserve/release calls into power decisions for shared
//! plugs. Only the 0 -> 1 and 1 -> 0 holder transitions touch hardware. Each
//! plug has its own async lock held across read-count-decide-act, so two
//! first reservers can never both switch a plug on, while different plugs
//! never wait on each other.

use chrono::Utc;
use futures::future::join_all;
use plug_common::{Identity, Plug, PlugInfo, PlugStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::{self, SharedDb};
use crate::driver::DeviceAdapter;
use crate::error::{DeviceError, EngineError, EngineResult};
use crate::policy::AccessPolicy;
use crate::registry::Registry;

/// Result of a reserve or release.
///
/// The logical change is committed even when `device_error` is set; the
/// caller learns the hardware did not follow.
#[derive(Debug, Clone)]
pub struct Transition {
    pub status: PlugStatus,
    /// Whether the call changed the store (false for a repeated reserve).
    pub changed: bool,
    pub device_error: Option<DeviceError>,
}

#[derive(Debug, Clone)]
pub struct ClearOutcome {
    pub cleared: usize,
    pub device_error: Option<DeviceError>,
}

#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    db: SharedDb,
    policy: AccessPolicy,
    devices: DeviceAdapter,
    locks: Arc<HashMap<String, Mutex<()>>>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, db: SharedDb, devices: DeviceAdapter) -> Self {
        let locks: HashMap<String, Mutex<()>> = registry
            .ids()
            .map(|id| (id.to_string(), Mutex::new(())))
            .collect();
        let policy = AccessPolicy::new(registry.clone(), db.clone());
        Engine {
            registry,
            db,
            policy,
            devices,
            locks: Arc::new(locks),
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn plug(&self, plug_id: &str) -> EngineResult<&Plug> {
        self.registry
            .get(plug_id)
            .ok_or_else(|| EngineError::NotFound(plug_id.to_string()))
    }

    fn plug_lock(&self, plug_id: &str) -> EngineResult<&Mutex<()>> {
        self.locks
            .get(plug_id)
            .ok_or_else(|| EngineError::NotFound(plug_id.to_string()))
    }

    pub async fn reserve(&self, plug_id: &str, user: &Identity) -> EngineResult<Transition> {
        let plug = self.plug(plug_id)?;
        if !self.policy.can_access(user, plug_id)? {
            warn!(plug = %plug_id, user = %user.user_id, "Reservation denied");
            return Err(EngineError::Forbidden {
                plug: plug_id.to_string(),
                user: user.user_id.clone(),
            });
        }

        let _scope = self.plug_lock(plug_id)?.lock().await;

        let (created, holders) = {
            let mut conn = db::lock(&self.db);
            db::reserve(&mut conn, plug_id, &user.user_id, Utc::now())?
        };

        let mut device_on = Some(true);
        let mut device_error = None;
        if created && holders.len() == 1 {
            info!(plug = %plug_id, user = %user.user_id, "First holder, switching on");
            match self.devices.turn_on(plug).await {
                Ok(on) => device_on = Some(on),
                Err(e) => {
                    error!(plug = %plug.id, address = %plug.address, error = %e, "Switch on failed, reservation kept");
                    device_on = None;
                    device_error = Some(e);
                }
            }
        } else if created {
            info!(plug = %plug_id, user = %user.user_id, active = holders.len(), "Joined plug already in use");
        } else {
            debug!(plug = %plug_id, user = %user.user_id, "Already holding plug");
        }

        Ok(Transition {
            status: PlugStatus {
                plug_id: plug_id.to_string(),
                device_on,
                active_users: holders.len(),
                holders,
            },
            changed: created,
            device_error,
        })
    }

    pub async fn release(&self, plug_id: &str, user: &Identity) -> EngineResult<Transition> {
        let plug = self.plug(plug_id)?;
        let _scope = self.plug_lock(plug_id)?.lock().await;

        let holders = {
            let mut conn = db::lock(&self.db);
            db::release(&mut conn, plug_id, &user.user_id)?
        }
        .ok_or_else(|| EngineError::NotInUse {
            plug: plug_id.to_string(),
            user: user.user_id.clone(),
        })?;

        let mut device_on = Some(true);
        let mut device_error = None;
        if holders.is_empty() {
            info!(plug = %plug_id, user = %user.user_id, "Last holder left, switching off");
            match self.devices.turn_off(plug).await {
                Ok(on) => device_on = Some(on),
                Err(e) => {
                    error!(plug = %plug.id, address = %plug.address, error = %e, "Switch off failed, release kept");
                    device_on = None;
                    device_error = Some(e);
                }
            }
        } else {
            info!(plug = %plug_id, user = %user.user_id, active = holders.len(), "Released, plug still in use");
        }

        Ok(Transition {
            status: PlugStatus {
                plug_id: plug_id.to_string(),
                device_on,
                active_users: holders.len(),
                holders,
            },
            changed: true,
            device_error,
        })
    }

    /// Live device state joined with current holders. An unreachable device
    /// yields `device_on: None` rather than an error.
    pub async fn status(&self, plug_id: &str, user: &Identity) -> EngineResult<PlugStatus> {
        let plug = self.plug(plug_id)?;
        debug!(plug = %plug_id, user = %user.user_id, "Status requested");
        let device_on = self.devices.power_state(plug).await.ok();

        let conn = db::lock(&self.db);
        let holders = db::holders(&conn, plug_id)?;
        Ok(PlugStatus {
            plug_id: plug_id.to_string(),
            device_on,
            active_users: holders.len(),
            holders,
        })
    }

    /// Drop every reservation on a plug and switch it off. Admin only.
    pub async fn force_clear(&self, plug_id: &str, actor: &Identity) -> EngineResult<ClearOutcome> {
        self.policy.require_admin(actor, plug_id)?;
        let plug = self.plug(plug_id)?;
        let _scope = self.plug_lock(plug_id)?.lock().await;

        let cleared = {
            let conn = db::lock(&self.db);
            db::clear_reservations(&conn, plug_id)?
        };
        warn!(plug = %plug_id, admin = %actor.user_id, cleared, "Force-cleared reservations");

        let device_error = match self.devices.turn_off(plug).await {
            Ok(_) => None,
            Err(e) => {
                error!(plug = %plug.id, address = %plug.address, error = %e, "Switch off after clear failed");
                Some(e)
            }
        };
        Ok(ClearOutcome { cleared, device_error })
    }

    /// Every plug the user may view. Device queries run concurrently and each
    /// one degrades to `None` on its own.
    pub async fn list(&self, user: &Identity) -> EngineResult<Vec<PlugInfo>> {
        let accessible = self.policy.list_accessible(user)?;
        let plugs: Vec<&Plug> = self
            .registry
            .iter()
            .filter(|plug| accessible.contains(&plug.id))
            .collect();

        let states = join_all(plugs.iter().map(|plug| self.devices.power_state(plug))).await;

        let conn = db::lock(&self.db);
        let mut infos = Vec::with_capacity(plugs.len());
        for (plug, state) in plugs.into_iter().zip(states) {
            let holders = db::holders(&conn, &plug.id)?;
            infos.push(PlugInfo {
                plug_id: plug.id.clone(),
                address: plug.address.clone(),
                device_on: state.ok(),
                active_users: holders.len(),
                holders,
            });
        }
        Ok(infos)
    }
}
