#![allow(dead_code)]

use async_trait::async_trait;
use plug_common::{Identity, Plug};
use plugd::driver::{Credentials, DeviceAdapter, DeviceDriver, DeviceSession, TransportError};
use plugd::{db, registry::Registry, Engine};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stand-in for physical plugs that records every call.
#[derive(Default)]
pub struct FakeDriver {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    power: Mutex<HashMap<String, bool>>,
    on_calls: Mutex<HashMap<String, usize>>,
    off_calls: Mutex<HashMap<String, usize>>,
    opened: Mutex<usize>,
    closed: Mutex<usize>,
    unreachable: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    failing_commands: Mutex<HashSet<String>>,
    hanging_commands: Mutex<HashSet<String>>,
    legacy: Mutex<HashSet<String>>,
}

impl FakeDriver {
    pub fn turn_on_calls(&self, address: &str) -> usize {
        self.state.on_calls.lock().unwrap().get(address).copied().unwrap_or(0)
    }

    pub fn turn_off_calls(&self, address: &str) -> usize {
        self.state.off_calls.lock().unwrap().get(address).copied().unwrap_or(0)
    }

    pub fn is_on(&self, address: &str) -> bool {
        self.state.power.lock().unwrap().get(address).copied().unwrap_or(false)
    }

    pub fn set_on(&self, address: &str, on: bool) {
        self.state.power.lock().unwrap().insert(address.to_string(), on);
    }

    pub fn sessions_opened(&self) -> usize {
        *self.state.opened.lock().unwrap()
    }

    pub fn sessions_closed(&self) -> usize {
        *self.state.closed.lock().unwrap()
    }

    /// Connections to this address fail outright.
    pub fn make_unreachable(&self, address: &str) {
        self.state.unreachable.lock().unwrap().insert(address.to_string());
    }

    /// Connections to this address never complete.
    pub fn make_hanging(&self, address: &str) {
        self.state.hanging.lock().unwrap().insert(address.to_string());
    }

    /// Connections succeed but on/off commands fail.
    pub fn fail_commands(&self, address: &str) {
        self.state.failing_commands.lock().unwrap().insert(address.to_string());
    }

    /// Connections succeed but on/off commands never complete.
    pub fn hang_commands(&self, address: &str) {
        self.state.hanging_commands.lock().unwrap().insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.state.unreachable.lock().unwrap().remove(address);
        self.state.hanging.lock().unwrap().remove(address);
        self.state.failing_commands.lock().unwrap().remove(address);
        self.state.hanging_commands.lock().unwrap().remove(address);
    }

    /// Report state through the old `system.get_sysinfo.relay_state` shape.
    pub fn use_legacy_payload(&self, address: &str) {
        self.state.legacy.lock().unwrap().insert(address.to_string());
    }
}

#[async_trait]
impl DeviceDriver for FakeDriver {
    async fn connect(
        &self,
        address: &str,
        _credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>, TransportError> {
        if self.state.unreachable.lock().unwrap().contains(address) {
            return Err(format!("connection refused by {address}").into());
        }
        let hanging = self.state.hanging.lock().unwrap().contains(address);
        if hanging {
            std::future::pending::<()>().await;
        }
        *self.state.opened.lock().unwrap() += 1;
        Ok(Box::new(FakeSession {
            address: address.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    address: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    async fn command(&mut self, on: bool) -> Result<(), TransportError> {
        let calls = if on { &self.state.on_calls } else { &self.state.off_calls };
        *calls.lock().unwrap().entry(self.address.clone()).or_default() += 1;
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        let hanging = self.state.hanging_commands.lock().unwrap().contains(&self.address);
        if hanging {
            std::future::pending::<()>().await;
        }
        if self.state.failing_commands.lock().unwrap().contains(&self.address) {
            return Err("device rejected command".into());
        }
        self.state.power.lock().unwrap().insert(self.address.clone(), on);
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn turn_on(&mut self) -> Result<(), TransportError> {
        self.command(true).await
    }

    async fn turn_off(&mut self) -> Result<(), TransportError> {
        self.command(false).await
    }

    async fn raw_state(&mut self) -> Result<Value, TransportError> {
        let on = self.state.power.lock().unwrap().get(&self.address).copied().unwrap_or(false);
        if self.state.legacy.lock().unwrap().contains(&self.address) {
            Ok(json!({ "system": { "get_sysinfo": { "relay_state": on as i64 } } }))
        } else {
            Ok(json!({ "device_on": on, "model": "fake" }))
        }
    }

    async fn close(&mut self) {
        *self.state.closed.lock().unwrap() += 1;
    }
}

pub struct Harness {
    pub engine: Engine,
    pub driver: Arc<FakeDriver>,
}

pub fn harness(plugs: &[(&str, &str)]) -> Harness {
    harness_with_timeout(plugs, Duration::from_millis(300))
}

pub fn harness_with_timeout(plugs: &[(&str, &str)], timeout: Duration) -> Harness {
    let registry = Registry::new(
        plugs
            .iter()
            .map(|(id, address)| Plug { id: id.to_string(), address: address.to_string() })
            .collect(),
    );
    let driver = Arc::new(FakeDriver::default());
    let devices = DeviceAdapter::new(driver.clone(), Credentials::default(), timeout);
    let conn = db::init_memory_db().expect("in-memory db");
    let engine = Engine::new(Arc::new(registry), Arc::new(Mutex::new(conn)), devices);
    Harness { engine, driver }
}

impl Harness {
    pub fn admin(&self) -> Identity {
        Identity::admin("root")
    }

    /// Create ordinary users with access to `plug`.
    pub fn users_with_grant(&self, names: &[&str], plug: &str) -> Vec<Identity> {
        let admin = self.admin();
        names
            .iter()
            .map(|name| {
                self.engine.policy().grant(&admin, name, plug).expect("grant");
                Identity::user(*name)
            })
            .collect()
    }
}
