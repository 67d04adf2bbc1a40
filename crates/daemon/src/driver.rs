//! Device driver abstraction and the per-call adapter the engine talks to.
//!
//! A [`DeviceDriver`] opens a [`DeviceSession`] to one physical plug. The
//! [`DeviceAdapter`] scopes every operation to a single session: connect,
//! act, re-query the device, close. Transport failures come back as
//! [`DeviceError`] carrying the plug id and address.

use async_trait::async_trait;
use plug_common::Plug;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::DeviceError;

pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait DeviceDriver: Send + Sync + 'static {
    /// Open a session to the device at `address`.
    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>, TransportError>;
}

/// One open connection to a plug. The adapter closes every session it opens,
/// including when the calling operation is cancelled.
#[async_trait]
pub trait DeviceSession: Send {
    async fn turn_on(&mut self) -> Result<(), TransportError>;
    async fn turn_off(&mut self) -> Result<(), TransportError>;
    /// Fetch the device's current state payload as reported by its firmware.
    async fn raw_state(&mut self) -> Result<Value, TransportError>;
    async fn close(&mut self);
}

/// Normalise a device state payload to on/off.
///
/// Firmware generations report power differently. Checked in order:
/// `device_on`, legacy top-level `on`, then `relay_state` under
/// `system.get_sysinfo` (or directly under `system`) where 1 means on.
/// Anything else is off.
pub fn parse_power_state(raw: &Value) -> bool {
    if let Some(v) = raw.get("device_on") {
        return truthy(v);
    }
    if let Some(v) = raw.get("on") {
        return truthy(v);
    }

    let system = raw.get("system");
    let sysinfo = system.and_then(|s| s.get("get_sysinfo")).or(system);
    if let Some(relay) = sysinfo.and_then(|s| s.get("relay_state")) {
        return relay_level(relay) == Some(1);
    }

    debug!(payload = %raw, "No recognised power field in device state, assuming off");
    false
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "on" | "1"),
        _ => false,
    }
}

fn relay_level(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    On,
    Off,
}

/// Owns an open session and closes it on every exit path. If the owning
/// future is dropped before [`SessionGuard::close`] runs, the close is
/// spawned onto the runtime instead.
struct SessionGuard {
    session: Option<Box<dyn DeviceSession>>,
}

impl SessionGuard {
    fn new(session: Box<dyn DeviceSession>) -> Self {
        SessionGuard { session: Some(session) }
    }

    /// Issue the command, if any, then re-read the device state.
    async fn exchange(&mut self, command: Option<Command>) -> Result<Value, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Err("session already closed".into());
        };
        match command {
            Some(Command::On) => session.turn_on().await?,
            Some(Command::Off) => session.turn_off().await?,
            None => {}
        }
        session.raw_state().await
    }

    async fn close(mut self, grace: Duration) {
        if let Some(mut session) = self.session.take() {
            if tokio::time::timeout(grace, session.close()).await.is_err() {
                warn!("Device session close timed out");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { session.close().await });
                }
                Err(_) => warn!("Device session dropped outside a runtime, not closed"),
            }
        }
    }
}

/// Session-per-call wrapper around a [`DeviceDriver`].
///
/// Every call is bounded by `timeout`: connect and the device exchange share
/// one deadline, and the session is closed afterwards whatever the outcome.
#[derive(Clone)]
pub struct DeviceAdapter {
    driver: Arc<dyn DeviceDriver>,
    credentials: Credentials,
    timeout: Duration,
}

impl DeviceAdapter {
    pub fn new(driver: Arc<dyn DeviceDriver>, credentials: Credentials, timeout: Duration) -> Self {
        DeviceAdapter { driver, credentials, timeout }
    }

    /// Switch the plug on and return the state the device confirms afterwards.
    pub async fn turn_on(&self, plug: &Plug) -> Result<bool, DeviceError> {
        self.run(plug, Some(Command::On)).await
    }

    /// Switch the plug off and return the state the device confirms afterwards.
    pub async fn turn_off(&self, plug: &Plug) -> Result<bool, DeviceError> {
        self.run(plug, Some(Command::Off)).await
    }

    pub async fn power_state(&self, plug: &Plug) -> Result<bool, DeviceError> {
        self.run(plug, None).await
    }

    fn timed_out(&self, plug: &Plug, stage: &str) -> DeviceError {
        warn!(plug = %plug.id, address = %plug.address, stage, "Device call timed out");
        DeviceError::new(
            &plug.id,
            &plug.address,
            format!("no response within {}ms during {}", self.timeout.as_millis(), stage),
        )
    }

    async fn run(&self, plug: &Plug, command: Option<Command>) -> Result<bool, DeviceError> {
        let deadline = Instant::now() + self.timeout;

        let connect = self.driver.connect(&plug.address, &self.credentials);
        let session = match timeout_at(deadline, connect).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(plug = %plug.id, address = %plug.address, error = %e, "Device connect failed");
                return Err(DeviceError::new(&plug.id, &plug.address, e.to_string()));
            }
            Err(_) => return Err(self.timed_out(plug, "connect")),
        };

        let mut guard = SessionGuard::new(session);
        let exchanged = timeout_at(deadline, guard.exchange(command)).await;
        guard.close(self.timeout).await;

        let raw = match exchanged {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(plug = %plug.id, address = %plug.address, ?command, error = %e, "Device call failed");
                return Err(DeviceError::new(&plug.id, &plug.address, e.to_string()));
            }
            Err(_) => return Err(self.timed_out(plug, "exchange")),
        };

        let on = parse_power_state(&raw);
        match command {
            Some(command) => info!(plug = %plug.id, ?command, on, "Device switched"),
            None => debug!(plug = %plug.id, on, "Device state read"),
        }
        Ok(on)
    }
}
