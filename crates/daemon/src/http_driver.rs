//! JSON-over-HTTP driver for plug gateways.
//!
//! `GET http://{address}/state` returns the device's raw state payload and
//! `POST http://{address}/power` with `{"device_on": bool}` switches it.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;

use crate::driver::{Credentials, DeviceDriver, DeviceSession, TransportError};

#[derive(Clone)]
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpDriver { client })
    }
}

#[async_trait]
impl DeviceDriver for HttpDriver {
    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>, TransportError> {
        let mut session = HttpSession {
            client: self.client.clone(),
            base: format!("http://{}", address.trim_end_matches('/')),
            credentials: credentials.clone(),
            open: true,
            cached: None,
        };
        // Handshake: a device that cannot report its state is not usable.
        session.cached = Some(session.fetch_state().await?);
        Ok(Box::new(session))
    }
}

struct HttpSession {
    client: Client,
    base: String,
    credentials: Credentials,
    open: bool,
    /// State read during the handshake, served to the first `raw_state`
    /// unless a command has been sent since.
    cached: Option<Value>,
}

impl HttpSession {
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if self.credentials.username.is_empty() {
            req
        } else {
            req.basic_auth(&self.credentials.username, Some(&self.credentials.password))
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err("session already closed".into())
        }
    }

    async fn fetch_state(&self) -> Result<Value, TransportError> {
        self.ensure_open()?;
        let req = self.client.get(format!("{}/state", self.base));
        let state = self.authorize(req).send().await?.error_for_status()?.json::<Value>().await?;
        Ok(state)
    }

    async fn set_power(&mut self, on: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.cached = None;
        let req = self.client.post(format!("{}/power", self.base)).json(&json!({ "device_on": on }));
        self.authorize(req).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for HttpSession {
    async fn turn_on(&mut self) -> Result<(), TransportError> {
        self.set_power(true).await
    }

    async fn turn_off(&mut self) -> Result<(), TransportError> {
        self.set_power(false).await
    }

    async fn raw_state(&mut self) -> Result<Value, TransportError> {
        self.ensure_open()?;
        match self.cached.take() {
            Some(state) => Ok(state),
            None => self.fetch_state().await,
        }
    }

    async fn close(&mut self) {
        self.open = false;
        self.cached = None;
    }
}
