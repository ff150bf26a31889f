//! Scripted in-memory display for tests.

use std::sync::Arc;

use async_trait::async_trait;
use mdc_codec::InputSource;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{MdcSession, MdcTransport};
use crate::{Error, Result};

/// Every interaction with the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FakeCall {
    Open,
    BlindPowerOn,
    GetPower,
    SetPower(bool),
    SetInput(InputSource),
}

struct Inner {
    reachable: bool,
    stall_opens: bool,
    failing_opens: u32,
    wake_on_blind: bool,
    ignore_power_on: bool,
    fail_probe: bool,
    failing_probes: u32,
    fail_commands: bool,
    power: Value,
    input: Option<InputSource>,
    calls: Vec<FakeCall>,
}

/// A display that starts reachable and off.
#[derive(Clone)]
pub(crate) struct FakeDisplay {
    inner: Arc<Mutex<Inner>>,
}

impl FakeDisplay {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                reachable: true,
                stall_opens: false,
                failing_opens: 0,
                wake_on_blind: false,
                ignore_power_on: false,
                fail_probe: false,
                failing_probes: 0,
                fail_commands: false,
                power: json!(0),
                input: None,
                calls: Vec::new(),
            })),
        }
    }

    pub(crate) fn transport(&self) -> Arc<dyn MdcTransport> {
        Arc::new(FakeTransport {
            inner: self.inner.clone(),
        })
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Connection attempts hang until the caller's timeout fires.
    pub(crate) fn stall_opens(&self, stall: bool) {
        self.inner.lock().stall_opens = stall;
    }

    pub(crate) fn fail_next_opens(&self, count: u32) {
        self.inner.lock().failing_opens = count;
    }

    /// Blind power-on makes the display reachable and on.
    pub(crate) fn wake_on_blind_power_on(&self, wake: bool) {
        self.inner.lock().wake_on_blind = wake;
    }

    /// Power-on commands are acknowledged but the panel stays off.
    pub(crate) fn ignore_power_on(&self, ignore: bool) {
        self.inner.lock().ignore_power_on = ignore;
    }

    pub(crate) fn fail_probe(&self, fail: bool) {
        self.inner.lock().fail_probe = fail;
    }

    pub(crate) fn fail_next_probes(&self, count: u32) {
        self.inner.lock().failing_probes = count;
    }

    pub(crate) fn fail_commands(&self, fail: bool) {
        self.inner.lock().fail_commands = fail;
    }

    /// Raw reading the next probes report.
    pub(crate) fn set_power(&self, raw: Value) {
        self.inner.lock().power = raw;
    }

    pub(crate) fn input(&self) -> Option<InputSource> {
        self.inner.lock().input
    }

    pub(crate) fn calls(&self) -> Vec<FakeCall> {
        self.inner.lock().calls.clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&FakeCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget recorded calls.
    pub(crate) fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }
}

struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl MdcTransport for FakeTransport {
    async fn open(&self) -> Result<Box<dyn MdcSession>> {
        let stall = {
            let mut inner = self.inner.lock();
            inner.calls.push(FakeCall::Open);
            inner.stall_opens
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock();
        if inner.failing_opens > 0 {
            inner.failing_opens -= 1;
            return Err(Error::unreachable("connection refused"));
        }
        if !inner.reachable {
            return Err(Error::unreachable("connection refused"));
        }
        Ok(Box::new(FakeSession {
            inner: self.inner.clone(),
        }))
    }

    async fn send_blind_power_on(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCall::BlindPowerOn);
        if inner.wake_on_blind {
            inner.reachable = true;
            inner.power = json!(1);
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        "fake:1515".to_string()
    }
}

struct FakeSession {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl MdcSession for FakeSession {
    async fn power(&mut self) -> Result<Value> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCall::GetPower);
        if inner.failing_probes > 0 {
            inner.failing_probes -= 1;
            return Err(Error::comm("malformed reply"));
        }
        if inner.fail_probe {
            return Err(Error::comm("malformed reply"));
        }
        Ok(inner.power.clone())
    }

    async fn set_power(&mut self, on: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCall::SetPower(on));
        if inner.fail_commands {
            return Err(Error::comm("command rejected"));
        }
        if !(on && inner.ignore_power_on) {
            inner.power = json!(u8::from(on));
        }
        Ok(())
    }

    async fn set_input_source(&mut self, source: InputSource) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCall::SetInput(source));
        if inner.fail_commands {
            return Err(Error::comm("command rejected"));
        }
        inner.input = Some(source);
        Ok(())
    }
}
