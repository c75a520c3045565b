//! Abstract radio link: receive a frame with a bounded wait, send bytes to an
//! endpoint without waiting for acknowledgement.

use std::time::Duration;

use crate::address::HardwareAddress;
use crate::error::RadioError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: HardwareAddress,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    Frame(Frame),
    /// Nothing arrived within the wait. The normal idle case.
    Timeout,
}

pub trait Radio {
    async fn receive(&mut self, timeout: Duration) -> Result<Reception, RadioError>;

    /// Fire-and-forget. `Ok` means the payload was handed to the link, not
    /// that the endpoint received it.
    async fn send(&self, target: HardwareAddress, payload: Vec<u8>) -> Result<(), RadioError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted in-memory link. Returns queued receptions in order, then
    /// times out; records every accepted send.
    #[derive(Default)]
    pub(crate) struct FakeRadio {
        pub(crate) inbound: VecDeque<Result<Reception, RadioError>>,
        pub(crate) sent: Mutex<Vec<(HardwareAddress, Vec<u8>)>>,
        pub(crate) reject_sends: bool,
    }

    impl FakeRadio {
        pub(crate) fn push_frame(&mut self, sender: HardwareAddress, payload: Vec<u8>) {
            self.inbound
                .push_back(Ok(Reception::Frame(Frame { sender, payload })));
        }

        pub(crate) fn sent(&self) -> Vec<(HardwareAddress, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Radio for FakeRadio {
        async fn receive(&mut self, _timeout: Duration) -> Result<Reception, RadioError> {
            self.inbound.pop_front().unwrap_or(Ok(Reception::Timeout))
        }

        async fn send(&self, target: HardwareAddress, payload: Vec<u8>) -> Result<(), RadioError> {
            if self.reject_sends {
                return Err(RadioError::Send {
                    target,
                    reason: "link down".into(),
                });
            }
            self.sent.lock().unwrap().push((target, payload));
            Ok(())
        }
    }
}
