//! Trait abstraction for the charger link to enable testing

use async_trait::async_trait;

use super::Snapshot;
use crate::error::Result;

/// Anything that can report the status of every charger slot
///
/// `start` and `close` bracket a session and are called exactly once each by
/// the monitor. `snapshot` fails with [`ChargeError::DeviceRead`] on
/// temporary link trouble.
///
/// [`ChargeError::DeviceRead`]: crate::error::ChargeError::DeviceRead
#[async_trait]
pub trait StatusSource: Send {
    /// Begin the charging session
    async fn start(&mut self) -> Result<()>;

    /// Read the current status of all slots
    async fn snapshot(&mut self) -> Result<Snapshot>;

    /// Release the device
    async fn close(&mut self) -> Result<()>;

    /// Short human readable name for logs
    fn describe(&self) -> String;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::ChargeError;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// One scripted answer to a `snapshot` call
    #[derive(Debug, Clone)]
    pub enum Reply {
        Slots(Snapshot),
        ReadError,
        Fatal,
    }

    /// Mock charger answering polls from a script
    ///
    /// Clones share state so a test can keep a handle after moving the
    /// source into the monitor.
    #[derive(Clone)]
    pub struct ScriptedSource {
        pub replies: Arc<Mutex<VecDeque<Reply>>>,
        pub snapshot_calls: Arc<Mutex<usize>>,
        pub start_calls: Arc<Mutex<usize>>,
        pub close_calls: Arc<Mutex<usize>>,
        pub cancel_at: Arc<Mutex<Option<(usize, CancellationToken)>>>,
    }

    impl ScriptedSource {
        pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into_iter().collect())),
                snapshot_calls: Arc::new(Mutex::new(0)),
                start_calls: Arc::new(Mutex::new(0)),
                close_calls: Arc::new(Mutex::new(0)),
                cancel_at: Arc::new(Mutex::new(None)),
            }
        }

        /// Cancel `token` once the `call`-th snapshot has been answered
        pub fn cancel_after(&self, call: usize, token: CancellationToken) {
            *self.cancel_at.lock().unwrap() = Some((call, token));
        }

        pub fn snapshot_calls(&self) -> usize {
            *self.snapshot_calls.lock().unwrap()
        }

        pub fn start_calls(&self) -> usize {
            *self.start_calls.lock().unwrap()
        }

        pub fn close_calls(&self) -> usize {
            *self.close_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn start(&mut self) -> Result<()> {
            *self.start_calls.lock().unwrap() += 1;
            Ok(())
        }

        async fn snapshot(&mut self) -> Result<Snapshot> {
            let call = {
                let mut calls = self.snapshot_calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if let Some((at, token)) = self.cancel_at.lock().unwrap().as_ref() {
                if *at == call {
                    token.cancel();
                }
            }
            match self.replies.lock().unwrap().pop_front() {
                Some(Reply::Slots(slots)) => Ok(slots),
                Some(Reply::ReadError) => Err(ChargeError::DeviceRead("mock link hiccup".into())),
                Some(Reply::Fatal) | None => Err(ChargeError::Device("mock script exhausted".into())),
            }
        }

        async fn close(&mut self) -> Result<()> {
            *self.close_calls.lock().unwrap() += 1;
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted charger".to_string()
        }
    }
}
