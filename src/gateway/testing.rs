//! Test doubles shared by the gateway, API and pairing tests.

use super::outbound::LinkSource;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use wasla_core::{
    error::WaslaError,
    message::{GroupInfo, OutboundPayload},
    traits::Link,
};

/// Records every send; optionally fails them all.
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<(String, OutboundPayload)>>,
    groups: Vec<GroupInfo>,
    fail: bool,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn with_groups(groups: Vec<GroupInfo>) -> Arc<Self> {
        Arc::new(Self {
            groups,
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Text bodies only, in send order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, p)| match p {
                OutboundPayload::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Link for RecordingLink {
    async fn send(&self, to: &str, payload: &OutboundPayload) -> Result<String, WaslaError> {
        if self.fail {
            return Err(WaslaError::Channel("connection reset".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), payload.clone()));
        Ok(format!("MSG{}", sent.len()))
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, WaslaError> {
        if self.fail {
            return Err(WaslaError::Channel("connection reset".into()));
        }
        Ok(self.groups.clone())
    }
}

/// A link source that always returns the same link (or none).
pub struct FixedLink(Option<Arc<dyn Link>>);

impl FixedLink {
    pub fn new(link: Option<Arc<dyn Link>>) -> Self {
        Self(link)
    }
}

impl LinkSource for FixedLink {
    fn current_link(&self) -> Option<Arc<dyn Link>> {
        self.0.clone()
    }
}
