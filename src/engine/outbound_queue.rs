//! FIFO of serialized envelope groups awaiting a transport.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::protocol::Envelope;

/// One serialized group, ready to be written as a single payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutboundItem {
    pub(crate) payload: String,
    /// Header used for the discrete transport's request headers.
    header: Option<Value>,
}

impl OutboundItem {
    fn from_group(group: &[Envelope]) -> serde_json::Result<Self> {
        let payload = Envelope::serialize_group(group)?;
        let header = group
            .iter()
            .filter_map(Envelope::header)
            .find(|header| header.is_object())
            .cloned();
        Ok(Self { payload, header })
    }

    /// Request headers for sending this item as a discrete request.
    ///
    /// The envelope header wins when there is one; otherwise the caller's
    /// default set is used. Non-string header values are sent as JSON text.
    pub(crate) fn request_headers(&self, defaults: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        match self.header.as_ref().and_then(Value::as_object) {
            Some(header) => header
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect(),
            None => defaults.clone(),
        }
    }
}

/// Outbound queue, drained oldest first.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    items: VecDeque<OutboundItem>,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serialize `group` and append it. Empty groups are ignored.
    pub(crate) fn push_group(&mut self, group: &[Envelope]) -> serde_json::Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        self.items.push_back(OutboundItem::from_group(group)?);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<OutboundItem> {
        self.items.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
