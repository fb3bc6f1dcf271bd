//! Channel messaging over the transport

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

use crate::context::Session;
use crate::error::TransportResult;
use crate::messages::message::{Message, MessageBody, MessageKind, MessageTypes};
use crate::transport::{SessionId, Transport};

/// Publish/subscribe messaging for text and binary payloads
pub struct MessageBus {
    session: Arc<Session>,
    enabled: MessageTypes,
    text: Vec<Message>,
    data: Vec<Message>,
    closed: bool,
    events_tx: Sender<Message>,
    events_rx: Receiver<Message>,
}

impl MessageBus {
    pub fn new(session: Arc<Session>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            session,
            enabled: MessageTypes::NONE,
            text: Vec::new(),
            data: Vec::new(),
            closed: false,
            events_tx,
            events_rx,
        }
    }

    /// Enable receiving `types`, in addition to what is already enabled
    pub fn enable(&mut self, types: MessageTypes) {
        match self
            .session
            .live()
            .and_then(|(transport, id)| transport.enable_messages(id, types))
        {
            Ok(()) => {
                self.enabled |= types;
                tracing::debug!("Message types enabled: {:#04b}", self.enabled.bits());
            }
            Err(e) => tracing::warn!("Failed to enable messages: {}", e),
        }
    }

    pub fn enabled_types(&self) -> MessageTypes {
        self.enabled
    }

    pub fn subscribe(&self, channel: &str) {
        if let Err(e) = self
            .session
            .live()
            .and_then(|(transport, id)| transport.subscribe(id, channel))
        {
            tracing::debug!("Failed to subscribe to {}: {}", channel, e);
        }
    }

    pub fn unsubscribe(&self, channel: &str) {
        if let Err(e) = self
            .session
            .live()
            .and_then(|(transport, id)| transport.unsubscribe(id, channel))
        {
            tracing::debug!("Failed to unsubscribe from {}: {}", channel, e);
        }
    }

    /// Text messages received by the last tick
    pub fn text_messages(&self) -> &[Message] {
        if self.session.is_alive() {
            &self.text
        } else {
            &[]
        }
    }

    /// Data messages received by the last tick
    pub fn data_messages(&self) -> &[Message] {
        if self.session.is_alive() {
            &self.data
        } else {
            &[]
        }
    }

    /// One event per received message, text before data
    pub fn events(&self) -> &Receiver<Message> {
        &self.events_rx
    }

    /// Take every pending event
    pub fn drain_events(&self) -> Vec<Message> {
        self.events_rx.try_iter().collect()
    }

    /// Receive the messages that arrived since the last tick
    pub fn tick(&mut self) {
        self.text.clear();
        self.data.clear();
        if self.closed || self.enabled.is_empty() {
            return;
        }

        let session = self.session.clone();
        let Ok((transport, id)) = session.live() else {
            return;
        };

        if let Err(e) = transport.clear_messages(id, self.enabled) {
            tracing::debug!("Failed to clear messages: {}", e);
        }
        if let Err(e) = transport.update_messages(id, self.enabled) {
            tracing::debug!("Failed to update messages: {}", e);
            return;
        }

        for kind in MessageKind::ALL {
            if !self.enabled.contains(kind.mask()) {
                continue;
            }

            match read_batch(transport, id, kind) {
                Ok(batch) => match kind {
                    MessageKind::Text => self.text = batch,
                    MessageKind::Data => self.data = batch,
                },
                Err(e) if e.is_transient() => {
                    tracing::debug!("Dropped {:?} message batch: {}", kind, e)
                }
                Err(e) => tracing::warn!("Dropped {:?} message batch: {}", kind, e),
            }
        }

        if !self.text.is_empty() || !self.data.is_empty() {
            tracing::debug!(
                "Received {} text and {} data messages",
                self.text.len(),
                self.data.len()
            );
        }

        for message in self.text.iter().chain(self.data.iter()) {
            let _ = self.events_tx.send(message.clone());
        }
    }

    /// Send a text message on `channel`
    ///
    /// `local_only` keeps the message within this process instead of broadcasting it.
    pub fn send_text_message(&self, channel: &str, text: &str, local_only: bool) {
        self.send(MessageKind::Text, channel, text.as_bytes(), local_only);
    }

    /// Send a binary message on `channel`
    pub fn send_data_message(&self, channel: &str, data: &[u8], local_only: bool) {
        self.send(MessageKind::Data, channel, data, local_only);
    }

    fn send(&self, kind: MessageKind, channel: &str, payload: &[u8], local_only: bool) {
        if let Err(e) = self
            .session
            .live()
            .and_then(|(transport, id)| transport.send_message(id, kind, channel, payload, local_only))
        {
            tracing::debug!("Failed to send {:?} message on {}: {}", kind, channel, e);
        }
    }

    /// Flush pending receive state. Runs once; also run on drop.
    pub fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }

        self.text.clear();
        self.data.clear();
        if self.enabled.is_empty() {
            return;
        }

        if let Ok((transport, id)) = self.session.live() {
            let _ = transport.update_messages(id, self.enabled);
            let _ = transport.clear_messages(id, self.enabled);
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read one type's inbox; any failed read drops the whole batch
fn read_batch(
    transport: &dyn Transport,
    id: SessionId,
    kind: MessageKind,
) -> TransportResult<Vec<Message>> {
    let count = transport.message_count(id, kind)?;
    let mut batch = Vec::with_capacity(count);

    for index in 0..count {
        let mut payload = transport.message_payload(id, kind, index)?;
        let size = transport.message_size(id, kind, index)?;
        payload.truncate(size);

        let body = match kind {
            MessageKind::Text => MessageBody::Text(String::from_utf8_lossy(&payload).into_owned()),
            MessageKind::Data => MessageBody::Data(payload),
        };

        batch.push(Message {
            channel: transport.message_channel(id, kind, index)?,
            sender: transport.message_sender(id, kind, index)?,
            local_only: transport.message_local_only(id, kind, index)?,
            body,
        });
    }

    Ok(batch)
}
