//! Inbound message dispatch
//!
//! Reserved method names form the control plane; every other call is
//! answered from the method table. Data events are client data for the
//! service they name.

use std::sync::Arc;

use crate::broker::{ClientStream, StreamBroker, Transport};
use crate::rpc::MethodTable;
use crate::wire::constants::{CMD_GOODBYE, CMD_HEARTBEAT, CMD_LIST, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE};
use crate::wire::{Message, MessageKind, Value};

/// What the connection should do after a message
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Outcome {
    pub reply: Option<Message>,
    pub close: bool,
}

impl Outcome {
    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            close: false,
        }
    }

    fn ok(name: &str) -> Self {
        Self::reply(Message::return_value(name, Value::Boolean(true)))
    }

    fn error(name: &str, reason: impl Into<String>) -> Self {
        Self::reply(Message::error(name, reason))
    }
}

pub(crate) struct Dispatcher {
    broker: Arc<StreamBroker>,
    methods: Arc<MethodTable>,
}

impl Dispatcher {
    pub fn new(broker: Arc<StreamBroker>, methods: Arc<MethodTable>) -> Self {
        Self { broker, methods }
    }

    pub fn broker(&self) -> &Arc<StreamBroker> {
        &self.broker
    }

    /// Handle one message from `client`
    pub fn handle(&self, client: &ClientStream, message: Message) -> Outcome {
        client.touch();

        match message.kind {
            MessageKind::Call => self.handle_call(client, &message),
            MessageKind::Event => {
                self.handle_event(client, &message);
                Outcome::default()
            }
            MessageKind::Return | MessageKind::Error => {
                tracing::debug!(
                    client = %client.id(),
                    kind = %message.kind,
                    name = %message.name,
                    "Ignoring reply sent by client"
                );
                Outcome::default()
            }
        }
    }

    fn handle_call(&self, client: &ClientStream, call: &Message) -> Outcome {
        let id = client.id();

        match call.name.as_str() {
            CMD_SUBSCRIBE => {
                let target = match call.body.as_slice() {
                    [Value::String(s)] => s.as_str(),
                    _ => {
                        return Outcome::error(CMD_SUBSCRIBE, "subscribe takes one string argument")
                    }
                };
                if client.transport() == Transport::Datagram {
                    return Outcome::error(
                        CMD_SUBSCRIBE,
                        "subscribe is not supported over datagrams",
                    );
                }
                match self.broker.subscribe(id, target) {
                    Ok(_) => Outcome::ok(CMD_SUBSCRIBE),
                    Err(e) => {
                        tracing::debug!(client = %id, service = %target, error = %e, "Subscribe refused");
                        Outcome::error(CMD_SUBSCRIBE, e.to_string())
                    }
                }
            }
            CMD_UNSUBSCRIBE => {
                if let Err(e) = self.broker.unsubscribe(id) {
                    tracing::debug!(client = %id, error = %e, "Unsubscribe failed");
                }
                Outcome::ok(CMD_UNSUBSCRIBE)
            }
            CMD_HEARTBEAT => Outcome::ok(CMD_HEARTBEAT),
            CMD_LIST => Outcome::reply(Message::return_value(
                CMD_LIST,
                Value::String(self.broker.registry().describe_xml()),
            )),
            CMD_GOODBYE => Outcome {
                reply: None,
                close: true,
            },
            _ => Outcome::reply(self.methods.dispatch(call)),
        }
    }

    fn handle_event(&self, client: &ClientStream, event: &Message) {
        let Some((timestamp_us, payload)) = event.as_event() else {
            tracing::warn!(
                client = %client.id(),
                service = %event.name,
                signature = %event.signature,
                "Data event without timestamp and payload"
            );
            return;
        };

        if let Err(e) = self
            .broker
            .client_data(client.id(), &event.name, timestamp_us, payload)
        {
            tracing::debug!(
                client = %client.id(),
                service = %event.name,
                bytes = payload.len(),
                error = %e,
                "Client data rejected"
            );
        }
    }
}
