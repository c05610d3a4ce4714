//! Ports
//!
//! Graph-time port descriptions ([`PortSpec`], [`PortRef`]) and the run-time
//! endpoints ([`InPort`], [`OutPort`]) that carry tokens over bounded
//! channels.
//!
//! ```text
//!   OutPort ──send──▶ [bounded(capacity)] ──receive──▶ InPort
//!      │                                               (one producer)
//!      └──send──▶ [bounded(capacity)] ──receive──▶ InPort
//!                 sender blocks when full (back-pressure)
//!                 dropping every sender = close, after queued tokens drain
//! ```

use std::fmt;

use crossbeam_channel::{bounded, Receiver, RecvError, Sender};
use log::debug;
use serde::{Deserialize, Serialize};

use super::process::ProcessId;
use super::token::Token;

/// Default number of tokens a port channel buffers before the sender blocks.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Direction (and kind) of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortDirection {
    /// Data in-port (`{i:name}`)
    In,
    /// Data out-port (`{o:name}`)
    Out,
    /// Parameter in-port (`{p:name}`)
    ParamIn,
    /// Parameter out-port (generators)
    ParamOut,
}

impl PortDirection {
    /// True for ports a process reads from.
    pub fn is_input(self) -> bool {
        matches!(self, Self::In | Self::ParamIn)
    }

    /// The in-port direction an out-port of this direction may feed.
    pub fn feeds(self) -> Option<PortDirection> {
        match self {
            Self::Out => Some(Self::In),
            Self::ParamOut => Some(Self::ParamIn),
            _ => None,
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::In => "in",
            Self::Out => "out",
            Self::ParamIn => "param-in",
            Self::ParamOut => "param-out",
        };
        write!(f, "{}", name)
    }
}

/// A port as declared on a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
}

/// Address of one port in a workflow: process handle + name + direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PortRef {
    pub process: ProcessId,
    pub name: String,
    pub direction: PortDirection,
}

impl PortRef {
    pub fn new(process: ProcessId, name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            process,
            name: name.into(),
            direction,
        }
    }
}

/// Producer end of a connection.
pub type TokenSender = Sender<Token>;

/// Consumer end of a connection.
pub type TokenReceiver = Receiver<Token>;

/// Creates the bounded channel behind one connection.
pub fn port_channel(capacity: usize) -> (TokenSender, TokenReceiver) {
    bounded(capacity.max(1))
}

/// Sending end of a port. Broadcasts every token to all connected consumers.
#[derive(Debug)]
pub struct OutPort {
    name: String,
    senders: Vec<TokenSender>,
    sent: usize,
}

impl OutPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            senders: Vec::new(),
            sent: 0,
        }
    }

    /// Adds a downstream consumer.
    pub fn attach(&mut self, sender: TokenSender) {
        self.senders.push(sender);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live downstream consumers.
    pub fn consumers(&self) -> usize {
        self.senders.len()
    }

    /// Number of tokens sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Sends a token to every consumer, blocking while any channel is full.
    ///
    /// Consumers that have gone away are dropped from the broadcast list.
    /// Returns the number of consumers the token reached.
    pub fn send(&mut self, token: Token) -> usize {
        let name = &self.name;
        self.senders.retain(|tx| match tx.send(token.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!("Out-port '{}': consumer went away, detaching", name);
                false
            }
        });
        self.sent += 1;
        self.senders.len()
    }

    /// Closes the port. Consumers see closure after draining queued tokens.
    /// Closing twice is a no-op.
    pub fn close(&mut self) {
        self.senders.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Receiving end of a port. Fed by one producer, except an aggregator's
/// fan-in port where every producer holds a clone of the same sender.
#[derive(Debug)]
pub struct InPort {
    name: String,
    receiver: Option<TokenReceiver>,
    received: usize,
}

impl InPort {
    pub fn new(name: impl Into<String>, receiver: TokenReceiver) -> Self {
        Self {
            name: name.into(),
            receiver: Some(receiver),
            received: 0,
        }
    }

    /// An in-port with no producer; it reports closed immediately.
    pub fn disconnected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: None,
            received: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until a token arrives. `None` means the port is closed.
    pub fn receive(&mut self) -> Option<Token> {
        let result = self.receiver.as_ref()?.recv();
        self.accept(result)
    }

    /// The live channel, for waiting on several ports at once.
    pub(crate) fn receiver(&self) -> Option<&TokenReceiver> {
        self.receiver.as_ref()
    }

    /// Records the outcome of a receive performed on [`InPort::receiver`].
    pub(crate) fn accept(&mut self, result: Result<Token, RecvError>) -> Option<Token> {
        match result {
            Ok(token) => {
                self.received += 1;
                Some(token)
            }
            Err(RecvError) => {
                self.receiver = None;
                None
            }
        }
    }

    /// Number of tokens received so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Stops listening. Further receives return `None`; a blocked producer
    /// gets unblocked and detaches this consumer.
    pub fn close(&mut self) {
        self.receiver = None;
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}
