//! round-based delivery over the coordinator's channels.
//!
//! Bridges between cggmp24's Stream/Sink interface and the in-process
//! message router. Protocol messages travel as JSON inside a
//! [`WireMessage`] tagged with the protocol phase, so a party running
//! several sub-protocols can demultiplex its inbox.

use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use orchestrator::{Message, Outbound, PartyIdentity, ProtocolError, SortedPartyIds};
use round_based::{Incoming, MessageDestination, MessageType, Outgoing};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Sub-protocol a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Keygen,
    AuxInfo,
    Signing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keygen => write!(f, "keygen"),
            Self::AuxInfo => write!(f, "aux-info"),
            Self::Signing => write!(f, "signing"),
        }
    }
}

/// Payload routed between cggmp24 parties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub phase: Phase,
    /// JSON-encoded protocol message
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct Frame {
    sender: u16,
    broadcast: bool,
    body: Vec<u8>,
}

/// Inbox for one phase of one party.
///
/// Deliveries can arrive before the phase starts; they queue until the
/// protocol polls for them.
pub struct PhaseInbox {
    phase: Phase,
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

impl PhaseInbox {
    pub fn new(phase: Phase) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            phase,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Queues a routed message for the protocol.
    pub fn push(&self, message: Message<WireMessage>) {
        let frame = Frame {
            sender: message.from.index,
            broadcast: message.is_broadcast(),
            body: message.payload.body,
        };
        if self.tx.send(frame).is_err() {
            // Phase already finished; nothing left to consume it.
            debug!("Dropping late {} message from {}", self.phase, message.from);
        }
    }

    /// Connects a protocol run to this inbox. Can only be done once.
    pub fn connect<M>(
        &self,
        me: &PartyIdentity,
        parties: &SortedPartyIds,
        outbound: Outbound<WireMessage>,
    ) -> Result<(IncomingStream<M>, OutgoingSink<M>), ProtocolError> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| ProtocolError::new("inbox lock poisoned"))?
            .take()
            .ok_or_else(|| ProtocolError::new(format!("{} phase already started", self.phase)))?;

        Ok((
            IncomingStream {
                rx,
                next_id: 0,
                _msg: PhantomData,
            },
            OutgoingSink {
                phase: self.phase,
                me: me.clone(),
                parties: parties.clone(),
                tx: outbound,
                _msg: PhantomData,
            },
        ))
    }
}

/// Stream of decoded incoming protocol messages
pub struct IncomingStream<M> {
    rx: mpsc::UnboundedReceiver<Frame>,
    next_id: u64,
    _msg: PhantomData<fn() -> M>,
}

/// Sink encoding outgoing protocol messages onto the router
pub struct OutgoingSink<M> {
    phase: Phase,
    me: PartyIdentity,
    parties: SortedPartyIds,
    tx: Outbound<WireMessage>,
    _msg: PhantomData<fn(M)>,
}

impl<M> Stream for IncomingStream<M>
where
    M: DeserializeOwned,
{
    type Item = Result<Incoming<M>, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                let id = self.next_id;
                self.next_id += 1;

                let msg_type = if frame.broadcast {
                    MessageType::Broadcast
                } else {
                    MessageType::P2P
                };
                let item = serde_json::from_slice(&frame.body)
                    .map(|msg| Incoming {
                        id,
                        sender: frame.sender,
                        msg_type,
                        msg,
                    })
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<M> Sink<Outgoing<M>> for OutgoingSink<M>
where
    M: Serialize,
{
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Unbounded channel
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Outgoing<M>) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item.msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let payload = WireMessage {
            phase: self.phase,
            body,
        };

        let message = match item.recipient {
            MessageDestination::AllParties => Message::broadcast(self.me.clone(), payload),
            MessageDestination::OneParty(index) => {
                let to = self.parties.get(index).cloned().ok_or_else(|| {
                    let reason = format!("no party at index {index}");
                    io::Error::new(io::ErrorKind::InvalidInput, reason)
                })?;
                Message::p2p(self.me.clone(), to, payload)
            }
        };

        self.tx
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "router stopped"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
