//! In-process message routing between parties.
//!
//! Each delivery is its own task so a slow party never holds up the event
//! loop. Delivery failures surface on the run's error channel; routing
//! mistakes (self-addressed or unknown recipients) are returned directly
//! because they abort the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{OrchestratorError, Result};
use crate::message::Message;
use crate::party::Party;

pub struct MessageRouter<P: Party> {
    parties: Arc<[Arc<P>]>,
    errors: mpsc::Sender<OrchestratorError>,
    cancel: CancellationToken,
    dispatched: Arc<AtomicUsize>,
}

impl<P: Party> MessageRouter<P> {
    /// `parties[k]` must be the party at sorted position `k`.
    pub fn new(
        parties: Arc<[Arc<P>]>,
        errors: mpsc::Sender<OrchestratorError>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            parties,
            errors,
            cancel,
            dispatched: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total deliveries launched so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Sorted positions the message must be delivered to.
    pub fn recipients(&self, message: &Message<P::Msg>) -> Result<Vec<u16>> {
        let from = message.from.index;
        match &message.to {
            None => Ok((0..self.parties.len() as u16).filter(|i| *i != from).collect()),
            Some(to) if to.is_empty() => Err(OrchestratorError::Aborted {
                reason: format!("party {from} sent a point-to-point message without recipients"),
            }),
            Some(to) => to
                .iter()
                .map(|dest| {
                    if dest.index == from {
                        Err(OrchestratorError::SelfAddressedMessage { party: from })
                    } else if usize::from(dest.index) >= self.parties.len() {
                        Err(OrchestratorError::UnknownRecipient { from, to: dest.index })
                    } else {
                        Ok(dest.index)
                    }
                })
                .collect(),
        }
    }

    /// Launches one delivery per recipient. Returns how many were launched.
    pub fn route(&self, message: Message<P::Msg>) -> Result<usize> {
        let recipients = self.recipients(&message)?;

        if message.is_broadcast() {
            trace!("Broadcast from {} to {} parties", message.from, recipients.len());
        } else {
            trace!("P2P from {} to {:?}", message.from, recipients);
        }

        for index in &recipients {
            let party = Arc::clone(&self.parties[usize::from(*index)]);
            let errors = self.errors.clone();
            let cancel = self.cancel.clone();
            let message = message.clone();

            tokio::spawn(async move {
                let recipient = party.identity().clone();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Delivery to {} cancelled", recipient);
                    }
                    result = party.update(message) => {
                        if let Err(source) = result {
                            let _ = errors
                                .send(OrchestratorError::Protocol {
                                    party: recipient.moniker.clone(),
                                    source,
                                })
                                .await;
                        }
                    }
                }
            });
        }

        self.dispatched.fetch_add(recipients.len(), Ordering::Relaxed);
        Ok(recipients.len())
    }
}
