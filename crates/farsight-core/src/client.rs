//! Async client driver.
//!
//! Owns the transport, feeds received bytes through the frame reassembler
//! into the [`ClientConnection`] machine, and executes the actions it
//! returns. One connection attempt per offered protocol set; a refused
//! negotiation reconnects with the next-lower offer.

use std::time::Instant;

use bytes::Bytes;
use farsight_proto::{tpkt, FrameAssembler, SecurityProtocols};

use crate::connection::{
    ClientAction, ClientConnection, ClientState, ConnectionConfig, NegotiatedState,
};
use crate::error::{ConnectionError, Result};
use crate::transport::{Connect, Transport};

/// Outcome of a single connection attempt.
enum Attempt<T> {
    Established(Established<T>),
    Downgrade(SecurityProtocols),
}

/// Setup driver. Consumes itself on [`Client::establish`].
#[derive(Debug)]
pub struct Client<C> {
    connector: C,
    config: ConnectionConfig,
}

impl<C: Connect> Client<C> {
    /// New driver over a transport factory.
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self { connector, config }
    }

    /// Run the setup exchange to completion.
    ///
    /// Reconnects with a reduced security offer after each refused
    /// negotiation, down to standard security, then gives up.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::HandshakeTimeout`] when the negotiation deadline
    /// passes, [`ConnectionError::Negotiation`] once every offer has been
    /// refused, [`ConnectionError::TransportClosed`] on peer hangup, and
    /// any transport or protocol error.
    pub async fn establish(mut self) -> Result<Established<C::Transport>> {
        let mut offer = self.config.options.security;
        loop {
            match self.attempt(offer).await? {
                Attempt::Established(established) => return Ok(established),
                Attempt::Downgrade(protocols) => {
                    offer = protocols;
                },
            }
        }
    }

    async fn attempt(&mut self, offer: SecurityProtocols) -> Result<Attempt<C::Transport>> {
        let mut transport = self
            .connector
            .connect()
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))?;
        let mut assembler = FrameAssembler::new();
        let mut machine = ClientConnection::new(self.config.clone()).with_offer(offer);

        // Tokio's clock honors paused test time; the machine only compares
        // the instants it is handed.
        let attempt_start = tokio::time::Instant::now();
        let deadline = attempt_start + self.config.negotiation_timeout;
        for action in machine.start(Instant::now())? {
            execute(&mut transport, action).await?;
        }

        loop {
            let received =
                tokio::time::timeout_at(deadline, transport.receive()).await;
            let chunk = match received {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => return Err(ConnectionError::TransportClosed),
                Ok(Err(err)) => return Err(ConnectionError::Transport(err.to_string())),
                Err(_) => {
                    machine.close();
                    return Err(ConnectionError::HandshakeTimeout {
                        elapsed: attempt_start.elapsed(),
                    });
                },
            };

            assembler.push(&chunk);
            while let Some(payload) = assembler.next_payload()? {
                let now = Instant::now();
                for action in machine.handle_payload(payload, now)? {
                    match action {
                        ClientAction::RetryDowngraded { protocols } => {
                            return Ok(Attempt::Downgrade(protocols));
                        },
                        other => execute(&mut transport, other).await?,
                    }
                }
            }

            if machine.state() == ClientState::Active {
                let Some(negotiated) = machine.negotiated().cloned() else {
                    return Err(ConnectionError::InvalidState {
                        state: machine.state(),
                        operation: "establish",
                    });
                };
                return Ok(Attempt::Established(Established {
                    transport,
                    assembler,
                    negotiated,
                }));
            }
        }
    }
}

async fn execute<T: Transport>(transport: &mut T, action: ClientAction) -> Result<()> {
    match action {
        ClientAction::SendPacket(frame) => transport
            .send(frame)
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string())),
        ClientAction::UpgradeSecurity(selected) => {
            // The stream wrap (TLS or CredSSP) happens outside this crate;
            // the driver only records that it is due.
            tracing::info!(%selected, "security upgrade selected");
            Ok(())
        },
        ClientAction::Deliver(_) => Ok(()),
        ClientAction::Close { reason } => {
            tracing::warn!(%reason, "closing connection");
            Ok(())
        },
        ClientAction::RetryDowngraded { .. } => Ok(()),
    }
}

/// An established connection, setup complete.
#[derive(Debug)]
pub struct Established<T> {
    transport: T,
    assembler: FrameAssembler,
    negotiated: NegotiatedState,
}

impl<T: Transport> Established<T> {
    /// Negotiated protocol and server capability sets.
    #[must_use]
    pub fn negotiated(&self) -> &NegotiatedState {
        &self.negotiated
    }

    /// Frame and send a session payload.
    ///
    /// # Errors
    ///
    /// Oversized payloads and transport failures.
    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        let frame = tpkt::frame(payload)?;
        self.transport
            .send(frame)
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))
    }

    /// Receive the next session payload, deframed.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    ///
    /// # Errors
    ///
    /// Malformed framing and transport failures.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(payload) = self.assembler.next_payload()? {
                return Ok(Some(payload));
            }
            let chunk = self
                .transport
                .receive()
                .await
                .map_err(|err| ConnectionError::Transport(err.to_string()))?;
            match chunk {
                Some(chunk) => self.assembler.push(&chunk),
                None => return Ok(None),
            }
        }
    }

    /// Unwrap the transport, abandoning any buffered bytes.
    pub fn into_transport(self) -> T {
        self.transport
    }
}
