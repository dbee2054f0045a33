//! Client-side connection setup state machine.
//!
//! Pure action-based sequencing of the setup exchange: encode a connection
//! request, interpret the confirm, exchange settings and capabilities, and
//! hand session payloads upward once active. No I/O happens here; the
//! driver executes the returned actions and feeds decoded frame payloads
//! back in. Time is passed as a parameter, never read from a clock.
//!
//! ```text
//! Idle ──start──> AwaitingConfirm ──confirm──> CapabilityExchange ──caps──> Active
//!                     │        │
//!          failure, lower mode │ failure, nothing left / decode error
//!          (RetryDowngraded)   ▼
//!                            Closed
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use farsight_proto::caps::{self, CatalogRole};
use farsight_proto::{
    gcc, tpkt, ConnectionConfirm, ConnectionRequest, ConstantTable, ProtoError,
    SecurityProtocols, SelectedProtocol, SessionOptions,
};
use farsight_wire::VariantBody;

use crate::error::{ConnectionError, Result};

/// Actions returned by the state machine for the driver to execute.
#[derive(Debug, Clone)]
pub enum ClientAction {
    /// Send these fully framed bytes over the transport.
    SendPacket(Bytes),
    /// Upgrade the transport to the selected security protocol before any
    /// further packets flow.
    UpgradeSecurity(SelectedProtocol),
    /// Tear down this attempt and reconnect offering the given protocols.
    RetryDowngraded {
        /// Reduced protocol set to offer on the next attempt
        protocols: SecurityProtocols,
    },
    /// Hand this session payload to the layer above.
    Deliver(Bytes),
    /// Close the connection.
    Close {
        /// Human-readable close reason
        reason: String,
    },
}

/// Connection setup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Nothing sent yet.
    Idle,
    /// Connection request sent, waiting for the confirm.
    AwaitingConfirm,
    /// Negotiation done, waiting for the server's capability set.
    CapabilityExchange,
    /// Setup complete; payloads flow upward.
    Active,
    /// Terminated, by error or on purpose.
    Closed,
}

/// Negotiated connection-wide state, written once when setup completes.
#[derive(Debug, Clone)]
pub struct NegotiatedState {
    /// Security protocol the server selected.
    pub selected: SelectedProtocol,
    /// Capability sets the server demanded, by tag.
    pub capabilities: Vec<(u64, VariantBody)>,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Session options advertised during setup.
    pub options: SessionOptions,
    /// Protocol constant table used to build catalogs.
    pub constants: ConstantTable,
    /// Deadline for the negotiation round-trip.
    pub negotiation_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            options: SessionOptions::default(),
            constants: ConstantTable::builtin(),
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}

/// Next-lower protocol set to offer after a negotiation failure, or `None`
/// once even bare standard security was refused.
fn downgraded(offered: SecurityProtocols) -> Option<SecurityProtocols> {
    for bit in [
        SecurityProtocols::HYBRID_EX,
        SecurityProtocols::HYBRID,
        SecurityProtocols::SSL,
    ] {
        if offered.contains(bit) {
            return Some(offered - bit);
        }
    }
    None
}

/// Client connection setup state machine.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    state: ClientState,
    config: ConnectionConfig,
    offered: SecurityProtocols,
    selected: Option<SelectedProtocol>,
    request_sent_at: Option<Instant>,
    negotiated: Option<NegotiatedState>,
}

impl ClientConnection {
    /// Fresh machine in `Idle`, offering the configured protocols.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        let offered = config.options.security;
        Self {
            state: ClientState::Idle,
            config,
            offered,
            selected: None,
            request_sent_at: None,
            negotiated: None,
        }
    }

    /// Override the offered protocol set, used when retrying a downgraded
    /// attempt.
    #[must_use]
    pub fn with_offer(mut self, protocols: SecurityProtocols) -> Self {
        self.offered = protocols;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Protocols currently on offer.
    #[must_use]
    pub fn offered(&self) -> SecurityProtocols {
        self.offered
    }

    /// Negotiated state, present once setup has completed.
    #[must_use]
    pub fn negotiated(&self) -> Option<&NegotiatedState> {
        self.negotiated.as_ref()
    }

    /// Begin setup: emit the framed connection request.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidState`] unless the machine is `Idle`, and
    /// any encode error.
    pub fn start(&mut self, now: Instant) -> Result<Vec<ClientAction>> {
        if self.state != ClientState::Idle {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "start",
            });
        }
        let mut request = ConnectionRequest::new(self.offered);
        if let Some(user) = self.config.options.cookie_user() {
            request = request.with_cookie(user);
        }
        let frame = tpkt::frame(request.encode()?)?;
        self.state = ClientState::AwaitingConfirm;
        self.request_sent_at = Some(now);
        tracing::debug!(offered = ?self.offered, "connection request sent");
        Ok(vec![ClientAction::SendPacket(frame)])
    }

    /// Feed one deframed payload into the machine.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Negotiation`] once no lower security mode is left
    /// to offer, [`ConnectionError::InvalidState`] outside the receiving
    /// states, and any decode error. All errors leave the machine `Closed`.
    pub fn handle_payload(&mut self, payload: Bytes, now: Instant) -> Result<Vec<ClientAction>> {
        match self.state {
            ClientState::AwaitingConfirm => self.handle_confirm(&payload),
            ClientState::CapabilityExchange => self.handle_capabilities(&payload, now),
            ClientState::Active => Ok(vec![ClientAction::Deliver(payload)]),
            state @ (ClientState::Idle | ClientState::Closed) => {
                Err(ConnectionError::InvalidState { state, operation: "handle_payload" })
            },
        }
    }

    fn handle_confirm(&mut self, payload: &[u8]) -> Result<Vec<ClientAction>> {
        match ConnectionConfirm::decode(payload) {
            Ok(confirm) => {
                tracing::info!(selected = %confirm.selected, "negotiation complete");
                self.selected = Some(confirm.selected);
                self.state = ClientState::CapabilityExchange;
                let mut actions = Vec::new();
                if confirm.selected != SelectedProtocol::Rdp {
                    actions.push(ClientAction::UpgradeSecurity(confirm.selected));
                }
                let settings =
                    gcc::client_settings(&self.config.options, &self.config.constants)?;
                let advertised =
                    caps::client_advertised(&self.config.options, &self.config.constants)?;
                actions.push(ClientAction::SendPacket(tpkt::frame(settings)?));
                actions.push(ClientAction::SendPacket(tpkt::frame(advertised)?));
                Ok(actions)
            },
            Err(ProtoError::NegotiationFailure { code }) => {
                self.state = ClientState::Closed;
                match downgraded(self.offered) {
                    Some(protocols) => {
                        tracing::warn!(%code, ?protocols, "negotiation refused, downgrading");
                        Ok(vec![ClientAction::RetryDowngraded { protocols }])
                    },
                    None => Err(ConnectionError::Negotiation { code }),
                }
            },
            Err(err) => {
                self.state = ClientState::Closed;
                Err(err.into())
            },
        }
    }

    fn handle_capabilities(&mut self, payload: &[u8], _now: Instant) -> Result<Vec<ClientAction>> {
        let registry =
            caps::capability_registry(&self.config.constants, CatalogRole::Server)?;
        let capabilities = match caps::decode_capabilities(&registry, payload) {
            Ok(sets) => sets,
            Err(err) => {
                self.state = ClientState::Closed;
                return Err(err.into());
            },
        };
        let selected = self.selected.unwrap_or(SelectedProtocol::Rdp);
        tracing::info!(sets = capabilities.len(), "capability exchange complete");
        self.negotiated = Some(NegotiatedState { selected, capabilities });
        self.state = ClientState::Active;
        Ok(Vec::new())
    }

    /// Elapsed wait beyond the negotiation deadline, if expired.
    #[must_use]
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        if self.state != ClientState::AwaitingConfirm {
            return None;
        }
        let sent_at = self.request_sent_at?;
        let elapsed = now.duration_since(sent_at);
        (elapsed > self.config.negotiation_timeout).then_some(elapsed)
    }

    /// Periodic timeout check.
    pub fn tick(&mut self, now: Instant) -> Vec<ClientAction> {
        if let Some(elapsed) = self.check_timeout(now) {
            self.state = ClientState::Closed;
            return vec![ClientAction::Close {
                reason: format!("negotiation timed out after {elapsed:?}"),
            }];
        }
        Vec::new()
    }

    /// Transition to `Closed`.
    pub fn close(&mut self) {
        self.state = ClientState::Closed;
    }
}
