//! Client driver integration tests.
//!
//! Runs the full setup exchange against scripted servers over in-memory
//! duplex pipes: negotiation, downgrade retry across reconnects, the
//! capability exchange, and deadline handling.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use farsight_core::{
    Client, Connect, ConnectionConfig, ConnectionError, StreamTransport, Transport,
};
use farsight_proto::envelope;
use farsight_proto::{
    caps, constants, tpkt, ConnectionConfirm, ConnectionRequest, FailureCode, FrameAssembler,
    SecurityProtocols, SelectedProtocol, SessionOptions,
};
use tokio::io::DuplexStream;

/// Hands out pre-built streams, one per connection attempt.
struct ScriptedConnect {
    streams: VecDeque<DuplexStream>,
}

impl ScriptedConnect {
    fn new(streams: impl IntoIterator<Item = DuplexStream>) -> Self {
        Self { streams: streams.into_iter().collect() }
    }
}

#[async_trait]
impl Connect for ScriptedConnect {
    type Transport = StreamTransport<DuplexStream>;

    async fn connect(&mut self) -> io::Result<Self::Transport> {
        self.streams
            .pop_front()
            .map(StreamTransport::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "script exhausted"))
    }
}

/// Read one deframed payload from the server side.
async fn next_frame(
    transport: &mut StreamTransport<DuplexStream>,
    assembler: &mut FrameAssembler,
) -> Bytes {
    loop {
        if let Some(payload) = assembler.next_payload().unwrap() {
            return payload;
        }
        let chunk = transport.receive().await.unwrap().expect("peer hung up");
        assembler.push(&chunk);
    }
}

fn server_capability_demand() -> Bytes {
    envelope::seal_stream([
        (constants::caps::SHARE, caps::share()),
        (constants::caps::POINTER, caps::pointer(true)),
        (constants::caps::INPUT, caps::input(&SessionOptions::default())),
    ])
    .unwrap()
}

#[tokio::test]
async fn establishes_against_a_scripted_server() {
    let (near, far) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far);
        let mut assembler = FrameAssembler::new();

        let payload = next_frame(&mut transport, &mut assembler).await;
        let request = ConnectionRequest::decode(&payload).unwrap();
        assert!(request.protocols.contains(SecurityProtocols::SSL));

        let confirm = ConnectionConfirm { selected: SelectedProtocol::Ssl, flags: 0 };
        transport.send(tpkt::frame(confirm.encode().unwrap()).unwrap()).await.unwrap();

        let settings = next_frame(&mut transport, &mut assembler).await;
        assert!(!settings.is_empty());
        let advertised = next_frame(&mut transport, &mut assembler).await;
        assert!(!advertised.is_empty());

        transport.send(tpkt::frame(server_capability_demand()).unwrap()).await.unwrap();
        transport.send(tpkt::frame(Bytes::from_static(b"post-setup")).unwrap()).await.unwrap();

        // Hold the stream open until the client has drained it.
        let payload = next_frame(&mut transport, &mut assembler).await;
        assert_eq!(&payload[..], b"done");
    });

    let client = Client::new(ScriptedConnect::new([near]), ConnectionConfig::default());
    let mut established = client.establish().await.unwrap();

    assert_eq!(established.negotiated().selected, SelectedProtocol::Ssl);
    assert_eq!(established.negotiated().capabilities.len(), 3);

    let payload = established.next_payload().await.unwrap().unwrap();
    assert_eq!(&payload[..], b"post-setup");

    established.send(Bytes::from_static(b"done")).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn downgrades_and_reconnects_after_a_refusal() {
    let (near_first, far_first) = tokio::io::duplex(4096);
    let (near_second, far_second) = tokio::io::duplex(4096);

    let refusing = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far_first);
        let mut assembler = FrameAssembler::new();
        let payload = next_frame(&mut transport, &mut assembler).await;
        let request = ConnectionRequest::decode(&payload).unwrap();
        assert!(request.protocols.contains(SecurityProtocols::HYBRID));

        let failure = ConnectionConfirm::encode_failure(FailureCode::SslRequired).unwrap();
        transport.send(tpkt::frame(failure).unwrap()).await.unwrap();
    });

    let accepting = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far_second);
        let mut assembler = FrameAssembler::new();
        let payload = next_frame(&mut transport, &mut assembler).await;
        let request = ConnectionRequest::decode(&payload).unwrap();
        // The retry offers the reduced set.
        assert_eq!(request.protocols, SecurityProtocols::SSL);

        let confirm = ConnectionConfirm { selected: SelectedProtocol::Ssl, flags: 0 };
        transport.send(tpkt::frame(confirm.encode().unwrap()).unwrap()).await.unwrap();

        next_frame(&mut transport, &mut assembler).await;
        next_frame(&mut transport, &mut assembler).await;
        transport.send(tpkt::frame(server_capability_demand()).unwrap()).await.unwrap();
    });

    let client = Client::new(
        ScriptedConnect::new([near_first, near_second]),
        ConnectionConfig::default(),
    );
    let established = client.establish().await.unwrap();
    assert_eq!(established.negotiated().selected, SelectedProtocol::Ssl);

    refusing.await.unwrap();
    accepting.await.unwrap();
}

#[tokio::test]
async fn refusal_with_no_lower_offer_is_fatal() {
    let (near, far) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far);
        let mut assembler = FrameAssembler::new();
        next_frame(&mut transport, &mut assembler).await;
        let failure = ConnectionConfirm::encode_failure(FailureCode::SslNotAllowed).unwrap();
        transport.send(tpkt::frame(failure).unwrap()).await.unwrap();
    });

    let config = ConnectionConfig {
        options: SessionOptions {
            security: SecurityProtocols::empty(),
            ..SessionOptions::default()
        },
        ..ConnectionConfig::default()
    };
    let client = Client::new(ScriptedConnect::new([near]), config);
    let err = client.establish().await.unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Negotiation { code: FailureCode::SslNotAllowed }
    ));
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out() {
    let (near, far) = tokio::io::duplex(4096);

    // Hold the far end open without ever answering.
    let server = tokio::spawn(async move {
        let _keep_open = far;
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });

    let config = ConnectionConfig {
        negotiation_timeout: Duration::from_secs(30),
        ..ConnectionConfig::default()
    };
    let client = Client::new(ScriptedConnect::new([near]), config);
    let err = client.establish().await.unwrap_err();

    assert!(matches!(err, ConnectionError::HandshakeTimeout { elapsed } if elapsed >= Duration::from_secs(30)));
    assert!(err.is_transient());
    server.abort();
}

#[tokio::test]
async fn peer_hangup_during_setup_is_reported() {
    let (near, far) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far);
        let mut assembler = FrameAssembler::new();
        next_frame(&mut transport, &mut assembler).await;
        // Drop without answering.
    });

    let client = Client::new(ScriptedConnect::new([near]), ConnectionConfig::default());
    let err = client.establish().await.unwrap_err();
    assert!(matches!(err, ConnectionError::TransportClosed));
    server.await.unwrap();
}
