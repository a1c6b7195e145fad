//! Transport parity: the same message sequence must come through
//! byte-identical regardless of the wire variant.

use hydra_transport::{build_transport, Transport, TransportKind};

/// Drive one fixed sequence through a variant: the client writes every
/// message, the server echoes each back, and the client's received
/// sequence is returned.
async fn echo_sequence(kind: TransportKind, messages: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let transport = build_transport(kind);
    let listener = transport.listen("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let expected = messages.len();
    let echo = tokio::spawn(async move {
        let server = listener.accept().await.unwrap();
        for _ in 0..expected {
            let msg = server.read().await.unwrap();
            server.write(&msg).await.unwrap();
        }
        server.close().await;
        listener.close().await;
    });

    let client = transport.dial(&addr).await.unwrap();
    for msg in messages {
        client.write(msg).await.unwrap();
    }

    let mut received = Vec::with_capacity(messages.len());
    for _ in 0..messages.len() {
        received.push(client.read().await.unwrap());
    }

    echo.await.unwrap();
    client.close().await;

    received
}

fn fixed_sequence() -> Vec<Vec<u8>> {
    let mut seq = vec![
        b"handshake-init".to_vec(),
        vec![0u8; 1],
        vec![0xFF; 1400],
        (0..=255u8).collect(),
    ];
    // A deterministic pseudo-random payload, identical across variants
    let mut state = 0x2545F491u32;
    seq.push(
        (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect(),
    );
    seq
}

#[tokio::test]
async fn test_websocket_parity() {
    let seq = fixed_sequence();
    assert_eq!(echo_sequence(TransportKind::WebSocket, &seq).await, seq);
}

#[tokio::test]
async fn test_quic_parity() {
    let seq = fixed_sequence();
    assert_eq!(echo_sequence(TransportKind::Quic, &seq).await, seq);
}

#[tokio::test]
async fn test_obfuscated_parity() {
    let seq = fixed_sequence();
    assert_eq!(echo_sequence(TransportKind::Obfuscated, &seq).await, seq);
}

#[tokio::test]
async fn test_all_variants_agree() {
    let seq = fixed_sequence();

    let ws = echo_sequence(TransportKind::WebSocket, &seq).await;
    let quic = echo_sequence(TransportKind::Quic, &seq).await;
    let obfs = echo_sequence(TransportKind::Obfuscated, &seq).await;

    assert_eq!(ws, quic);
    assert_eq!(quic, obfs);
}
