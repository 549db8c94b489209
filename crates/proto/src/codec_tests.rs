// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::{Hello, HelloReply};

#[tokio::test]
async fn round_trips_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(1024);

    let hello = Hello {
        version: 1,
        auth_digest: "abc".into(),
    };
    write_msg(&mut client, &hello, DEFAULT_IO_TIMEOUT).await.unwrap();

    let received: Hello = read_msg(&mut server, DEFAULT_IO_TIMEOUT).await.unwrap();
    assert_eq!(received, hello);

    let reply = HelloReply::Ok { version: 1 };
    write_msg(&mut server, &reply, DEFAULT_IO_TIMEOUT).await.unwrap();
    let received: HelloReply = read_msg(&mut client, DEFAULT_IO_TIMEOUT).await.unwrap();
    assert_eq!(received, reply);
}

#[tokio::test]
async fn eof_maps_to_connection_closed() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);

    let err = read_message(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn truncated_payload_is_connection_closed() {
    let (mut client, mut server) = tokio::io::duplex(64);

    // Length prefix promises 100 bytes, then the peer goes away.
    tokio::io::AsyncWriteExt::write_all(&mut client, &100u32.to_be_bytes())
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut client, b"short")
        .await
        .unwrap();
    drop(client);

    let err = read_message(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let huge = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
    tokio::io::AsyncWriteExt::write_all(&mut client, &huge)
        .await
        .unwrap();

    let err = read_message(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
}

#[tokio::test]
async fn read_times_out_on_silence() {
    let (_client, mut server) = tokio::io::duplex(64);
    let err = read_msg::<Hello, _>(&mut server, std::time::Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
}
