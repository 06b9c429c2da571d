use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use steamcm::{
    CmConnection,
    ConnectOptions,
    SessionKey,
    TransportEvent,
};

async fn next_event(conn: &mut CmConnection) -> TransportEvent {
    timeout(Duration::from_secs(10), conn.recv())
        .await
        .expect("client timed out waiting for an event")
        .expect("connection finished early")
}

#[tokio::test]
async fn test_framed_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(&header[4..8], b"VT01");
        let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();

        // echo one byte at a time; the client parser has to reassemble
        let mut framed = header.to_vec();
        framed.extend_from_slice(&payload);
        for byte in framed {
            stream.write_all(&[byte]).await.unwrap();
            stream.flush().await.unwrap();
        }

        payload
    });

    let opts = ConnectOptions::new("127.0.0.1", port);
    let mut conn = CmConnection::new(opts);
    conn.connect(false).await.unwrap();

    let event = next_event(&mut conn).await;
    assert!(matches!(event, TransportEvent::Connected(None)));
    assert!(conn.remote_address().is_some());

    conn.send(b"ping over tcp").await.unwrap();
    let event = next_event(&mut conn).await;
    assert!(matches!(&event, TransportEvent::Packet(payload) if payload == b"ping over tcp"));

    let echoed = timeout(Duration::from_secs(10), server_task).await.unwrap().unwrap();
    assert_eq!(echoed, b"ping over tcp");

    // the server closed its end, the client winds down cleanly
    let mut saw_close = false;
    loop {
        match timeout(Duration::from_secs(10), conn.recv()).await.unwrap() {
            Some(TransportEvent::Close) => saw_close = true,
            Some(TransportEvent::End) => break,
            Some(_) => {},
            None => panic!("connection finished without the end event"),
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn test_session_key_on_the_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();

        // ciphertext on the wire, never the plaintext
        assert_eq!(payload.len(), 32);
        assert_ne!(payload.as_slice(), b"secret message");

        let mut framed = header.to_vec();
        framed.extend_from_slice(&payload);
        stream.write_all(&framed).await.unwrap();
        stream.flush().await.unwrap();

        payload
    });

    let opts = ConnectOptions::new("127.0.0.1", port);
    let mut conn = CmConnection::new(opts);
    conn.set_use_hmac(true);
    conn.connect(false).await.unwrap();

    let event = next_event(&mut conn).await;
    assert!(matches!(event, TransportEvent::Connected(None)));

    let key: Vec<u8> = (0u8..32).collect();
    conn.set_session_key(&key).unwrap();
    assert!(conn.connected());

    conn.send(b"secret message").await.unwrap();
    let event = next_event(&mut conn).await;
    assert!(matches!(&event, TransportEvent::Packet(payload) if payload == b"secret message"));

    let wire_payload = timeout(Duration::from_secs(10), server_task).await.unwrap().unwrap();
    let cipher = SessionKey::new(&key).unwrap().with_hmac_iv(true);
    assert_eq!(cipher.decrypt(&wire_payload).unwrap(), b"secret message");
}

#[tokio::test]
async fn test_bad_magic_kills_the_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[0x00, 0x00, 0x00, 0x00]).await.unwrap();
        stream.write_all(b"XX01").await.unwrap();
        stream.flush().await.unwrap();

        // hold the socket open, the client must bail on its own
        let mut buf = [0u8; 64];
        _ = stream.read(&mut buf).await;
    });

    let opts = ConnectOptions::new("127.0.0.1", port);
    let mut conn = CmConnection::new(opts);
    conn.connect(false).await.unwrap();

    let event = next_event(&mut conn).await;
    assert!(matches!(event, TransportEvent::Connected(None)));

    let event = next_event(&mut conn).await;
    assert!(matches!(&event, TransportEvent::Error(e) if e.to_string() == "Bad magic"));

    let event = next_event(&mut conn).await;
    assert!(matches!(event, TransportEvent::Close));
    let event = next_event(&mut conn).await;
    assert!(matches!(event, TransportEvent::End));

    server_task.abort();
}
