//! End-to-end IMAP scenarios: login gated on STARTTLS on the cleartext
//! listener, and a full LOGIN/SELECT/UID SEARCH/UID FETCH cycle over the
//! implicit-TLS (IMAPS) listener.

mod common;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use embermail::auth::StaticAuthProvider;
use embermail::config::StaticUser;
use embermail::imap::ImapServer;
use embermail::net::server_tls_acceptor;
use embermail::store::memory::MemoryStore;
use embermail::store::MailboxStore;

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut buf = Vec::new();
    let mut b = [0u8; 1];
    loop {
        stream.read_exact(&mut b).await.unwrap();
        if b[0] == b'\n' {
            break;
        }
        buf.push(b[0]);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, line: &str) {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\r\n").await.unwrap();
    stream.flush().await.unwrap();
}

/// Parse the trailing `{123}` IMAP literal-length marker off a FETCH line.
fn literal_len(line: &str) -> usize {
    let start = line.rfind('{').unwrap() + 1;
    let end = line.rfind('}').unwrap();
    line[start..end].parse().unwrap()
}

fn auth_and_store() -> (Arc<StaticAuthProvider>, Arc<MemoryStore>) {
    let auth = Arc::new(StaticAuthProvider::new([StaticUser {
        address: "alice@example.com".to_string(),
        secret: "password123".to_string(),
    }]));
    (auth, Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn login_is_rejected_before_starttls_on_the_cleartext_listener() {
    let (auth, store) = auth_and_store();
    let cert = common::generate_test_cert();
    let tls_acceptor = server_tls_acceptor(&cert.cert_path, &cert.key_path).await.unwrap();
    let server = Arc::new(ImapServer::new("mail.example.com", auth, store, Some(tls_acceptor)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        server.handle_starttls_connection(socket).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(read_line(&mut stream).await.starts_with("* OK"));

    write_line(&mut stream, "a1 LOGIN alice@example.com password123").await;
    let reply = read_line(&mut stream).await;
    assert!(reply.starts_with("a1 NO"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn login_succeeds_after_starttls_on_the_cleartext_listener() {
    let (auth, store) = auth_and_store();
    let cert = common::generate_test_cert();
    let tls_acceptor = server_tls_acceptor(&cert.cert_path, &cert.key_path).await.unwrap();
    let server = Arc::new(ImapServer::new("mail.example.com", auth, store, Some(tls_acceptor)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        server.handle_starttls_connection(socket).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_line(&mut stream).await;

    write_line(&mut stream, "a1 STARTTLS").await;
    assert!(read_line(&mut stream).await.starts_with("a1 OK"));

    let connector = common::test_tls_connector();
    let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string()).unwrap();
    let mut tls = connector.connect(server_name, stream).await.unwrap();

    write_line(&mut tls, "a2 LOGIN alice@example.com password123").await;
    assert!(read_line(&mut tls).await.starts_with("a2 OK"));

    write_line(&mut tls, "a3 STARTTLS").await;
    assert!(read_line(&mut tls).await.starts_with("a3 BAD"));
}

#[tokio::test]
async fn implicit_tls_listener_supports_login_select_search_and_fetch() {
    let (auth, store) = auth_and_store();
    store
        .store(auth.as_ref(), "bob@example.com", &["alice@example.com".to_string()], b"Hi Alice, first")
        .await
        .unwrap();
    store
        .store(auth.as_ref(), "bob@example.com", &["alice@example.com".to_string()], b"Hi Alice, second")
        .await
        .unwrap();

    let cert = common::generate_test_cert();
    let tls_acceptor = server_tls_acceptor(&cert.cert_path, &cert.key_path).await.unwrap();
    let server = Arc::new(ImapServer::new("mail.example.com", auth, store, Some(tls_acceptor.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let tls = tls_acceptor.accept(socket).await.unwrap();
        server.handle_implicit_tls_connection(tls).await;
    });

    let tcp = TcpStream::connect(addr).await.unwrap();
    let connector = common::test_tls_connector();
    let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string()).unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();

    assert!(read_line(&mut tls).await.starts_with("* OK"));

    write_line(&mut tls, "a1 CAPABILITY").await;
    let cap_line = read_line(&mut tls).await;
    assert!(cap_line.contains("STARTTLS"));
    assert!(read_line(&mut tls).await.starts_with("a1 OK"));

    // Pre-login commands requiring auth are rejected.
    write_line(&mut tls, "a2 SELECT INBOX").await;
    assert!(read_line(&mut tls).await.starts_with("a2 NO"));

    write_line(&mut tls, "a3 LOGIN alice@example.com password123").await;
    assert!(read_line(&mut tls).await.starts_with("a3 OK"));

    write_line(&mut tls, "a4 SELECT INBOX").await;
    let exists = read_line(&mut tls).await;
    assert_eq!(exists, "* 2 EXISTS");
    read_line(&mut tls).await; // FLAGS
    assert!(read_line(&mut tls).await.starts_with("a4 OK"));

    write_line(&mut tls, "a5 UID SEARCH ALL").await;
    assert_eq!(read_line(&mut tls).await, "* SEARCH 1 2");
    assert!(read_line(&mut tls).await.starts_with("a5 OK"));

    write_line(&mut tls, "a6 UID FETCH 1:2 (RFC822)").await;
    let fetch1 = read_line(&mut tls).await;
    assert!(fetch1.starts_with("* 1 FETCH (UID 1 RFC822 {"));
    let mut body = vec![0u8; literal_len(&fetch1)];
    tls.read_exact(&mut body).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("Hi Alice, first"));
    read_line(&mut tls).await; // closing ")"

    let fetch2 = read_line(&mut tls).await;
    assert!(fetch2.starts_with("* 2 FETCH (UID 2 RFC822 {"));
    let mut body2 = vec![0u8; literal_len(&fetch2)];
    tls.read_exact(&mut body2).await.unwrap();
    assert!(String::from_utf8_lossy(&body2).contains("Hi Alice, second"));
    read_line(&mut tls).await; // closing ")"

    assert!(read_line(&mut tls).await.starts_with("a6 OK"));

    write_line(&mut tls, "a7 LOGOUT").await;
    assert!(read_line(&mut tls).await.starts_with("* BYE"));
    assert!(read_line(&mut tls).await.starts_with("a7 OK"));
}
