//! End-to-end SMTP scenarios: STARTTLS + AUTH LOGIN local delivery, and the
//! anti-relay rejection of an unauthenticated external-to-external attempt.

mod common;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use embermail::auth::StaticAuthProvider;
use embermail::config::{DeliveryConfig, StaticUser};
use embermail::mx::{MxRecord, MxResolver};
use embermail::net::server_tls_acceptor;
use embermail::smtp::client::DeliveryClient;
use embermail::smtp::server::SmtpServer;
use embermail::store::memory::MemoryStore;
use embermail::store::MailboxStore;

struct NoMxResolver;

#[async_trait::async_trait]
impl MxResolver for NoMxResolver {
    async fn resolve_mx(&self, _domain: &str) -> Vec<MxRecord> {
        Vec::new()
    }
}

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

async fn read_multiline<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(stream).await;
        let continuation = line.as_bytes().get(3) == Some(&b'-');
        lines.push(line);
        if !continuation {
            break;
        }
    }
    lines
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, line: &str) {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\r\n").await.unwrap();
    stream.flush().await.unwrap();
}

fn build_server(
    auth: Arc<StaticAuthProvider>,
    store: Arc<MemoryStore>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
) -> Arc<SmtpServer> {
    let delivery = Arc::new(DeliveryClient::new(
        Arc::new(NoMxResolver),
        DeliveryConfig::default(),
    ));
    Arc::new(SmtpServer::new("mail.example.com", auth, store, delivery, tls_acceptor))
}

#[tokio::test]
async fn end_to_end_starttls_auth_login_local_delivery() {
    let cert = common::generate_test_cert();
    let tls_acceptor = server_tls_acceptor(&cert.cert_path, &cert.key_path).await.unwrap();

    let auth = Arc::new(StaticAuthProvider::new([
        StaticUser {
            address: "alice@example.com".to_string(),
            secret: "password123".to_string(),
        },
        StaticUser {
            address: "bob@example.com".to_string(),
            secret: "irrelevant".to_string(),
        },
    ]));
    let store = Arc::new(MemoryStore::new());
    let server = build_server(auth, store.clone(), Some(tls_acceptor));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        server.handle_connection(socket).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(read_line(&mut stream).await.starts_with("220"));

    write_line(&mut stream, "EHLO client.example.com").await;
    let ehlo = read_multiline(&mut stream).await;
    assert!(ehlo.iter().any(|l| l.contains("STARTTLS")));

    write_line(&mut stream, "STARTTLS").await;
    assert!(read_line(&mut stream).await.starts_with("220"));

    let connector = common::test_tls_connector();
    let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string()).unwrap();
    let mut tls = connector.connect(server_name, stream).await.unwrap();

    write_line(&mut tls, "EHLO client.example.com").await;
    read_multiline(&mut tls).await;

    write_line(&mut tls, "AUTH LOGIN").await;
    assert!(read_line(&mut tls).await.starts_with("334"));
    write_line(&mut tls, &BASE64.encode("alice@example.com")).await;
    assert!(read_line(&mut tls).await.starts_with("334"));
    write_line(&mut tls, &BASE64.encode("password123")).await;
    assert!(read_line(&mut tls).await.starts_with("235"));

    write_line(&mut tls, "MAIL FROM:<alice@example.com>").await;
    assert!(read_line(&mut tls).await.starts_with("250"));

    write_line(&mut tls, "RCPT TO:<bob@example.com>").await;
    assert!(read_line(&mut tls).await.starts_with("250"));

    write_line(&mut tls, "DATA").await;
    assert!(read_line(&mut tls).await.starts_with("354"));
    write_line(&mut tls, "Hello Bob").await;
    write_line(&mut tls, ".").await;
    assert!(read_line(&mut tls).await.starts_with("250"));

    write_line(&mut tls, "QUIT").await;
    assert!(read_line(&mut tls).await.starts_with("221"));

    assert_eq!(store.count_uids("bob@example.com").await, 1);
    let msg = store.get_message("bob@example.com", "0").await.unwrap();
    let text = String::from_utf8_lossy(&msg);
    assert!(text.contains("From: alice@example.com"));
    assert!(text.contains("Hello Bob"));
}

#[tokio::test]
async fn unauthenticated_relay_of_external_recipient_is_rejected() {
    let auth = Arc::new(StaticAuthProvider::new([StaticUser {
        address: "alice@example.com".to_string(),
        secret: "password123".to_string(),
    }]));
    let store = Arc::new(MemoryStore::new());
    let server = build_server(auth, store, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        server.handle_connection(socket).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_line(&mut stream).await;
    write_line(&mut stream, "EHLO client.example.com").await;
    read_multiline(&mut stream).await;

    // Unauthenticated, external sender: MAIL FROM is accepted (not a local
    // account), but relaying to an external recipient requires auth.
    write_line(&mut stream, "MAIL FROM:<stranger@external.com>").await;
    assert!(read_line(&mut stream).await.starts_with("250"));

    write_line(&mut stream, "RCPT TO:<nobody@external.com>").await;
    assert!(read_line(&mut stream).await.starts_with("530"));
}

#[tokio::test]
async fn relay_of_local_senders_own_account_to_external_recipient_is_permitted_once_authenticated() {
    let cert = common::generate_test_cert();
    let tls_acceptor = server_tls_acceptor(&cert.cert_path, &cert.key_path).await.unwrap();

    let auth = Arc::new(StaticAuthProvider::new([StaticUser {
        address: "alice@example.com".to_string(),
        secret: "password123".to_string(),
    }]));
    let store = Arc::new(MemoryStore::new());
    let server = build_server(auth, store, Some(tls_acceptor));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        server.handle_connection(socket).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    read_line(&mut stream).await;
    write_line(&mut stream, "EHLO client.example.com").await;
    read_multiline(&mut stream).await;
    write_line(&mut stream, "STARTTLS").await;
    read_line(&mut stream).await;

    let connector = common::test_tls_connector();
    let server_name = rustls::pki_types::ServerName::try_from("localhost".to_string()).unwrap();
    let mut tls = connector.connect(server_name, stream).await.unwrap();
    write_line(&mut tls, "EHLO client.example.com").await;
    read_multiline(&mut tls).await;

    write_line(&mut tls, "AUTH LOGIN").await;
    read_line(&mut tls).await;
    write_line(&mut tls, &BASE64.encode("alice@example.com")).await;
    read_line(&mut tls).await;
    write_line(&mut tls, &BASE64.encode("password123")).await;
    assert!(read_line(&mut tls).await.starts_with("235"));

    write_line(&mut tls, "MAIL FROM:<alice@example.com>").await;
    assert!(read_line(&mut tls).await.starts_with("250"));

    // External recipient from an authenticated local sender: RCPT TO still
    // replies 550 (unknown local mailbox), but the relay attempt itself
    // happens asynchronously once DATA completes.
    write_line(&mut tls, "RCPT TO:<somebody@external.example>").await;
    assert!(read_line(&mut tls).await.starts_with("550"));

    write_line(&mut tls, "DATA").await;
    assert!(read_line(&mut tls).await.starts_with("354"));
    write_line(&mut tls, "Hello External").await;
    write_line(&mut tls, ".").await;
    assert!(read_line(&mut tls).await.starts_with("250"));
}
