//! End-to-end transfers over a real loopback TCP connection.

use std::net::TcpListener;
use std::thread;

use parcel_core::{
    Backoff, BackoffKind, Connection, DirectorySink, FileReception, PackageType, ProtocolConfig,
    ReceivedFile, TcpTransport,
};
use rand::RngCore;

fn config() -> ProtocolConfig {
    ProtocolConfig {
        poll_timeout_ms: 20,
        max_read_attempts: 200,
        max_write_attempts: 5,
        backoff: Backoff {
            kind: BackoffKind::Constant,
            base_ms: 5,
            max_ms: 5,
        },
        ..ProtocolConfig::default()
    }
}

fn listener() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[test]
fn file_round_trip_over_tcp() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let mut content = vec![0u8; 2500];
    rand::thread_rng().fill_bytes(&mut content);
    let path = src.path().join("report.txt");
    std::fs::write(&path, &content).unwrap();

    let (listener, addr) = listener();
    let out_dir = dst.path().to_path_buf();
    let receiver = thread::spawn(move || -> ReceivedFile {
        let (stream, _) = listener.accept().unwrap();
        let mut conn = Connection::new(TcpTransport::from_stream(stream).unwrap(), config());
        let mut reception = FileReception::new(DirectorySink::new(out_dir));
        let file = conn.receive_file(&mut reception).unwrap();
        conn.close().unwrap();
        file
    });

    let mut sender = Connection::new(TcpTransport::connect(addr).unwrap(), config());
    sender.send_local_file(&path).unwrap();
    sender.close().unwrap();

    let file = receiver.join().unwrap();
    assert_eq!(file.name, "report.txt");
    assert_eq!(file.size, 2500);
    assert_eq!(std::fs::read(&file.location).unwrap(), content);
}

#[test]
fn connection_check_over_tcp() {
    let (listener, addr) = listener();
    let peer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut conn = Connection::new(TcpTransport::from_stream(stream).unwrap(), config());
        let probe = conn.receive_and_confirm().unwrap().unwrap();
        assert_eq!(probe.package_type(), PackageType::CheckConnection);
    });

    let mut conn = Connection::new(TcpTransport::connect(addr).unwrap(), config());
    conn.check_connection().unwrap();
    peer.join().unwrap();
}

#[test]
fn closed_peer_is_reported_as_disconnect() {
    let (listener, addr) = listener();
    let mut conn = Connection::new(TcpTransport::connect(addr).unwrap(), config());
    let (accepted, _) = listener.accept().unwrap();
    drop(accepted);

    let err = conn.check_connection().unwrap_err();
    assert!(err.is_disconnect(), "{err}");
}
