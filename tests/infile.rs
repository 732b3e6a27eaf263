//! LOCAL INFILE streaming: the server-initiated file transfer inside the
//! query response path.

mod common;

use std::io::Write;

use common::*;
use pretty_assertions::assert_eq;
use strand_mysql::error::cr;
use strand_mysql::{Connection, Error, Opts, State};

fn opts_for(port: u16) -> Opts {
    let mut opts = Opts::default();
    opts.host = Some("127.0.0.1".to_owned());
    opts.port = port;
    opts.user = "u".to_owned();
    opts
}

fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("strand-mysql-{}-{name}", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents).unwrap();
    path
}

fn infile_request(path: &std::path::Path) -> Vec<u8> {
    let mut payload = vec![0xFB];
    payload.extend_from_slice(path.to_string_lossy().as_bytes());
    payload
}

#[test]
fn local_infile_streams_the_file_and_settles_ok() {
    let contents = b"1,alpha\n2,beta\n".repeat(1000);
    let path = temp_file("data.csv", &contents);

    let expected = contents.clone();
    let request = infile_request(&path);
    let server = MockServer::spawn(move |stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_packet(stream, 1, &request);

        let mut received = Vec::new();
        loop {
            let (_seq, payload) = read_packet(stream);
            if payload.is_empty() {
                break;
            }
            received.extend_from_slice(&payload);
        }
        assert_eq!(received, expected);
        write_packet(stream, 1, &ok_payload(2000, 0, STATUS_AUTOCOMMIT, 0, "Records: 2000"));
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("LOAD DATA LOCAL INFILE 'data.csv' INTO TABLE t")
        .unwrap();
    assert_eq!(conn.affected_rows(), 2000);
    assert_eq!(conn.info().as_deref(), Some("Records: 2000"));
    assert_eq!(conn.state(), State::Ready);

    drop(conn);
    server.join();
    std::fs::remove_file(&path).ok();
}

#[test]
fn local_infile_disabled_completes_the_exchange_then_fails() {
    let path = temp_file("denied.csv", b"should never be read\n");

    let request = infile_request(&path);
    let server = MockServer::spawn(move |stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_packet(stream, 1, &request);

        // The client must refuse with an empty packet, not file data.
        let (_seq, payload) = read_packet(stream);
        assert!(payload.is_empty());
        write_packet(stream, 1, &ok_payload(0, 0, STATUS_AUTOCOMMIT, 0, ""));

        expect_command(stream, 0x0E);
        write_packet(stream, 1, &ok_payload(0, 0, STATUS_AUTOCOMMIT, 0, ""));
        expect_command(stream, 0x01);
    });

    let mut opts = opts_for(server.port);
    opts.local_infile = false;
    let conn = Connection::connect_with(&opts).unwrap();

    let err = conn
        .query("LOAD DATA LOCAL INFILE 'denied.csv' INTO TABLE t")
        .unwrap_err();
    assert!(matches!(err, Error::LocalInfile(_)));
    assert_eq!(conn.errno(), cr::CR_UNKNOWN_ERROR);
    assert_eq!(conn.state(), State::Ready);

    // The session survives the refused transfer.
    conn.ping().unwrap();
    drop(conn);
    server.join();
    std::fs::remove_file(&path).ok();
}

#[test]
fn local_infile_missing_file_still_terminates_the_stream() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_packet(stream, 1, b"\xFB/nonexistent/strand-mysql-missing.csv");

        let (_seq, payload) = read_packet(stream);
        assert!(payload.is_empty());
        write_packet(
            stream,
            1,
            &err_payload(1148, "42000", "The used command is not allowed"),
        );
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    let err = conn
        .query("LOAD DATA LOCAL INFILE '/nonexistent/strand-mysql-missing.csv' INTO TABLE t")
        .unwrap_err();
    // The server's reply wins over the local open failure.
    assert!(matches!(err, Error::Server(_)));
    assert_eq!(conn.errno(), 1148);
    assert_eq!(conn.state(), State::Ready);
    drop(conn);
    server.join();
}
