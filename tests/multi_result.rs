//! Result-set chaining: buffered and unbuffered iteration, multi-result
//! statements, reference counting between connection and result handles.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use strand_mysql::{Connection, Error, Opts, State};

fn opts_for(port: u16) -> Opts {
    let mut opts = Opts::default();
    opts.host = Some("127.0.0.1".to_owned());
    opts.port = port;
    opts.user = "u".to_owned();
    opts
}

#[test]
fn two_result_sets_chain_through_next_result() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);

        // First result set; terminal EOF announces another one.
        write_packet(stream, 1, &[1]);
        write_packet(stream, 2, &column_payload("a"));
        write_packet(stream, 3, &eof_payload(0, STATUS_AUTOCOMMIT));
        write_packet(stream, 4, &row_payload(&[Some("1")]));
        write_packet(stream, 5, &eof_payload(0, STATUS_AUTOCOMMIT | STATUS_MORE_RESULTS));

        // Second result set; terminal EOF is final.
        write_packet(stream, 6, &[1]);
        write_packet(stream, 7, &column_payload("b"));
        write_packet(stream, 8, &eof_payload(0, STATUS_AUTOCOMMIT));
        write_packet(stream, 9, &row_payload(&[Some("2")]));
        write_packet(stream, 10, &row_payload(&[Some("3")]));
        write_packet(stream, 11, &eof_payload(0, STATUS_AUTOCOMMIT));

        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("CALL report()").unwrap();
    assert_eq!(conn.state(), State::FetchingData);
    assert_eq!(conn.field_count(), 1);

    let first = conn.store_result().unwrap();
    assert_eq!(first.columns[0].name, "a");
    assert_eq!(first.row_count(), 1);
    assert!(conn.more_results());
    assert_eq!(conn.state(), State::NextResultPending);

    conn.next_result().unwrap();
    let second = conn.store_result().unwrap();
    assert_eq!(second.columns[0].name, "b");
    let rows: Vec<_> = second.rows().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].as_deref(), Some(b"2".as_slice()));
    assert_eq!(rows[1][0].as_deref(), Some(b"3".as_slice()));

    assert!(!conn.more_results());
    assert_eq!(conn.state(), State::Ready);

    let err = conn.next_result().unwrap_err();
    assert!(matches!(err, Error::CommandsOutOfSync));

    drop(conn);
    server.join();
}

#[test]
fn unbuffered_result_holds_a_counted_reference() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_result_set(stream, "a", &["1", "2", "3"], STATUS_AUTOCOMMIT);
        expect_command(stream, 0x0E);
        write_packet(stream, 1, &ok_payload(0, 0, STATUS_AUTOCOMMIT, 0, ""));
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    assert_eq!(conn.reference_count(), 1);

    conn.query("SELECT a FROM t").unwrap();
    let mut result = conn.use_result().unwrap();
    assert_eq!(conn.reference_count(), 2);
    assert_eq!(result.columns().len(), 1);

    let mut values = Vec::new();
    while let Some(row) = result.fetch_row().unwrap() {
        values.push(String::from_utf8(row[0].clone().unwrap()).unwrap());
    }
    assert_eq!(values, ["1", "2", "3"]);
    assert!(result.eof_reached());
    assert_eq!(conn.state(), State::Ready);

    drop(result);
    assert_eq!(conn.reference_count(), 1);

    conn.ping().unwrap();
    drop(conn);
    server.join();
}

#[test]
fn dropping_an_unbuffered_result_skips_remaining_rows() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_result_set(stream, "a", &["1", "2", "3"], STATUS_AUTOCOMMIT);
        expect_command(stream, 0x0E);
        write_packet(stream, 1, &ok_payload(0, 0, STATUS_AUTOCOMMIT, 0, ""));
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("SELECT a FROM t").unwrap();
    {
        let mut result = conn.use_result().unwrap();
        let first = result.fetch_row().unwrap().unwrap();
        assert_eq!(first[0].as_deref(), Some(b"1".as_slice()));
        // Two rows and the EOF are still on the wire.
    }
    assert_eq!(conn.state(), State::Ready);
    conn.ping().unwrap();
    drop(conn);
    server.join();
}

#[test]
fn use_result_twice_is_out_of_sync() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_result_set(stream, "a", &["1"], STATUS_AUTOCOMMIT);
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("SELECT a FROM t").unwrap();
    let result = conn.use_result().unwrap();
    let err = conn.use_result().unwrap_err();
    assert!(matches!(err, Error::CommandsOutOfSync));
    drop(result);
    drop(conn);
    server.join();
}

#[test]
fn error_during_fetch_returns_connection_to_ready() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_packet(stream, 1, &[1]);
        write_packet(stream, 2, &column_payload("a"));
        write_packet(stream, 3, &eof_payload(0, STATUS_AUTOCOMMIT | STATUS_MORE_RESULTS));
        write_packet(stream, 4, &row_payload(&[Some("1")]));
        // The server aborts the statement mid-set.
        write_packet(stream, 5, &err_payload(1317, "70100", "Query execution was interrupted"));
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("SELECT a FROM t").unwrap();
    let mut result = conn.use_result().unwrap();
    assert!(result.fetch_row().unwrap().is_some());
    let err = result.fetch_row().unwrap_err();
    assert!(matches!(err, Error::Server(_)));
    drop(result);

    assert_eq!(conn.errno(), 1317);
    assert_eq!(conn.state(), State::Ready);
    // The aborted multi-statement no longer advertises further results.
    assert!(!conn.more_results());
    drop(conn);
    server.join();
}

#[test]
fn multi_result_chain_of_ok_packets() {
    let server = MockServer::spawn(|stream| {
        handshake(stream, 42, "5.6.10", STATUS_AUTOCOMMIT);
        expect_command(stream, 0x03);
        write_packet(
            stream,
            1,
            &ok_payload(1, 0, STATUS_AUTOCOMMIT | STATUS_MORE_RESULTS, 0, ""),
        );
        write_packet(stream, 2, &ok_payload(2, 0, STATUS_AUTOCOMMIT, 0, ""));
        expect_command(stream, 0x01);
    });

    let conn = Connection::connect_with(&opts_for(server.port)).unwrap();
    conn.query("INSERT INTO a VALUES(1); INSERT INTO b VALUES(1),(2)")
        .unwrap();
    assert_eq!(conn.affected_rows(), 1);
    assert!(conn.more_results());
    assert_eq!(conn.state(), State::NextResultPending);

    conn.next_result().unwrap();
    assert_eq!(conn.affected_rows(), 2);
    assert!(!conn.more_results());
    assert_eq!(conn.state(), State::Ready);
    drop(conn);
    server.join();
}
