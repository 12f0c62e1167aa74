#![cfg(feature = "test-utils")]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::TryStreamExt;
use streamwire::concurrency::cancel::CancelRx;
use streamwire::connection::base::ConnectionState;
use streamwire::connection::listener::EnumerationEvent;
use streamwire::connection::vendor::VendorFunctionality;
use streamwire::error::ErrorKind;
use streamwire::result::row::ByteRead;
use streamwire::test_utils::codec::{
    CodecEvent, ScriptBuilder, ScriptedValue, bytes_column, int64_column, text_column,
};
use streamwire::test_utils::{ScriptedConnection, scripted_connection};
use streamwire::types::{Statement, StatementBuilder, StatementKind};
use streamwire_telemetry::tracing::init_test_tracing;

fn two_rows(builder: ScriptBuilder) -> ScriptBuilder {
    builder
        .row_description(&[int64_column("id"), text_column("name")])
        .data_row()
        .int64(1)
        .text("alpha")
        .data_row()
        .int64(2)
        .text("beta")
        .end()
}

fn recorded_events() -> (
    Arc<Mutex<Vec<EnumerationEvent>>>,
    impl Fn(&EnumerationEvent) + Send + Sync + 'static,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener = move |event: &EnumerationEvent| sink.lock().unwrap().push(*event);

    (events, listener)
}

#[tokio::test]
async fn test_statement_kind_selects_exactly_one_strategy() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new().end().end().end().end().build();
    let ScriptedConnection {
        connection,
        recorder,
        events,
    } = scripted_connection(script);

    let simple = Statement::new("select 1");
    let parameterized = StatementBuilder::new("select $1").bind(1i64).build();
    let batched = StatementBuilder::new("insert into t values ($1)")
        .add_batch([1i64])
        .add_batch([2i64])
        .build();
    let both = StatementBuilder::new("insert into t values ($1)")
        .bind("ignored")
        .add_batch(["kept"])
        .build();

    for statement in [simple, parameterized, batched, both] {
        assert_eq!(connection.execute(statement, &cancel).await.unwrap(), 0);
    }

    assert_eq!(
        events.strategies(),
        vec![
            StatementKind::Simple,
            StatementKind::Parameterized,
            StatementKind::Batched,
            StatementKind::Batched,
        ]
    );

    let written = recorder.written();
    assert_eq!(written[0], b'Q');
    assert_eq!(written.iter().filter(|byte| **byte == b'B').count(), 2);
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_prepare_performs_no_io() {
    init_test_tracing();

    let ScriptedConnection {
        connection,
        recorder,
        events,
    } = scripted_connection(two_rows(ScriptBuilder::new()).build());

    let results = connection.prepare(Statement::new("select id, name"));
    assert!(!results.is_started());
    assert!(results.current().is_none());
    assert!(recorder.written().is_empty());
    assert!(recorder.reads().is_empty());
    assert!(events.snapshot().is_empty());
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_rows_are_produced_in_server_order() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let ScriptedConnection { connection, .. } =
        scripted_connection(two_rows(ScriptBuilder::new()).build());

    let mut results = connection.prepare(Statement::new("select id, name"));
    let mut names = Vec::new();
    while results.move_next(&cancel).await.unwrap() {
        let row = results.current().unwrap();
        assert_eq!(row.ordinal(), names.len() as u64);
        names.push(row.cell(1).unwrap().try_get_value(&cancel).await.unwrap());
    }

    assert_eq!(
        names,
        vec![
            Some(ScriptedValue::Text("alpha".to_owned())),
            Some(ScriptedValue::Text("beta".to_owned())),
        ]
    );
    assert!(results.is_finished());
    assert_eq!(results.items(), 2);
    assert!(!results.move_next(&cancel).await.unwrap());
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_drain_after_partial_read_consumes_everything() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new()
        .row_description(&[text_column("key"), bytes_column("blob")])
        .data_row()
        .text("first")
        .var(&[7; 64])
        .data_row()
        .text("second")
        .var(&[8; 3])
        .end()
        .build();
    let ScriptedConnection {
        connection,
        recorder,
        events,
    } = scripted_connection(script);

    let mut results = connection.prepare(Statement::new("select key, blob"));
    assert!(results.move_next(&cancel).await.unwrap());
    let row = results.current().unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(
        row.cell(1)
            .unwrap()
            .try_read_bytes(&mut buf, &cancel)
            .await
            .unwrap(),
        ByteRead::Read(4)
    );

    assert_eq!(results.drain(&cancel).await.unwrap(), 1);
    assert!(results.is_finished());

    assert_eq!(recorder.remaining(), 0);
    assert!(!connection.is_reserved());
    let stats = connection.reservation_stats();
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.outstanding(), 0);
    assert!(connection.is_idle());
    assert!(
        events
            .snapshot()
            .contains(&CodecEvent::Skipped { bytes: 60 })
    );
    assert!(events.decoded().is_empty());
}

#[tokio::test]
async fn test_reset_reruns_statement() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = two_rows(two_rows(ScriptBuilder::new())).build();
    let ScriptedConnection {
        connection,
        recorder,
        events,
    } = scripted_connection(script);
    let (seen, listener) = recorded_events();

    let mut results = connection
        .prepare(Statement::new("select id, name"))
        .with_listener(listener);
    assert!(results.move_next(&cancel).await.unwrap());
    results.reset(&cancel).await.unwrap();

    assert!(!results.is_started());
    assert!(results.current().is_none());
    assert!(connection.is_idle());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EnumerationEvent::BeforeStart,
            EnumerationEvent::AfterStart,
            EnumerationEvent::Item {
                index: 0,
                columns: 2
            },
        ]
    );

    assert_eq!(results.drain(&cancel).await.unwrap(), 2);
    assert_eq!(results.items(), 2);
    assert_eq!(events.strategies().len(), 2);
    assert_eq!(recorder.remaining(), 0);
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_listeners_observe_events_in_order() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let ScriptedConnection { connection, .. } =
        scripted_connection(two_rows(ScriptBuilder::new()).build());
    let (seen, listener) = recorded_events();
    let (second_seen, second_listener) = recorded_events();

    let mut results = connection
        .prepare(Statement::new("select id, name"))
        .with_listener(listener)
        .with_listener(second_listener);
    assert_eq!(results.drain(&cancel).await.unwrap(), 2);

    let expected = vec![
        EnumerationEvent::BeforeStart,
        EnumerationEvent::AfterStart,
        EnumerationEvent::Item {
            index: 0,
            columns: 2,
        },
        EnumerationEvent::Item {
            index: 1,
            columns: 2,
        },
        EnumerationEvent::BeforeEnd,
        EnumerationEvent::AfterEnd { items: 2 },
    ];
    assert_eq!(*seen.lock().unwrap(), expected);
    assert_eq!(*second_seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_statement_without_results_ends_immediately() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let ScriptedConnection { connection, .. } =
        scripted_connection(ScriptBuilder::new().end().build());
    let (seen, listener) = recorded_events();

    let mut results = connection
        .prepare(Statement::new("delete from t"))
        .with_listener(listener);
    assert!(!results.move_next(&cancel).await.unwrap());
    assert!(results.is_finished());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EnumerationEvent::BeforeStart,
            EnumerationEvent::AfterStart,
            EnumerationEvent::BeforeEnd,
            EnumerationEvent::AfterEnd { items: 0 },
        ]
    );
}

#[tokio::test]
async fn test_second_statement_is_rejected_while_first_runs() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let ScriptedConnection { connection, .. } =
        scripted_connection(two_rows(ScriptBuilder::new()).build());

    let mut first = connection.prepare(Statement::new("select id, name"));
    assert!(first.move_next(&cancel).await.unwrap());

    let mut second = connection.prepare(Statement::new("select 1"));
    let err = second.move_next(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StatementInProgress);
    assert_eq!(connection.state(), ConnectionState::Executing);

    assert_eq!(first.drain(&cancel).await.unwrap(), 1);
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_error_before_first_result_exposes_nothing() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new()
        .error("relation does not exist")
        .end()
        .build();
    let ScriptedConnection { connection, .. } = scripted_connection(script);
    let (seen, listener) = recorded_events();

    let mut results = connection
        .prepare(Statement::new("select * from missing"))
        .with_listener(listener);
    let err = results.move_next(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(err.detail(), Some("relation does not exist"));
    assert!(results.current().is_none());
    assert!(!results.move_next(&cancel).await.unwrap());
    assert_eq!(*seen.lock().unwrap(), vec![EnumerationEvent::BeforeStart]);

    // The stream is still aligned, so the connection is reusable.
    assert!(connection.is_idle());
    assert_eq!(
        connection
            .execute(Statement::new("select 1"), &cancel)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_error_mid_stream_ends_enumeration_at_that_advance() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new()
        .row_description(&[int64_column("id")])
        .data_row()
        .int64(1)
        .error("division by zero")
        .build();
    let ScriptedConnection {
        connection,
        recorder,
        ..
    } = scripted_connection(script);
    let (seen, listener) = recorded_events();

    let mut results = connection
        .prepare(Statement::new("select 1 / x"))
        .with_listener(listener);
    assert!(results.move_next(&cancel).await.unwrap());
    let err = results.move_next(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert!(results.current().is_none());
    assert!(!results.move_next(&cancel).await.unwrap());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EnumerationEvent::BeforeStart,
            EnumerationEvent::AfterStart,
            EnumerationEvent::Item {
                index: 0,
                columns: 1
            },
            EnumerationEvent::BeforeEnd,
            EnumerationEvent::AfterEnd { items: 1 },
        ]
    );
    assert!(connection.is_idle());
    assert!(!connection.is_reserved());
    assert_eq!(recorder.remaining(), 0);
}

#[tokio::test]
async fn test_protocol_violation_breaks_connection() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new()
        .row_description(&[int64_column("id")])
        .data_row()
        .int64(1)
        .build();
    let mut bytes = script.to_vec();
    bytes.push(b'?');
    let ScriptedConnection { connection, .. } = scripted_connection(Bytes::from(bytes));

    let mut results = connection.prepare(Statement::new("select id"));
    assert!(results.move_next(&cancel).await.unwrap());
    let err = results.move_next(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(matches!(connection.state(), ConnectionState::Broken(_)));

    let err = connection
        .execute(Statement::new("select 1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_value_stream_materializes_every_row() {
    init_test_tracing();

    let ScriptedConnection { connection, .. } =
        scripted_connection(two_rows(ScriptBuilder::new()).build());

    let rows: Vec<Vec<ScriptedValue>> = connection
        .prepare(Statement::new("select id, name"))
        .into_value_stream(CancelRx::never())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            vec![
                ScriptedValue::Int64(1),
                ScriptedValue::Text("alpha".to_owned())
            ],
            vec![
                ScriptedValue::Int64(2),
                ScriptedValue::Text("beta".to_owned())
            ],
        ]
    );
    assert!(connection.is_idle());
}

#[tokio::test]
async fn test_null_values_decode_as_null() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let script = ScriptBuilder::new()
        .row_description(&[text_column("name")])
        .data_row()
        .null()
        .end()
        .build();
    let ScriptedConnection { connection, .. } = scripted_connection(script);

    let mut results = connection.prepare(Statement::new("select name"));
    assert!(results.move_next(&cancel).await.unwrap());
    let row = results.current().unwrap();
    assert_eq!(
        row.cell(0).unwrap().try_get_value(&cancel).await.unwrap(),
        Some(ScriptedValue::Null)
    );
}

#[tokio::test]
async fn test_vendor_builds_statements_and_escapes_literals() {
    init_test_tracing();

    let ScriptedConnection { connection, .. } = scripted_connection(Bytes::new());
    let vendor = connection.vendor();

    let statement = vendor
        .create_statement_builder("select $1")
        .bind(vendor.escape_literal("o'neil").unwrap())
        .build();
    assert_eq!(statement.text(), "select $1");
    assert_eq!(statement.parameters().len(), 1);
    assert_eq!(vendor.escape_literal("o'neil").as_deref(), Some("'o''neil'"));
}

#[tokio::test]
async fn test_close_terminates_and_shuts_down() {
    init_test_tracing();

    let cancel = CancelRx::never();
    let ScriptedConnection {
        connection,
        recorder,
        events,
    } = scripted_connection(Bytes::new());

    connection.close(&cancel).await.unwrap();
    connection.close(&cancel).await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(recorder.is_shutdown());
    assert_eq!(recorder.written(), b"X".to_vec());
    assert_eq!(
        events
            .snapshot()
            .iter()
            .filter(|event| **event == CodecEvent::Terminated)
            .count(),
        1
    );

    let err = connection
        .execute(Statement::new("select 1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
