//! A binary-mode client whose byte stream gets corrupted with junk between
//! two frames must have the server resynchronize and keep ingesting,
//! rather than wedging or tearing down the connection.

use oml_test_utils::{connect_retrying, loopback_listener, run_in_memory_server};
use oml_types::{FieldDef, Schema, TypeTag, TypedValue};
use oml_wire::{Message, write_binary_message};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn junk_bytes_between_frames_are_skipped_without_losing_the_session() {
    let (listener, addr) = loopback_listener().await;
    let server = tokio::spawn(run_in_memory_server(listener));

    let mut socket = connect_retrying(addr).await;
    socket
        .write_all(b"experiment-id: exp1\ncontent: binary\nschema: 1 cpu load:int32\n\n")
        .await
        .unwrap();

    let first = write_binary_message(&Message {
        stream_index: 1,
        sequence: 1,
        timestamp: 0.0,
        values: vec![TypedValue::Int32(10)],
    });
    socket.write_all(&first).await.unwrap();

    // Garbage injected on the wire, simulating a corrupted span that isn't
    // itself a valid sync sequence.
    socket.write_all(&[0x11, 0x22, 0x33, 0x44, 0x55]).await.unwrap();

    let second = write_binary_message(&Message {
        stream_index: 1,
        sequence: 2,
        timestamp: 1.0,
        values: vec![TypedValue::Int32(20)],
    });
    socket.write_all(&second).await.unwrap();
    drop(socket);

    let run = server.await.unwrap();
    assert_eq!(run.final_state, oml_server::State::Data);

    let schema = Schema::new("cpu", 1, vec![FieldDef::new("load", TypeTag::Int32).unwrap()]).unwrap();
    let row_events = run
        .events
        .iter()
        .filter(|e| matches!(e, oml_server::SessionEvent::RowIngested { stream_index, .. } if *stream_index == schema.index))
        .count();
    assert_eq!(row_events, 2, "both frames either side of the junk must still be ingested");
}
