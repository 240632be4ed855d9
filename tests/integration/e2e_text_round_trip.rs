//! A real `oml-client` connects over loopback TCP, in text mode, and
//! injects a handful of samples through a `Last` filter. The rows it
//! writes must arrive at the server-side session exactly as encoded.

use oml_client::{Client, ClientConfig, Last, Trigger};
use oml_types::{FieldDef, Schema, TypeTag, TypedValue};
use oml_wire::ContentMode;

#[tokio::test]
async fn client_injections_arrive_as_rows_on_the_server() {
    let (listener, addr) = oml_test_utils::loopback_listener().await;
    let server = tokio::spawn(oml_test_utils::run_in_memory_server(listener));

    let client = Client::connect(ClientConfig {
        server_addr: addr.to_string(),
        domain: "exp1".to_string(),
        app_name: "round-trip-test".to_string(),
        sender_id: "sender-a".to_string(),
        content_mode: ContentMode::Text,
        egress_capacity_bytes: 1 << 16,
        egress_chunk_bytes: 4096,
    })
    .await
    .unwrap();

    let input_schema = Schema::new("cpu_input", 0, vec![FieldDef::new("load", TypeTag::Double).unwrap()]).unwrap();
    let mp = client.register_mp("cpu", input_schema).await.unwrap();
    client
        .attach_stream(
            &mp,
            "cpu_last",
            vec![Box::new(Last::new("load", TypeTag::Double))],
            vec![0],
            Trigger::SampleCount(1),
        )
        .await
        .unwrap();

    client.inject(&mp, &[TypedValue::Double(0.25)], 1.0).await.unwrap();
    client.inject(&mp, &[TypedValue::Double(0.75)], 2.0).await.unwrap();
    client.close().await;

    let run = server.await.unwrap();
    assert_eq!(run.final_state, oml_server::State::Data);

    let row_events: Vec<_> = run
        .events
        .iter()
        .filter(|e| matches!(e, oml_server::SessionEvent::RowIngested { table, .. } if table == "cpu_last"))
        .collect();
    assert_eq!(row_events.len(), 2);

    let backend = run.registry.clone();
    let bound = backend
        .reconcile("exp1", &Schema::new("cpu_last", 1, vec![FieldDef::new("load", TypeTag::Double).unwrap()]).unwrap())
        .await
        .unwrap();
    assert_eq!(bound.table_name, "cpu_last");
}
