//! Binary-mode schema mismatch and rename (spec worked example): client 1
//! declares table `t` with an int32 column; client 2 declares `t` with a
//! string column. The registry must bind client 2's stream to `t_2`
//! instead of erroring or silently merging the two schemas.

use oml_client::{Client, ClientConfig, Last, Trigger};
use oml_types::{FieldDef, Schema, TypeTag, TypedValue};
use oml_wire::ContentMode;

#[tokio::test]
async fn incompatible_schema_is_bound_to_a_renamed_table() {
    let (listener, addr) = oml_test_utils::loopback_listener().await;
    let server = tokio::spawn(oml_test_utils::run_in_memory_server_rounds(listener, 2));

    let client_a = Client::connect(ClientConfig {
        server_addr: addr.to_string(),
        domain: "exp1".to_string(),
        app_name: "rename-test".to_string(),
        sender_id: "sender-a".to_string(),
        content_mode: ContentMode::Binary,
        egress_capacity_bytes: 1 << 16,
        egress_chunk_bytes: 4096,
    })
    .await
    .unwrap();
    let schema_a = Schema::new("id_input", 0, vec![FieldDef::new("id", TypeTag::Int32).unwrap()]).unwrap();
    let mp_a = client_a.register_mp("a", schema_a).await.unwrap();
    client_a
        .attach_stream(&mp_a, "t", vec![Box::new(Last::new("id", TypeTag::Int32))], vec![0], Trigger::SampleCount(1))
        .await
        .unwrap();
    client_a.inject(&mp_a, &[TypedValue::Int32(1)], 0.0).await.unwrap();
    client_a.close().await;

    let client_b = Client::connect(ClientConfig {
        server_addr: addr.to_string(),
        domain: "exp1".to_string(),
        app_name: "rename-test".to_string(),
        sender_id: "sender-b".to_string(),
        content_mode: ContentMode::Binary,
        egress_capacity_bytes: 1 << 16,
        egress_chunk_bytes: 4096,
    })
    .await
    .unwrap();
    let schema_b = Schema::new("id_input", 0, vec![FieldDef::new("id", TypeTag::String).unwrap()]).unwrap();
    let mp_b = client_b.register_mp("a", schema_b).await.unwrap();
    client_b
        .attach_stream(
            &mp_b,
            "t",
            vec![Box::new(Last::new("id", TypeTag::String))],
            vec![0],
            Trigger::SampleCount(1),
        )
        .await
        .unwrap();
    client_b
        .inject(&mp_b, &[TypedValue::String(oml_types::OmlString::Owned("x".to_string()))], 0.0)
        .await
        .unwrap();
    client_b.close().await;

    let runs = server.await.unwrap();
    assert_eq!(runs.len(), 2);

    let second_bound = runs[1]
        .events
        .iter()
        .find_map(|e| match e {
            oml_server::SessionEvent::SchemaBound { table, .. } => Some(table.clone()),
            _ => None,
        })
        .expect("client b's stream was bound to a table");
    assert_eq!(second_bound, "t_2");
}
