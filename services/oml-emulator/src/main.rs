use std::env;
use std::time::Duration;

use oml_client::{Client, ClientConfig, Last, Loss, Trigger};
use oml_types::{FieldDef, Schema, TypeTag, TypedValue};
use oml_wire::ContentMode;
use tracing::info;

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn content_mode_from_env() -> ContentMode {
    match env_or("CONTENT_MODE", "text").as_str() {
        "binary" => ContentMode::Binary,
        _ => ContentMode::Text,
    }
}

/// Synthetic CPU-load-like signal: no RNG crate is introduced, so the
/// waveform is a deterministic sine plus a slow integer counter, derived
/// from the tick count rather than a seeded generator.
fn synthetic_load(tick: u64) -> f64 {
    let phase = tick as f64 / 10.0;
    0.5 + 0.4 * phase.sin()
}

#[tokio::main]
async fn main() {
    let log_level = env_or("LOG_LEVEL", "info");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .init();

    let server_addr = env_or("SERVER_ADDR", "127.0.0.1:3003");
    let domain = env_or("EXPERIMENT_ID", "emulator");
    let app_name = env_or("APP_NAME", "oml-emulator");
    let sender_id = env_or("SENDER_ID", "emulator-1");
    let interval_ms: u64 = env_or("INTERVAL_MS", "1000").parse().unwrap_or(1000);
    let content_mode = content_mode_from_env();

    info!(server_addr, domain, "emulator starting");

    let client = Client::connect(ClientConfig {
        server_addr,
        domain,
        app_name,
        sender_id,
        content_mode,
        egress_capacity_bytes: 1 << 20,
        egress_chunk_bytes: 4096,
    })
    .await
    .expect("failed to connect to server");

    let input_schema = Schema::new(
        "cpu_input",
        0,
        vec![
            FieldDef::new("load", TypeTag::Double).unwrap(),
            FieldDef::new("seq", TypeTag::Int32).unwrap(),
        ],
    )
    .expect("valid schema");
    let mp = client
        .register_mp("cpu", input_schema)
        .await
        .expect("register measurement point");

    client
        .attach_stream(
            &mp,
            "cpu_last",
            vec![Box::new(Last::new("load", TypeTag::Double))],
            vec![0],
            Trigger::SampleCount(1),
        )
        .await
        .expect("attach last stream");

    client
        .attach_stream(
            &mp,
            "cpu_loss",
            vec![Box::new(Loss::new())],
            vec![1],
            Trigger::SampleCount(10),
        )
        .await
        .expect("attach loss stream");

    client
        .inject_metadata("cpu", "units", "percent", Some("load"))
        .await
        .expect("inject metadata");

    let mut tick: u64 = 0;
    let started = tokio::time::Instant::now();
    loop {
        let load = synthetic_load(tick);
        let timestamp = started.elapsed().as_secs_f64();
        client
            .inject(&mp, &[TypedValue::Double(load), TypedValue::Int32(tick as i32)], timestamp)
            .await
            .expect("inject sample");
        tick += 1;
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }
}
