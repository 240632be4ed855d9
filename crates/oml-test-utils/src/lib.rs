//! Shared helpers for integration tests that exercise a client against a
//! real (if minimal) server loop: a loopback TCP pair, and a small runner
//! that drives an [`oml_server::Session`] off one end of it.

use std::sync::Arc;

use oml_backend::InMemoryBackendFactory;
use oml_server::{Session, SessionEvent, State, TableRegistry};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Binds an ephemeral loopback port, accepts exactly one connection, and
/// returns `(server_side, client_addr)`. Pair this with
/// `TcpStream::connect(client_addr)` from the test's client half.
pub async fn loopback_listener() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener has a local addr");
    (listener, addr)
}

/// One connection's worth of ingested events, collected by
/// [`run_in_memory_server`] once the peer closes the socket or the session
/// enters [`State::ProtocolError`].
pub struct SessionRun {
    pub events: Vec<SessionEvent>,
    pub final_state: State,
    pub registry: Arc<TableRegistry<InMemoryBackendFactory>>,
}

/// Accepts one connection on `listener`, feeds every byte it sends into a
/// fresh [`Session`] backed by a fresh [`InMemoryBackendFactory`], and
/// returns once the peer disconnects or the session errors out. Intended
/// for short-lived integration tests, not production use (see the
/// `services/oml-server` binary for the real accept loop).
pub async fn run_in_memory_server(listener: TcpListener) -> SessionRun {
    run_in_memory_server_with_registry(listener, Arc::new(TableRegistry::new(InMemoryBackendFactory::new()))).await
}

/// Same as [`run_in_memory_server`] but against a caller-supplied registry,
/// so a test can reconnect a second time and assert state (e.g. backoff
/// scenarios) survived across the gap.
pub async fn run_in_memory_server_with_registry(
    listener: TcpListener,
    registry: Arc<TableRegistry<InMemoryBackendFactory>>,
) -> SessionRun {
    let (mut socket, _) = listener.accept().await.expect("accept loopback connection");
    let mut session = Session::new(registry.clone());
    let mut events = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        match session.feed(&buf[..n]).await {
            Ok(new_events) => events.extend(new_events),
            Err(_) => break,
        }
    }

    SessionRun {
        events,
        final_state: session.state(),
        registry,
    }
}

/// Runs [`run_in_memory_server_with_registry`] for exactly one accepted
/// connection, then loops back to accept the next one, up to `rounds`
/// times. Used by reconnect/backoff scenarios where the client is expected
/// to drop and re-establish its TCP connection.
pub async fn run_in_memory_server_rounds(listener: TcpListener, rounds: usize) -> Vec<SessionRun> {
    let registry = Arc::new(TableRegistry::new(InMemoryBackendFactory::new()));
    let mut runs = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let (mut socket, _) = listener.accept().await.expect("accept loopback connection");
        let mut session = Session::new(registry.clone());
        let mut events = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            match session.feed(&buf[..n]).await {
                Ok(new_events) => events.extend(new_events),
                Err(_) => break,
            }
        }
        runs.push(SessionRun {
            events,
            final_state: session.state(),
            registry: registry.clone(),
        });
    }
    runs
}

/// Connects to `addr`, retrying briefly, for tests where the listener and
/// the connecting client race.
pub async fn connect_retrying(addr: std::net::SocketAddr) -> TcpStream {
    for _ in 0..20 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    TcpStream::connect(addr).await.expect("connect to loopback listener")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trip_ingests_a_row() {
        let (listener, addr) = loopback_listener().await;
        let server = tokio::spawn(run_in_memory_server(listener));

        let mut client = connect_retrying(addr).await;
        use tokio::io::AsyncWriteExt;
        client
            .write_all(b"experiment-id: exp1\ncontent: text\nschema: 1 cpu load:double\n\n0.0\t1\t1\t0.5\n")
            .await
            .unwrap();
        drop(client);

        let run = server.await.unwrap();
        assert_eq!(run.final_state, State::Data);
        assert_eq!(run.events.len(), 2);
    }
}
