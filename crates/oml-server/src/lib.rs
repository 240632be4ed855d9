//! Server-side core: schema reconciliation against a pluggable storage
//! backend (§4.6) and the per-connection session state machine that drives
//! it (§4.4). Transport (accepting TCP connections, feeding bytes in) lives
//! in the `oml-server` binary crate, not here.

mod registry;
mod session;

pub use registry::{BoundTable, ReconcileError, TableRegistry, MAX_TABLE_RENAME};
pub use session::{Session, SessionError, SessionEvent, State};

#[cfg(test)]
mod tests {
    use super::*;
    use oml_backend::InMemoryBackendFactory;
    use std::sync::Arc;

    fn new_session() -> Session<InMemoryBackendFactory> {
        Session::new(Arc::new(TableRegistry::new(InMemoryBackendFactory::new())))
    }

    #[tokio::test]
    async fn header_block_transitions_into_data_state() {
        let mut session = new_session();
        let events = session
            .feed(b"experiment-id: exp1\ncontent: text\nschema: 1 cpu load:double\n\n")
            .await
            .unwrap();
        assert_eq!(session.state(), State::Data);
        assert_eq!(
            events,
            vec![SessionEvent::SchemaBound { stream_index: 1, table: "cpu".to_string() }]
        );
    }

    #[tokio::test]
    async fn missing_required_header_enters_protocol_error() {
        let mut session = new_session();
        let result = session.feed(b"content: text\n\n").await;
        assert!(result.is_err());
        assert_eq!(session.state(), State::ProtocolError);
    }

    #[tokio::test]
    async fn text_row_is_ingested_once_its_stream_is_bound() {
        let mut session = new_session();
        session
            .feed(b"experiment-id: exp1\ncontent: text\nschema: 1 cpu load:double\n\n")
            .await
            .unwrap();
        let events = session.feed(b"0.0\t1\t1\t0.5\n").await.unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::RowIngested { stream_index: 1, table: "cpu".to_string() }]
        );
    }

    #[tokio::test]
    async fn row_on_an_undeclared_stream_is_a_protocol_error() {
        let mut session = new_session();
        session.feed(b"experiment-id: exp1\ncontent: text\n\n").await.unwrap();
        let result = session.feed(b"0.0\t9\t1\t0.5\n").await;
        assert!(matches!(result, Err(SessionError::UnboundStream(9))));
        assert_eq!(session.state(), State::ProtocolError);
    }

    #[tokio::test]
    async fn schema_metadata_row_binds_a_new_stream_mid_session() {
        let mut session = new_session();
        session.feed(b"experiment-id: exp1\ncontent: text\n\n").await.unwrap();
        let events = session.feed(b"0.0\t0\t1\tschema\t2 mem used:uint32\n").await.unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::SchemaBound { stream_index: 2, table: "mem".to_string() }]
        );
        let events = session.feed(b"0.0\t2\t1\t1024\n").await.unwrap();
        assert_eq!(
            events,
            vec![SessionEvent::RowIngested { stream_index: 2, table: "mem".to_string() }]
        );
    }

    #[tokio::test]
    async fn plain_metadata_key_is_persisted_not_routed() {
        let mut session = new_session();
        session.feed(b"experiment-id: exp1\ncontent: text\n\n").await.unwrap();
        let events = session.feed(b"0.0\t0\t1\tstart_time\t1700000000\n").await.unwrap();
        assert_eq!(events, vec![SessionEvent::MetadataStored { key: "start_time".to_string() }]);
    }
}
