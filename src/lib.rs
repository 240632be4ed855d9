//! Umbrella crate tying the OML workspace together for the root-level
//! end-to-end test suites under `tests/integration/`. Each concern lives in
//! its own crate (`oml-types`, `oml-buffer`, `oml-wire`, `oml-client`,
//! `oml-backend`, `oml-server`); this crate has no logic of its own.

pub use oml_backend as backend;
pub use oml_buffer as buffer;
pub use oml_client as client;
pub use oml_server as server;
pub use oml_types as types;
pub use oml_wire as wire;
