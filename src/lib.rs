// triwire: Bidirectional command RPC over WebSocket, TCP, and KCP.
//
// One envelope format, one command id namespace, one correlation scheme,
// three wire transports.  This root crate re-exports the public pieces;
// the integration suites under tests/ exercise them end to end.

pub use tw_client as client;
pub use tw_protocol as protocol;
pub use tw_server as server;
