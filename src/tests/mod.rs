//! Integration tests exercising the `graphql-ws` transport end to end:
//! a [`Connection`](crate::protocol::connection::Connection) wired to a
//! real [`ServerHandle`](crate::server::ServerHandle), driven purely
//! through client messages, asserting on what comes back over `reply`.

pub mod protocol_lifecycle;
