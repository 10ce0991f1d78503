//! Relay integration tests.
//!
//! Every test stands up real HTTP, binary RPC and gRPC servers on port 0 and
//! uses the in-memory broker in place of RabbitMQ.

mod support;

mod connection;
mod gateway;
mod queue;
mod transports;
mod wire;
