//! Integration tests for the cotsync engine

mod support;

mod decode;
mod framing;
mod subscription;
mod sweep;
mod transport;
