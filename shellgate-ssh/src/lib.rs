//! Wires `shellgate-core`'s registry, pool, and policy engine to a live
//! SSH transport via `russh`, and runs the per-session Terminal I/O Pump.

pub mod gateway;
pub mod pump;
pub mod transport;

pub use gateway::{Gateway, GatewayConfig, HostDirectory, HostRecord, PlaintextDecryptor, PolicyProvider, SecretDecryptor};
pub use pump::{InputFrame, Pump, TransportSink};
pub use transport::{ChannelEvent, RusshTransport, ShellChannel};
