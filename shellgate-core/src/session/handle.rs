use async_trait::async_trait;

/// Hook the registry calls to tear down whatever is driving a session's I/O
/// (the Terminal I/O Pump, in `shellgate-ssh`) without `shellgate-core`
/// depending on that crate. Mirrors `warpgate_common::handle::SessionHandle`,
/// made async since stopping a pump involves joining its forwarder tasks.
#[async_trait]
pub trait PumpHandle: Send + Sync {
    async fn stop(&self, reason: &str);
}

/// No-op handle for sessions that never got a pump wired up (e.g. failed
/// mid-creation) or for registry unit tests.
pub struct NullPumpHandle;

#[async_trait]
impl PumpHandle for NullPumpHandle {
    async fn stop(&self, _reason: &str) {}
}
