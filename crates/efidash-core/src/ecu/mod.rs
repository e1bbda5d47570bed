//! ECU acquisition
//!
//! Providers that produce realtime engine data. [`SpeeduinoEcu`] speaks
//! the Speeduino serial protocol in either of its two wire variants;
//! [`DemoEcu`] synthesizes plausible data for development without
//! hardware. Both sit behind [`EcuProvider`] so the scheduler does not
//! care which one it is polling.

mod demo;
mod frame;
mod speeduino;

pub use demo::DemoEcu;
pub use frame::DataFrame;
pub use speeduino::SpeeduinoEcu;

use std::sync::Arc;

use crate::config::{EcuConfig, EcuKind};
use crate::protocol::ProtocolError;

/// Build the provider selected by the configuration
pub fn provider_for(cfg: &EcuConfig) -> Arc<dyn EcuProvider> {
    match cfg.kind {
        EcuKind::Speeduino => Arc::new(SpeeduinoEcu::new(cfg)),
        EcuKind::Demo => Arc::new(DemoEcu::new(cfg.stoich)),
    }
}

/// Which parser applies to a raw response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTag {
    /// Payload of the enhanced `'n'` command (header already stripped)
    PlainN,
    /// Payload of the legacy `'A'` command (echo byte stripped)
    PlainA,
    /// 130-byte OutputChannels block from the framed `'r'` command
    Framed,
}

/// Raw serial response carried from the I/O step to the parse step
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub tag: ResponseTag,
    pub bytes: Vec<u8>,
}

/// An ECU data source.
///
/// The serial driver additionally exposes its `poll_raw`/`parse` split
/// for embedders that defer parsing to another thread; the trait only
/// pins the combined cycle, which is all the scheduler needs.
pub trait EcuProvider: Send + Sync {
    /// Human-readable provider name for logs
    fn name(&self) -> &'static str;

    /// Open the link and verify communication
    fn connect(&self) -> Result<(), ProtocolError>;

    /// Shut the link down; safe to call when already closed
    fn close(&self);

    fn is_connected(&self) -> bool;

    /// One acquisition cycle producing a decoded frame
    fn poll(&self) -> Result<DataFrame, ProtocolError>;
}
