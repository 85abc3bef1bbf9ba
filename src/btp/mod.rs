//! Bluetooth Tester Protocol (BTP) client
//!
//! Talks to the tester application running on the IUT over a local socket.

pub mod client;
pub mod codec;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;

pub use client::BtpClient;
pub use types::{BtpCommand, BtpEvent, ControllerInfo, EventFilter, Service};

/// Command/acknowledgement access to the IUT plus its event stream
///
/// One command is outstanding at a time; `wait_event` may run while no
/// command is in flight and sees events that arrived earlier.
#[async_trait]
pub trait IutTransport: Send + Sync {
    /// Issue a command and return the response payload
    async fn command(&self, command: &BtpCommand, timeout: Duration) -> Result<Vec<u8>>;

    /// Wait for the next IUT event matching `filter`
    async fn wait_event(&self, filter: EventFilter, timeout: Duration) -> Result<BtpEvent>;
}

/// Identity handshake: register GAP and read the controller info
pub async fn handshake(iut: &dyn IutTransport, timeout: Duration) -> Result<ControllerInfo> {
    iut.command(&BtpCommand::RegisterService(Service::Gap), timeout)
        .await?;
    let info = read_controller_info(iut, timeout).await?;

    tracing::info!(
        address = %info.address,
        name = %info.name,
        settings = format_args!("{:#010x}", info.current_settings),
        "IUT identified"
    );

    Ok(info)
}

/// Read the IUT's current address, settings and name
pub async fn read_controller_info(iut: &dyn IutTransport, timeout: Duration) -> Result<ControllerInfo> {
    let data = iut
        .command(&BtpCommand::GapReadControllerInfo, timeout)
        .await?;
    ControllerInfo::parse(&data)
}
