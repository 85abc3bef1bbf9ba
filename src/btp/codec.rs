//! BTP wire protocol codec
//!
//! Every BTP message is a fixed 5-byte header followed by the payload:
//! ```text
//! | service (u8) | opcode (u8) | controller index (u8) | data length (u16 LE) | data |
//! ```

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Size of the fixed BTP header
pub const HEADER_LEN: usize = 5;

/// One BTP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtpFrame {
    pub service: u8,
    pub opcode: u8,
    pub index: u8,
    pub data: Vec<u8>,
}

impl BtpFrame {
    /// Whether this frame is an unsolicited event rather than a response
    pub fn is_event(&self) -> bool {
        self.opcode >= super::types::EVENT_OPCODE_BASE
    }
}

/// Read a BTP frame from the stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<BtpFrame, Error> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let len = u16::from_le_bytes([header[3], header[4]]) as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(map_eof)?;

    Ok(BtpFrame {
        service: header[0],
        opcode: header[1],
        index: header[2],
        data,
    })
}

/// Write a BTP frame to the stream
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &BtpFrame,
) -> Result<(), Error> {
    let len = u16::try_from(frame.data.len()).map_err(|_| {
        Error::BtpProtocol(format!("Payload too large: {} bytes", frame.data.len()))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + frame.data.len());
    buf.push(frame.service);
    buf.push(frame.opcode);
    buf.push(frame.index);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&frame.data);

    writer.write_all(&buf).await?;
    writer.flush().await?;

    Ok(())
}

fn map_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::IutDisconnected
    } else {
        Error::Io(e)
    }
}
