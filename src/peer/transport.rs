use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{MAX_MESSAGE_SIZE, READ_BUFFER_SIZE, WRITE_TIMEOUT};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Framed peer wire transport over a TCP stream.
///
/// Partial frames stay in the read buffer between calls, so
/// [`receive_message`](Self::receive_message) is cancel-safe and can sit in
/// a `tokio::select!` next to outgoing traffic.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    peer_addr: SocketAddr,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Result<Self, PeerError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            peer_addr,
        })
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.write(&handshake.encode()).await
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill(HANDSHAKE_LEN).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.write(&message.encode()).await
    }

    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::MessageTooLarge(length));
        }

        let total_len = 4 + length;
        self.fill(total_len).await?;

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn fill(&mut self, len: usize) -> Result<(), PeerError> {
        if self.read_buf.capacity() < len {
            self.read_buf.reserve(len - self.read_buf.len());
        }
        while self.read_buf.len() < len {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), PeerError> {
        timeout(WRITE_TIMEOUT, self.stream.write_all(data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }
}
