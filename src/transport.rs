use log::{debug, error, warn};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::address::NodeAddress;
use crate::codec::MAX_DATAGRAM_SIZE;

/// Datagram delivery as seen by the protocol engine.
///
/// Sends are fire-and-forget: no delivery or ordering guarantee, duplicates
/// are possible. `receive` drains whatever is queued for `at` right now.
pub trait Transport {
    fn send(&mut self, from: NodeAddress, to: NodeAddress, payload: Vec<u8>);
    fn receive(&mut self, at: NodeAddress) -> Vec<Vec<u8>>;
}

// UdpTransport binds one UDP socket per node. A background task receives
// datagrams and hands them to the tick loop over an unbounded channel; a second
// task drains outbound datagrams so sends never block the tick loop.
pub struct UdpTransport {
    local: NodeAddress,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddrV4) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = match socket.local_addr()? {
            SocketAddr::V4(bound) => NodeAddress::from(bound),
            SocketAddr::V6(bound) => anyhow::bail!("bound to unexpected IPv6 address {}", bound),
        };

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(Self::receive_loop(socket.clone(), inbound_tx));
        let sender = tokio::spawn(Self::send_loop(socket, outbound_rx));

        Ok(Self {
            local,
            inbound,
            outbound,
            receiver,
            sender,
        })
    }

    pub fn local_address(&self) -> NodeAddress {
        self.local
    }

    async fn receive_loop(socket: Arc<UdpSocket>, tx: mpsc::UnboundedSender<Vec<u8>>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    debug!("Received {} bytes from {}", len, src);
                    if tx.send(buf[..len].to_vec()).is_err() {
                        // Transport dropped
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn send_loop(
        socket: Arc<UdpSocket>,
        mut outbound: mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    ) {
        while let Some((target, payload)) = outbound.recv().await {
            if let Err(e) = socket.send_to(&payload, target).await {
                warn!("Failed to send {} bytes to {}: {}", payload.len(), target, e);
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, from: NodeAddress, to: NodeAddress, payload: Vec<u8>) {
        if from != self.local {
            warn!("Refusing to send as {} from socket bound to {}", from, self.local);
            return;
        }
        let target = SocketAddr::V4(to.socket_addr());
        if self.outbound.send((target, payload)).is_err() {
            error!("Send task for {} has stopped, dropping datagram to {}", self.local, to);
        }
    }

    fn receive(&mut self, at: NodeAddress) -> Vec<Vec<u8>> {
        if at != self.local {
            return Vec::new();
        }
        let mut queued = Vec::new();
        while let Ok(payload) = self.inbound.try_recv() {
            queued.push(payload);
        }
        queued
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
        self.sender.abort();
    }
}
