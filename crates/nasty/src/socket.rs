//! The nasty datagram socket.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use logging::debug_log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{DatagramEndpoint, Nastiness};

/// A UDP endpoint that injects faults on everything it sends.
///
/// Client sockets are created with [`NastyDgmSocket::connect`] and talk to
/// one server. Server sockets are created with [`NastyDgmSocket::bind`] and
/// reply to whichever peer spoke last, the conventional single-client
/// datagram-server shape.
pub struct NastyDgmSocket {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    connected: bool,
    nastiness: Nastiness,
    rng: StdRng,
}

impl NastyDgmSocket {
    /// Client constructor: binds an ephemeral port and connects to `server`.
    pub fn connect<A: ToSocketAddrs>(server: A, nastiness: Nastiness) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(server)?;
        Ok(Self {
            socket,
            peer: None,
            connected: true,
            nastiness,
            rng: StdRng::from_entropy(),
        })
    }

    /// Server constructor: binds `port` on every interface.
    pub fn bind(port: u16, nastiness: Nastiness) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Self {
            socket,
            peer: None,
            connected: false,
            nastiness,
            rng: StdRng::from_entropy(),
        })
    }

    /// Replaces the entropy-seeded RNG so a fault sequence can be replayed.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn transmit(&self, datagram: &[u8]) -> io::Result<()> {
        if self.connected {
            self.socket.send(datagram)?;
            return Ok(());
        }
        match self.peer {
            Some(peer) => {
                self.socket.send_to(datagram, peer)?;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no peer has spoken yet",
            )),
        }
    }
}

impl DatagramEndpoint for NastyDgmSocket {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.rng.gen_bool(self.nastiness.drop_probability()) {
            debug_log!(Net, 2, "nasty socket dropped a {}-byte datagram", datagram.len());
            return Ok(());
        }
        if !datagram.is_empty() && self.rng.gen_bool(self.nastiness.corrupt_probability()) {
            let mut corrupted = datagram.to_vec();
            let bit = self.rng.gen_range(0..corrupted.len() * 8);
            corrupted[bit / 8] ^= 1 << (bit % 8);
            debug_log!(Net, 2, "nasty socket flipped bit {bit} of a datagram");
            return self.transmit(&corrupted);
        }
        self.transmit(datagram)?;
        if self.rng.gen_bool(self.nastiness.duplicate_probability()) {
            debug_log!(Net, 2, "nasty socket duplicated a datagram");
            self.transmit(datagram)?;
        }
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                if !self.connected {
                    self.peer = Some(from);
                }
                Ok(Some(len))
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
