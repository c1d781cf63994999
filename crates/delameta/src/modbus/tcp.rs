//! Modbus over TCP.
//!
//! Deliberate deviation from standard Modbus TCP: the CRC-framed RTU PDU is
//! carried as-is over the byte stream instead of an MBAP-framed PDU. Peers
//! built with this module interoperate with each other and with RTU
//! gateways that forward raw frames.

use std::sync::Arc;

use crate::error::Result;
use crate::modbus;
use crate::tcp;

/// Wildcard unit address used on TCP, where the connection already
/// identifies the target.
pub const TCP_UNIT_ADDRESS: u8 = 0xFF;

/// TCP client: a [`modbus::Client`](crate::modbus::Client) addressed to the
/// wildcard unit.
pub fn client(args: tcp::ClientArgs) -> Result<modbus::Client> {
    let session = tcp::Client::new(args)?;
    Ok(modbus::Client::new(TCP_UNIT_ADDRESS, session))
}

/// TCP server: a TCP session server with a bound register table accepting
/// any unit address.
pub struct Server {
    pub modbus: Arc<modbus::Server>,
    transport: tcp::Server,
}

impl Server {
    pub fn new(args: tcp::ServerArgs, registers: modbus::Server) -> Result<Server> {
        let mut transport = tcp::Server::new(args)?;
        let modbus = Arc::new(registers);
        modbus.bind(&mut transport, true);
        Ok(Server { modbus, transport })
    }

    pub fn local_port(&self) -> Result<u16> {
        self.transport.local_port()
    }

    pub fn start(&self) -> Result<()> {
        self.transport.start()
    }

    pub fn stop(&self) {
        self.transport.stop();
    }
}
