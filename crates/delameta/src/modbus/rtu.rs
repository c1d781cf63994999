//! Modbus RTU: the codec over a serial port.

use std::sync::Arc;

use crate::error::Result;
use crate::modbus;
use crate::serial;

#[derive(Debug, Clone, Default)]
pub struct Args {
    pub serial: serial::Args,
    pub server_address: u8,
}

/// RTU client: a [`modbus::Client`](crate::modbus::Client) over a freshly
/// opened serial port.
pub fn client(args: Args) -> Result<modbus::Client> {
    let serial = serial::Serial::open(args.serial)?;
    let session = crate::session::SessionClient::from(crate::descriptor::Descriptor::Serial(serial));
    Ok(modbus::Client::new(args.server_address, session))
}

/// RTU server: a serial session server with a bound register table.
pub struct Server {
    pub modbus: Arc<modbus::Server>,
    transport: serial::Server,
}

impl Server {
    pub fn new(args: Args, registers: modbus::Server) -> Server {
        let mut transport = serial::Server::new(args.serial);
        let mut registers = registers;
        registers.address = args.server_address;
        let modbus = Arc::new(registers);
        modbus.bind(&mut transport, false);
        Server { modbus, transport }
    }

    pub fn start(&self) -> Result<()> {
        self.transport.start()
    }

    pub fn stop(&self) {
        self.transport.stop();
    }
}
