use crate::modbus::{self, Error, Result};
use crate::session::SessionClient;
use crate::stream::Stream;

/// Modbus client issuing typed PDUs over a session client. Each call builds
/// the request, CRC-appends it, sends one frame, re-validates the reply's
/// CRC, address and function code, then decodes.
pub struct Client {
    pub server_address: u8,
    pub session: SessionClient,
    /// Some devices reply with a 16-bit big-endian byte-count field instead
    /// of the standard single byte.
    pub response_length_size_is_16bits: bool,
}

impl Client {
    pub fn new(server_address: u8, session: SessionClient) -> Self {
        Self { server_address, session, response_length_size_is_16bits: false }
    }

    /// Send a CRC-complete request frame and validate the reply envelope.
    pub fn request(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        if !modbus::is_valid(&data) {
            return Err(Error::InvalidCrc);
        }
        let address = data[0];
        let code = data[1];

        let res = self.session.request(Stream::from(data))?;

        if !modbus::is_valid(&res) {
            return Err(Error::InvalidCrc);
        }
        if res[0] != address {
            return Err(Error::InvalidAddress);
        }
        if res[1] != code {
            // covers exception replies, which echo the code with the top bit set
            return Err(Error::UnknownFunctionCode);
        }
        Ok(res)
    }

    /// Decode a read reply: `[addr, fc, byteCount, payload..., crc]`.
    /// Returns the payload. `expected_length` is the byte count implied by
    /// the requested quantity.
    fn read_payload(&self, res: &[u8], expected_length: usize) -> Result<Vec<u8>> {
        if res.len() < 6 {
            return Err(Error::InvalidDataFrame);
        }

        let (length, payload_at) = if self.response_length_size_is_16bits {
            (((res[2] as usize) << 8 | res[3] as usize), 4)
        } else {
            (res[2] as usize, 3)
        };

        if res.len() != payload_at + length + 2 || length != expected_length {
            return Err(Error::InvalidDataFrame);
        }
        Ok(res[payload_at..payload_at + length].to_vec())
    }

    fn read_request(&self, code: u8, register_address: u16, n_register: u16) -> Result<Vec<u8>> {
        let req = modbus::add_checksum(vec![
            self.server_address,
            code,
            (register_address >> 8) as u8,
            (register_address & 0xff) as u8,
            (n_register >> 8) as u8,
            (n_register & 0xff) as u8,
        ]);
        self.request(req)
    }

    fn read_bits(&self, code: u8, register_address: u16, n_register: u16) -> Result<Vec<bool>> {
        let res = self.read_request(code, register_address, n_register)?;
        let payload =
            self.read_payload(&res, modbus::bytes_length_bits(n_register) as usize)?;

        let mut out = Vec::with_capacity(n_register as usize);
        for i in 0..n_register as usize {
            out.push(payload[i / 8] & (1 << (i % 8)) != 0);
        }
        Ok(out)
    }

    fn read_words(&self, code: u8, register_address: u16, n_register: u16) -> Result<Vec<u16>> {
        let res = self.read_request(code, register_address, n_register)?;
        let payload =
            self.read_payload(&res, modbus::bytes_length_words(n_register) as usize)?;

        Ok(payload
            .chunks_exact(2)
            .map(|pair| (pair[0] as u16) << 8 | pair[1] as u16)
            .collect())
    }

    pub fn read_coils(&self, register_address: u16, n_register: u16) -> Result<Vec<bool>> {
        self.read_bits(modbus::FUNCTION_CODE_READ_COILS, register_address, n_register)
    }

    pub fn read_discrete_inputs(&self, register_address: u16, n_register: u16) -> Result<Vec<bool>> {
        self.read_bits(modbus::FUNCTION_CODE_READ_DISCRETE_INPUTS, register_address, n_register)
    }

    pub fn read_holding_registers(&self, register_address: u16, n_register: u16) -> Result<Vec<u16>> {
        self.read_words(modbus::FUNCTION_CODE_READ_HOLDING_REGISTERS, register_address, n_register)
    }

    pub fn read_input_registers(&self, register_address: u16, n_register: u16) -> Result<Vec<u16>> {
        self.read_words(modbus::FUNCTION_CODE_READ_INPUT_REGISTERS, register_address, n_register)
    }

    fn write_single(&self, code: u8, register_address: u16, value: u16) -> Result<()> {
        let req = modbus::add_checksum(vec![
            self.server_address,
            code,
            (register_address >> 8) as u8,
            (register_address & 0xff) as u8,
            (value >> 8) as u8,
            (value & 0xff) as u8,
        ]);
        let res = self.request(req)?;
        if res.len() != 8 {
            return Err(Error::InvalidDataFrame);
        }
        Ok(())
    }

    pub fn write_single_coil(&self, register_address: u16, value: bool) -> Result<()> {
        let wire = if value { 0xFF00 } else { 0x0000 };
        self.write_single(modbus::FUNCTION_CODE_WRITE_SINGLE_COIL, register_address, wire)
    }

    pub fn write_single_register(&self, register_address: u16, value: u16) -> Result<()> {
        self.write_single(modbus::FUNCTION_CODE_WRITE_SINGLE_REGISTER, register_address, value)
    }

    fn write_multiple(
        &self,
        code: u8,
        register_address: u16,
        quantity: u16,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut req = Vec::with_capacity(9 + payload.len());
        req.push(self.server_address);
        req.push(code);
        req.push((register_address >> 8) as u8);
        req.push((register_address & 0xff) as u8);
        req.push((quantity >> 8) as u8);
        req.push((quantity & 0xff) as u8);
        req.push(payload.len() as u8);
        req.extend_from_slice(&payload);
        let req = modbus::add_checksum(req);

        let res = self.request(req)?;
        if res.len() != 8 {
            return Err(Error::InvalidDataFrame);
        }
        Ok(())
    }

    pub fn write_multiple_coils(&self, register_address: u16, values: &[bool]) -> Result<()> {
        let quantity = values.len() as u16;
        let mut payload = vec![0u8; modbus::bytes_length_bits(quantity) as usize];
        for (i, &value) in values.iter().enumerate() {
            payload[i / 8] |= (value as u8) << (i % 8);
        }
        self.write_multiple(
            modbus::FUNCTION_CODE_WRITE_MULTIPLE_COILS,
            register_address,
            quantity,
            payload,
        )
    }

    pub fn write_multiple_registers(&self, register_address: u16, values: &[u16]) -> Result<()> {
        let mut payload = Vec::with_capacity(values.len() * 2);
        for &value in values {
            payload.push((value >> 8) as u8);
            payload.push((value & 0xff) as u8);
        }
        self.write_multiple(
            modbus::FUNCTION_CODE_WRITE_MULTIPLE_REGISTERS,
            register_address,
            values.len() as u16,
            payload,
        )
    }

    pub fn read_exception_status(&self) -> Result<u8> {
        let req = modbus::add_checksum(vec![
            self.server_address,
            modbus::FUNCTION_CODE_READ_EXCEPTION_STATUS,
        ]);
        let res = self.request(req)?;
        if res.len() != 5 {
            return Err(Error::InvalidDataFrame);
        }
        Ok(res[2])
    }

    pub fn diagnostic(&self, sub_function: u16, input: u16) -> Result<u16> {
        let req = modbus::add_checksum(vec![
            self.server_address,
            modbus::FUNCTION_CODE_DIAGNOSTIC,
            (sub_function >> 8) as u8,
            (sub_function & 0xff) as u8,
            (input >> 8) as u8,
            (input & 0xff) as u8,
        ]);
        let res = self.request(req)?;
        if res.len() != 8 {
            return Err(Error::InvalidDataFrame);
        }
        Ok((res[4] as u16) << 8 | res[5] as u16)
    }
}
