use std::collections::HashMap;
use std::sync::Arc;

use crate::modbus::{self, Error, Result};
use crate::session::SessionHost;
use crate::stream::Stream;

type BitGetter = Box<dyn Fn() -> bool + Send + Sync>;
type BitSetter = Box<dyn Fn(bool) + Send + Sync>;
type WordGetter = Box<dyn Fn() -> u16 + Send + Sync>;
type WordSetter = Box<dyn Fn(u16) + Send + Sync>;
type DiagnosticGetter = Box<dyn Fn(u16) -> Result<u16> + Send + Sync>;
type Logger = Arc<dyn Fn(&str, &[u8], &[u8]) + Send + Sync>;

/// Register-accessor tables dispatching inbound PDUs.
///
/// Accessors are registered per 16-bit address before the server binds; a
/// read walks the requested range in ascending order and fails with
/// `UnknownRegister` at the first address without an accessor.
#[derive(Default)]
pub struct Server {
    pub address: u8,
    coil_getters: HashMap<u16, BitGetter>,
    coil_setters: HashMap<u16, BitSetter>,
    holding_register_getters: HashMap<u16, WordGetter>,
    holding_register_setters: HashMap<u16, WordSetter>,
    discrete_input_getters: HashMap<u16, BitGetter>,
    analog_input_getters: HashMap<u16, WordGetter>,
    exception_status_getter: Option<Box<dyn Fn() -> u8 + Send + Sync>>,
    diagnostic_getters: HashMap<u16, DiagnosticGetter>,
    pub logger: Option<Logger>,
}

impl Server {
    pub fn new(address: u8) -> Self {
        Self { address, ..Default::default() }
    }

    pub fn coil_getter(&mut self, address: u16, getter: impl Fn() -> bool + Send + Sync + 'static) {
        self.coil_getters.insert(address, Box::new(getter));
    }

    pub fn coil_setter(&mut self, address: u16, setter: impl Fn(bool) + Send + Sync + 'static) {
        self.coil_setters.insert(address, Box::new(setter));
    }

    pub fn holding_register_getter(
        &mut self,
        address: u16,
        getter: impl Fn() -> u16 + Send + Sync + 'static,
    ) {
        self.holding_register_getters.insert(address, Box::new(getter));
    }

    pub fn holding_register_setter(
        &mut self,
        address: u16,
        setter: impl Fn(u16) + Send + Sync + 'static,
    ) {
        self.holding_register_setters.insert(address, Box::new(setter));
    }

    pub fn discrete_input_getter(
        &mut self,
        address: u16,
        getter: impl Fn() -> bool + Send + Sync + 'static,
    ) {
        self.discrete_input_getters.insert(address, Box::new(getter));
    }

    pub fn analog_input_getter(
        &mut self,
        address: u16,
        getter: impl Fn() -> u16 + Send + Sync + 'static,
    ) {
        self.analog_input_getters.insert(address, Box::new(getter));
    }

    pub fn exception_status_getter(&mut self, getter: impl Fn() -> u8 + Send + Sync + 'static) {
        self.exception_status_getter = Some(Box::new(getter));
    }

    pub fn diagnostic_getter(
        &mut self,
        sub_function: u16,
        getter: impl Fn(u16) -> Result<u16> + Send + Sync + 'static,
    ) {
        self.diagnostic_getters.insert(sub_function, Box::new(getter));
    }

    /// Validate the CRC and address, dispatch on the function code, and
    /// CRC-append the reply. With `accept_all_address` the address check is
    /// skipped (the transport already implies the target, e.g. Modbus TCP).
    pub fn execute(&self, data: &[u8], accept_all_address: bool) -> Result<Vec<u8>> {
        if !modbus::is_valid(data) {
            return Err(Error::InvalidCrc);
        }

        let address = data[0];
        let function_code = data[1];
        if !accept_all_address && address != self.address {
            return Err(Error::InvalidAddress);
        }

        let reply = match function_code {
            modbus::FUNCTION_CODE_READ_COILS => read_bits(data, &self.coil_getters),
            modbus::FUNCTION_CODE_READ_DISCRETE_INPUTS => {
                read_bits(data, &self.discrete_input_getters)
            }
            modbus::FUNCTION_CODE_READ_HOLDING_REGISTERS => {
                read_words(data, &self.holding_register_getters)
            }
            modbus::FUNCTION_CODE_READ_INPUT_REGISTERS => {
                read_words(data, &self.analog_input_getters)
            }
            modbus::FUNCTION_CODE_WRITE_SINGLE_COIL => {
                write_single_bit(data, &self.coil_setters)
            }
            modbus::FUNCTION_CODE_WRITE_SINGLE_REGISTER => {
                write_single_word(data, &self.holding_register_setters)
            }
            modbus::FUNCTION_CODE_READ_EXCEPTION_STATUS => self.read_exception_status(data),
            modbus::FUNCTION_CODE_DIAGNOSTIC => self.diagnostic(data),
            modbus::FUNCTION_CODE_WRITE_MULTIPLE_COILS => {
                write_multiple_bits(data, &self.coil_setters)
            }
            modbus::FUNCTION_CODE_WRITE_MULTIPLE_REGISTERS => {
                write_multiple_words(data, &self.holding_register_setters)
            }
            _ => Err(Error::UnknownFunctionCode),
        }?;

        Ok(modbus::add_checksum(reply))
    }

    fn read_exception_status(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() != 4 {
            return Err(Error::InvalidDataFrame);
        }
        let getter = self
            .exception_status_getter
            .as_ref()
            .ok_or(Error::ExceptionStatusIsNotDefined)?;
        Ok(vec![data[0], data[1], getter()])
    }

    fn diagnostic(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() != 8 {
            return Err(Error::InvalidDataFrame);
        }
        let sub_function = (data[2] as u16) << 8 | data[3] as u16;
        let input = (data[4] as u16) << 8 | data[5] as u16;

        let getter = self
            .diagnostic_getters
            .get(&sub_function)
            .ok_or(Error::UnknownSubfunction)?;
        let output = getter(input)?;

        Ok(vec![
            data[0],
            data[1],
            data[2],
            data[3],
            (output >> 8) as u8,
            (output & 0xff) as u8,
        ])
    }

    /// Install a framing handler that replies with `execute`'s output and,
    /// per bus convention, sends nothing on error (the peer times out).
    pub fn bind(self: &Arc<Self>, host: &mut impl SessionHost, accept_all_address: bool) {
        let server = self.clone();
        host.set_session_handler(Arc::new(move |_desc, name, data| {
            match server.execute(data, accept_all_address) {
                Ok(reply) => {
                    if let Some(logger) = &server.logger {
                        logger(name, data, &reply);
                    }
                    Stream::from(reply)
                }
                Err(e) => {
                    tracing::warn!(peer = name, error = %e, "modbus request rejected");
                    Stream::new()
                }
            }
        }));
    }
}

fn request_range<T>(data: &[u8], accessors: &HashMap<u16, T>) -> Result<(u16, u16)> {
    if data.len() != 8 {
        return Err(Error::InvalidDataFrame);
    }
    let start = (data[2] as u16) << 8 | data[3] as u16;
    let quantity = (data[4] as u16) << 8 | data[5] as u16;
    if quantity == 0 {
        return Err(Error::InvalidDataFrame);
    }
    if accessors.is_empty() || quantity as usize > accessors.len() {
        return Err(Error::UnknownRegister);
    }
    Ok((start, quantity))
}

fn read_bits(data: &[u8], getters: &HashMap<u16, BitGetter>) -> Result<Vec<u8>> {
    let (start, quantity) = request_range(data, getters)?;
    let length = modbus::bytes_length_bits(quantity);

    let mut res = vec![data[0], data[1], length];
    res.resize(3 + length as usize, 0);

    let mut index = 3;
    let mut bit = 0;
    for reg in start..start + quantity {
        let getter = getters.get(&reg).ok_or(Error::UnknownRegister)?;
        res[index] |= (getter() as u8) << bit;
        bit += 1;
        if bit == 8 {
            bit = 0;
            index += 1;
        }
    }
    Ok(res)
}

fn read_words(data: &[u8], getters: &HashMap<u16, WordGetter>) -> Result<Vec<u8>> {
    let (start, quantity) = request_range(data, getters)?;
    let length = modbus::bytes_length_words(quantity);

    let mut res = vec![data[0], data[1], length];
    for reg in start..start + quantity {
        let getter = getters.get(&reg).ok_or(Error::UnknownRegister)?;
        let value = getter();
        res.push((value >> 8) as u8);
        res.push((value & 0xff) as u8);
    }
    Ok(res)
}

fn write_single_bit(data: &[u8], setters: &HashMap<u16, BitSetter>) -> Result<Vec<u8>> {
    if data.len() != 8 {
        return Err(Error::InvalidDataFrame);
    }
    let register = (data[2] as u16) << 8 | data[3] as u16;
    let value = (data[4] as u16) << 8 | data[5] as u16;

    let setter = setters.get(&register).ok_or(Error::UnknownRegister)?;
    match value {
        0xFF00 => setter(true),
        0x0000 => setter(false),
        _ => return Err(Error::InvalidDataFrame),
    }

    Ok(data[..6].to_vec())
}

fn write_single_word(data: &[u8], setters: &HashMap<u16, WordSetter>) -> Result<Vec<u8>> {
    if data.len() != 8 {
        return Err(Error::InvalidDataFrame);
    }
    let register = (data[2] as u16) << 8 | data[3] as u16;
    let value = (data[4] as u16) << 8 | data[5] as u16;

    let setter = setters.get(&register).ok_or(Error::UnknownRegister)?;
    setter(value);

    Ok(data[..6].to_vec())
}

fn write_multiple_range<T>(data: &[u8], setters: &HashMap<u16, T>) -> Result<(u16, u16)> {
    if data.len() <= 9 || data.len() != 9 + data[6] as usize {
        return Err(Error::InvalidDataFrame);
    }
    let start = (data[2] as u16) << 8 | data[3] as u16;
    let quantity = (data[4] as u16) << 8 | data[5] as u16;
    if quantity == 0 {
        return Err(Error::InvalidDataFrame);
    }
    if setters.is_empty() || quantity as usize > setters.len() {
        return Err(Error::UnknownRegister);
    }
    Ok((start, quantity))
}

fn write_multiple_bits(data: &[u8], setters: &HashMap<u16, BitSetter>) -> Result<Vec<u8>> {
    let (start, quantity) = write_multiple_range(data, setters)?;
    if modbus::bytes_length_bits(quantity) != data[6] {
        return Err(Error::InvalidDataFrame);
    }

    let mut index = 7;
    let mut bit = 0;
    for reg in start..start + quantity {
        let setter = setters.get(&reg).ok_or(Error::UnknownRegister)?;
        setter(data[index] & (1 << bit) != 0);
        bit += 1;
        if bit == 8 {
            bit = 0;
            index += 1;
        }
    }

    Ok(data[..6].to_vec())
}

fn write_multiple_words(data: &[u8], setters: &HashMap<u16, WordSetter>) -> Result<Vec<u8>> {
    let (start, quantity) = write_multiple_range(data, setters)?;
    if modbus::bytes_length_words(quantity) != data[6] {
        return Err(Error::InvalidDataFrame);
    }

    let mut index = 7;
    for reg in start..start + quantity {
        let setter = setters.get(&reg).ok_or(Error::UnknownRegister)?;
        setter((data[index] as u16) << 8 | data[index + 1] as u16);
        index += 2;
    }

    Ok(data[..6].to_vec())
}
