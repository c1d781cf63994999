use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use delameta::modbus::{self, Server};

fn server_with_coils() -> (Server, Arc<[AtomicBool; 4]>) {
    let coils: Arc<[AtomicBool; 4]> = Arc::new([
        AtomicBool::new(true),
        AtomicBool::new(false),
        AtomicBool::new(false),
        AtomicBool::new(false),
    ]);

    let mut server = Server::new(0x0F);
    for i in 0..4u16 {
        let read = coils.clone();
        server.coil_getter(0x1001 + i, move || read[i as usize].load(Ordering::SeqCst));
        let write = coils.clone();
        server.coil_setter(0x1001 + i, move |value| {
            write[i as usize].store(value, Ordering::SeqCst)
        });
    }
    (server, coils)
}

#[test]
fn write_single_coil_echoes_request() {
    let (server, coils) = server_with_coils();

    let req = modbus::add_checksum(vec![0x0F, 0x05, 0x10, 0x03, 0xFF, 0x00]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, req);
    assert!(coils[2].load(Ordering::SeqCst));

    let req = modbus::add_checksum(vec![0x0F, 0x05, 0x10, 0x03, 0x00, 0x00]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, req);
    assert!(!coils[2].load(Ordering::SeqCst));
}

#[test]
fn write_single_coil_rejects_odd_values() {
    let (server, _) = server_with_coils();

    let req = modbus::add_checksum(vec![0x0F, 0x05, 0x10, 0x03, 0x00, 0x01]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::InvalidDataFrame));
}

#[test]
fn read_coils_packs_bits_low_to_high() {
    let (server, coils) = server_with_coils();
    coils[2].store(true, Ordering::SeqCst); // coils now 1,0,1,0

    let req = modbus::add_checksum(vec![0x0F, 0x01, 0x10, 0x01, 0x00, 0x04]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res.len(), 6);
    assert_eq!(res[0], 0x0F);
    assert_eq!(res[1], 0x01);
    assert_eq!(res[2], 0x01); // byte count = ceil(4/8)
    assert_eq!(res[3], 0b0101);
    assert!(modbus::is_valid(&res));
}

#[test]
fn read_holding_registers_reply_bytes() {
    let values = [0xAAAAu16, 0xBBBB, 0xCCCC, 0xDDDD];
    let mut server = Server::new(0x0F);
    for (i, value) in values.into_iter().enumerate() {
        server.holding_register_getter(0x2001 + i as u16, move || value);
    }

    let req = modbus::add_checksum(vec![0x0F, 0x03, 0x20, 0x01, 0x00, 0x04]);
    let res = server.execute(&req, false).unwrap();
    let expected = modbus::add_checksum(vec![
        0x0F, 0x03, 0x08, 0xAA, 0xAA, 0xBB, 0xBB, 0xCC, 0xCC, 0xDD, 0xDD,
    ]);
    assert_eq!(res, expected);
}

#[test]
fn read_unknown_register_fails() {
    let mut server = Server::new(0x0F);
    server.holding_register_getter(0x2001, || 1);
    server.holding_register_getter(0x2003, || 3);

    // hole at 0x2002 within a 2-register walk
    let req = modbus::add_checksum(vec![0x0F, 0x03, 0x20, 0x01, 0x00, 0x02]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::UnknownRegister));

    // quantity beyond the registered accessor count
    let req = modbus::add_checksum(vec![0x0F, 0x03, 0x20, 0x01, 0x00, 0x09]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::UnknownRegister));
}

#[test]
fn write_multiple_registers_walks_ascending() {
    let seen = Arc::new([AtomicU16::new(0), AtomicU16::new(0), AtomicU16::new(0)]);
    let mut server = Server::new(0x0F);
    for i in 0..3u16 {
        let seen = seen.clone();
        server.holding_register_setter(0x0100 + i, move |value| {
            seen[i as usize].store(value, Ordering::SeqCst)
        });
    }

    let req = modbus::add_checksum(vec![
        0x0F, 0x10, 0x01, 0x00, 0x00, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C,
    ]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, modbus::add_checksum(vec![0x0F, 0x10, 0x01, 0x00, 0x00, 0x03]));
    assert_eq!(seen[0].load(Ordering::SeqCst), 0x0A);
    assert_eq!(seen[1].load(Ordering::SeqCst), 0x0B);
    assert_eq!(seen[2].load(Ordering::SeqCst), 0x0C);

    // byte count mismatching the quantity
    let req = modbus::add_checksum(vec![
        0x0F, 0x10, 0x01, 0x00, 0x00, 0x03, 0x05, 0x00, 0x0A, 0x00, 0x0B, 0x00,
    ]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::InvalidDataFrame));
}

#[test]
fn write_multiple_coils() {
    let (server, coils) = server_with_coils();

    // set 1,1,0,1 over four coils: one data byte 0b1011
    let req = modbus::add_checksum(vec![0x0F, 0x0F, 0x10, 0x01, 0x00, 0x04, 0x01, 0b1011]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, modbus::add_checksum(vec![0x0F, 0x0F, 0x10, 0x01, 0x00, 0x04]));
    assert!(coils[0].load(Ordering::SeqCst));
    assert!(coils[1].load(Ordering::SeqCst));
    assert!(!coils[2].load(Ordering::SeqCst));
    assert!(coils[3].load(Ordering::SeqCst));
}

#[test]
fn exception_status() {
    let mut server = Server::new(0x0F);

    let req = modbus::add_checksum(vec![0x0F, 0x07]);
    assert_eq!(
        server.execute(&req, false),
        Err(modbus::Error::ExceptionStatusIsNotDefined)
    );

    server.exception_status_getter(|| 0x5A);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, modbus::add_checksum(vec![0x0F, 0x07, 0x5A]));
}

#[test]
fn diagnostic_dispatches_sub_function() {
    let mut server = Server::new(0x0F);
    server.diagnostic_getter(0x0000, |input| Ok(input)); // loopback sub-function

    let req = modbus::add_checksum(vec![0x0F, 0x08, 0x00, 0x00, 0x12, 0x34]);
    let res = server.execute(&req, false).unwrap();
    assert_eq!(res, modbus::add_checksum(vec![0x0F, 0x08, 0x00, 0x00, 0x12, 0x34]));

    let req = modbus::add_checksum(vec![0x0F, 0x08, 0x00, 0x07, 0x00, 0x00]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::UnknownSubfunction));
}

#[test]
fn address_and_crc_validation() {
    let (server, _) = server_with_coils();

    // wrong target address
    let req = modbus::add_checksum(vec![0x10, 0x01, 0x10, 0x01, 0x00, 0x01]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::InvalidAddress));
    // same frame accepted in accept-all mode
    assert!(server.execute(&req, true).is_ok());

    // corrupted CRC
    let mut req = modbus::add_checksum(vec![0x0F, 0x01, 0x10, 0x01, 0x00, 0x01]);
    let last = req.len() - 1;
    req[last] ^= 0xFF;
    assert_eq!(server.execute(&req, false), Err(modbus::Error::InvalidCrc));
}

#[test]
fn unknown_function_code() {
    let (server, _) = server_with_coils();
    let req = modbus::add_checksum(vec![0x0F, 0x2A, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(server.execute(&req, false), Err(modbus::Error::UnknownFunctionCode));
}
