use std::ffi::CString;
use std::mem;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::descriptor::{Descriptor, SharedDescriptor};
use crate::error::{Error, Result};
use crate::session::SessionHandler;
use crate::syscalls;

#[derive(Debug, Clone)]
pub struct Args {
    /// Device path, or `auto` to scan for the first `ttyACM*`/`ttyUSB*`.
    pub port: String,
    pub baud: u32,
    /// Seconds per read; negative = wait forever.
    pub timeout: i32,
}

impl Default for Args {
    fn default() -> Self {
        Self { port: "auto".to_string(), baud: 9600, timeout: 5 }
    }
}

/// A serial tty configured for raw 8N1 I/O.
#[derive(Debug)]
pub struct Serial {
    pub fd: c_int,
    pub timeout: i32,
}

#[cfg(target_os = "linux")]
fn speed_of(baud: u32) -> Result<libc::speed_t> {
    Ok(match baud {
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        500000 => libc::B500000,
        576000 => libc::B576000,
        921600 => libc::B921600,
        1000000 => libc::B1000000,
        1152000 => libc::B1152000,
        1500000 => libc::B1500000,
        2000000 => libc::B2000000,
        _ => return Err(Error::usage(format!("Cannot convert baudrate: {baud}"))),
    })
}

/// Pick the first `ttyACM*`/`ttyUSB*` device under `/dev`.
#[cfg(target_os = "linux")]
fn scan_auto_port() -> Result<String> {
    for entry in std::fs::read_dir("/dev").map_err(Error::from)? {
        let entry = entry.map_err(Error::from)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("ttyACM") || name.starts_with("ttyUSB") {
            return Ok(format!("/dev/{name}"));
        }
    }
    Err(Error::usage("No serial port found"))
}

impl Serial {
    #[cfg(target_os = "linux")]
    pub fn open(mut args: Args) -> Result<Serial> {
        if args.port == "auto" {
            args.port = scan_auto_port()?;
        }

        let path = CString::new(args.port.as_str())
            .map_err(|_| Error::usage("Invalid serial port"))?;
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_SYNC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        let mut tty: libc::termios = unsafe { mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
            let err = Error::last_os_error();
            syscalls::close(fd);
            return Err(err);
        }

        let speed = match speed_of(args.baud) {
            Ok(s) => s,
            Err(e) => {
                syscalls::close(fd);
                return Err(e);
            }
        };
        unsafe {
            libc::cfsetispeed(&mut tty, speed);
            libc::cfsetospeed(&mut tty, speed);
        }

        // raw 8N1, no flow control, no echo or line discipline
        tty.c_cflag |= libc::CLOCAL | libc::CREAD;
        tty.c_cflag &= !libc::CSIZE;
        tty.c_cflag |= libc::CS8;
        tty.c_cflag &= !(libc::PARENB | libc::PARODD);
        tty.c_cflag &= !libc::CSTOPB;
        tty.c_cflag &= !libc::CRTSCTS;
        tty.c_iflag &=
            !(libc::IGNBRK | libc::IXOFF | libc::IXON | libc::IXANY | libc::INLCR | libc::ICRNL);
        tty.c_lflag = 0;
        tty.c_oflag &= !libc::OPOST;
        tty.c_cc[libc::VTIME] = 1;
        tty.c_cc[libc::VMIN] = 0;

        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
            let err = Error::last_os_error();
            syscalls::close(fd);
            return Err(err);
        }
        unsafe {
            libc::tcflush(fd, libc::TCIOFLUSH);
        }

        syscalls::set_non_blocking(fd)?;
        tracing::debug!(fd, port = %args.port, baud = args.baud, "opened serial port");
        Ok(Serial { fd, timeout: args.timeout })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_args: Args) -> Result<Serial> {
        Err(Error::usage("Serial ports are only supported on Linux"))
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        syscalls::fd_read_available(self.fd, self.timeout, None)
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        syscalls::fd_read_exact(self.fd, n, self.timeout, None)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        syscalls::fd_write_all(self.fd, data)
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        if self.fd >= 0 {
            tracing::debug!(fd = self.fd, "closed serial port");
            syscalls::close(self.fd);
            self.fd = -1;
        }
    }
}

/// Thin constructor for a request/reply client over a serial port.
pub struct Client;

impl Client {
    pub fn new(args: Args) -> Result<crate::session::SessionClient> {
        let serial = Serial::open(args)?;
        Ok(crate::session::SessionClient::from(Descriptor::Serial(serial)))
    }
}

/// Frame-at-a-time session server over one serial port. Frames are served
/// sequentially; the port itself serializes exchanges.
pub struct Server {
    pub handler: Option<SessionHandler>,
    args: Args,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(args: Args) -> Self {
        Self { handler: None, args, running: Arc::new(AtomicBool::new(false)) }
    }

    pub fn start(&self) -> Result<()> {
        let serial = Serial::open(self.args.clone())?;
        let port_name = self.args.port.clone();
        let desc = SharedDescriptor::new(Descriptor::Serial(serial));

        self.running.store(true, Ordering::Release);
        while self.running.load(Ordering::Acquire) {
            let frame = match desc.read() {
                Ok(frame) => frame,
                Err(e) if e.is_transfer_timeout() => continue,
                Err(e) => {
                    tracing::warn!(port = %port_name, error = %e, "serial read failed");
                    break;
                }
            };

            if let Some(handler) = &self.handler {
                let mut reply = handler(&desc, &port_name, &frame);
                if let Err(e) = reply.write_to(&desc) {
                    tracing::warn!(port = %port_name, error = %e, "serial write failed");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl crate::session::SessionHost for Server {
    fn set_session_handler(&mut self, handler: SessionHandler) {
        self.handler = Some(handler);
    }
}
