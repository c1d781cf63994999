use std::ffi::CString;
use std::os::raw::c_int;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::syscalls;
use crate::MAX_HANDLE_SZ;

#[derive(Debug, Clone, Default)]
pub struct Args {
    pub path: String,
    /// One of `r`, `w`, `wa`, `rw`, `rwa`. Empty means `r`.
    pub mode: String,
}

/// A plain file descriptor.
#[derive(Debug)]
pub struct File {
    pub fd: c_int,
}

fn oflag_of(mode: &str) -> Result<c_int> {
    match mode {
        "" | "r" => Ok(libc::O_RDONLY),
        "w" => Ok(libc::O_WRONLY | libc::O_TRUNC | libc::O_CREAT),
        "wa" => Ok(libc::O_WRONLY | libc::O_APPEND | libc::O_CREAT),
        "rw" => Ok(libc::O_RDWR | libc::O_TRUNC | libc::O_CREAT),
        "rwa" => Ok(libc::O_RDWR | libc::O_APPEND | libc::O_CREAT),
        other => Err(Error::usage(format!(
            "Invalid mode. expect `r`, `w`, `wa`, `rw` or `rwa`, given `{other}`"
        ))),
    }
}

impl File {
    pub fn open(args: Args) -> Result<File> {
        let oflag = oflag_of(&args.mode)?;
        let path = CString::new(args.path.as_str())
            .map_err(|_| Error::usage("Invalid file path"))?;

        let fd = if oflag & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            unsafe { libc::open(path.as_ptr(), oflag, 0o644 as c_int) }
        } else {
            unsafe { libc::open(path.as_ptr(), oflag) }
        };
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        tracing::debug!(fd, path = %args.path, "opened file");
        Ok(File { fd })
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        syscalls::fd_read_available(self.fd, -1, None)
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        syscalls::fd_read_exact(self.fd, n, -1, None)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        syscalls::fd_write_all(self.fd, data)
    }

    pub fn file_size(&self) -> Result<u64> {
        let cur = unsafe { libc::lseek(self.fd, 0, libc::SEEK_CUR) };
        if cur == -1 {
            return Err(Error::last_os_error());
        }
        let size = unsafe { libc::lseek(self.fd, 0, libc::SEEK_END) };
        if size == -1 {
            return Err(Error::last_os_error());
        }
        if unsafe { libc::lseek(self.fd, cur, libc::SEEK_SET) } == -1 {
            return Err(Error::last_os_error());
        }
        Ok(size as u64)
    }

    /// Consume the file into a stream yielding its remaining contents in
    /// `MAX_HANDLE_SZ` chunks; the fd closes when the stream is dropped.
    pub fn into_stream(mut self) -> Result<Stream> {
        let mut total = self.file_size()? as usize;
        let mut s = Stream::new();
        s.push_fn(move |pull| {
            if total == 0 {
                return Bytes::new();
            }
            let n = total.min(MAX_HANDLE_SZ);
            match self.read_until(n) {
                Ok(data) => {
                    total -= n;
                    pull.again = total > 0;
                    Bytes::from(data)
                }
                Err(_) => Bytes::new(),
            }
        });
        Ok(s)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.fd >= 0 {
            tracing::debug!(fd = self.fd, "closed file");
            syscalls::close(self.fd);
            self.fd = -1;
        }
    }
}
