use std::io::{BufRead, Read, Write};

use crate::error::{Error, Result};

/// Line-buffered stdin/stdout endpoint: `read` yields one line (without the
/// trailing newline), `write` emits verbatim. No timeout applies.
#[derive(Debug, Default)]
pub struct Stdio;

impl Stdio {
    pub fn new() -> Self {
        Stdio
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        let mut line = String::new();
        let n = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(Error::from)?;
        if n == 0 {
            return Err(Error::connection_closed());
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line.into_bytes())
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; n];
        std::io::stdin().lock().read_exact(&mut data).map_err(Error::from)?;
        Ok(data)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(data).map_err(Error::from)?;
        out.flush().map_err(Error::from)
    }
}
