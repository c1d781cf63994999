//! `Transfer-Encoding: chunked` as stream transforms.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::descriptor::SharedDescriptor;
use crate::error::Result;
use crate::stream::Stream;

/// Wrap a stream so each pull emits `HEXLEN CRLF chunk CRLF`; an exhausted
/// source yields the `0\r\n\r\n` terminator and ends the stream.
pub fn encode(mut input: Stream) -> Stream {
    let mut s = Stream::new();
    s.push_fn(move |pull| {
        let data = input.pull_once();
        let mut buffer = Vec::with_capacity(data.len() + 10);
        buffer.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
        buffer.extend_from_slice(&data);
        buffer.extend_from_slice(b"\r\n");
        pull.again = !data.is_empty();
        Bytes::from(buffer)
    });
    s
}

/// Decode chunked data: already-buffered bytes first, then demand-reads
/// from the descriptor. Ends after the zero-length chunk.
pub fn decode(desc: SharedDescriptor, initial: Bytes) -> Stream {
    let mut reader = ChunkedReader { desc, buffered: initial.to_vec().into() };
    let mut s = Stream::new();
    s.push_fn(move |pull| match reader.next_chunk() {
        Ok(data) => {
            pull.again = !data.is_empty();
            data
        }
        Err(_) => Bytes::new(),
    });
    s
}

struct ChunkedReader {
    desc: SharedDescriptor,
    buffered: VecDeque<u8>,
}

impl ChunkedReader {
    fn next_byte(&mut self) -> Result<u8> {
        if let Some(b) = self.buffered.pop_front() {
            return Ok(b);
        }
        let data = self.desc.read_until(1)?;
        Ok(data[0])
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        loop {
            let b = self.next_byte()?;
            if b == b'\n' {
                break;
            }
            line.push(b as char);
        }
        if line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.buffered.pop_front() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        if out.len() < n {
            out.extend(self.desc.read_until(n - out.len())?);
        }
        Ok(out)
    }

    fn next_chunk(&mut self) -> Result<Bytes> {
        let line = self.read_line()?;
        let size = usize::from_str_radix(line.trim(), 16).unwrap_or(0);
        if size == 0 {
            // consume the blank line terminating the trailer section so a
            // keep-alive peer starts its next frame clean
            let _ = self.read_line();
            return Ok(Bytes::new());
        }
        let data = self.read_exact(size)?;
        let _ = self.read_line()?;
        Ok(Bytes::from(data))
    }
}
