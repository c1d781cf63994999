use std::collections::VecDeque;

use bytes::Bytes;

use crate::descriptor::SharedDescriptor;
use crate::error::Result;
use crate::MAX_HANDLE_SZ;

/// State handed to a rule on each pull. Setting `again` keeps the rule at
/// the head of the stream for the next pull instead of popping it.
#[derive(Debug, Default)]
pub struct Pull {
    pub again: bool,
}

/// A single producer in a [`Stream`]; yields one byte chunk per pull.
pub type Rule = Box<dyn FnMut(&mut Pull) -> Bytes + Send>;

/// Lazy ordered sequence of byte chunks.
///
/// Streams are single-consumer, forward-only and not restartable. Appending
/// one stream to another splices its rules onto the end and chains the
/// teardown callbacks; both run when the combined stream is dropped.
#[derive(Default)]
pub struct Stream {
    pub rules: VecDeque<Rule>,
    teardown: Vec<Box<dyn FnOnce() + Send>>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Append a chunk captured by value; the stream is self-contained.
    pub fn push(&mut self, data: impl Into<Bytes>) -> &mut Self {
        let mut data = Some(data.into());
        self.rules.push_back(Box::new(move |_| data.take().unwrap_or_default()));
        self
    }

    /// Append a producer rule.
    pub fn push_fn(&mut self, rule: impl FnMut(&mut Pull) -> Bytes + Send + 'static) -> &mut Self {
        self.rules.push_back(Box::new(rule));
        self
    }

    /// Append a rule that reads up to `n` bytes from a descriptor, one
    /// `MAX_HANDLE_SZ`-capped read per pull.
    pub fn push_reader(&mut self, desc: SharedDescriptor, n: usize) -> &mut Self {
        let mut remaining = n;
        self.push_fn(move |pull| {
            let step = remaining.min(MAX_HANDLE_SZ);
            match desc.read_until(step) {
                Ok(data) => {
                    remaining -= step;
                    pull.again = remaining > 0;
                    Bytes::from(data)
                }
                Err(_) => Bytes::new(),
            }
        })
    }

    /// Splice `other`'s rules onto the end, transferring its teardown.
    pub fn append(&mut self, mut other: Stream) -> &mut Self {
        self.rules.append(&mut other.rules);
        self.teardown.append(&mut other.teardown);
        self
    }

    /// Register a callback run when the stream is dropped.
    pub fn when_done(&mut self, f: impl FnOnce() + Send + 'static) -> &mut Self {
        self.teardown.push(Box::new(f));
        self
    }

    /// Pull one chunk from the head rule; the rule is popped unless it set
    /// `again`. Returns an empty chunk when the stream is exhausted.
    pub fn pull_once(&mut self) -> Bytes {
        let Some(front) = self.rules.front_mut() else {
            return Bytes::new();
        };
        let mut pull = Pull::default();
        let data = front(&mut pull);
        if !pull.again {
            self.rules.pop_front();
        }
        data
    }

    /// Drain every rule into `sink`, consuming each exactly once unless it
    /// signals `again`.
    pub fn drain(&mut self, mut sink: impl FnMut(&[u8])) {
        while !self.rules.is_empty() {
            let data = self.pull_once();
            sink(&data);
        }
    }

    /// Drain the stream into a descriptor, stopping at the first write
    /// error.
    pub fn write_to(&mut self, desc: &SharedDescriptor) -> Result<()> {
        while !self.rules.is_empty() {
            let data = self.pull_once();
            desc.write(&data)?;
        }
        Ok(())
    }

    /// Collect the remaining chunks into one buffer.
    pub fn collect(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.drain(|chunk| out.extend_from_slice(chunk));
        out
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        for f in self.teardown.drain(..) {
            f();
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("rules", &self.rules.len())
            .field("teardown", &self.teardown.len())
            .finish()
    }
}

macro_rules! impl_from_bytes_like {
    ($($t:ty),*) => {$(
        impl From<$t> for Stream {
            fn from(data: $t) -> Self {
                let mut s = Stream::new();
                s.push(data);
                s
            }
        }
    )*};
}

impl_from_bytes_like!(&'static str, String, Vec<u8>, Bytes);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn again_keeps_rule_at_head() {
        static INPUT: &str = "Some multiple lines\nOf data\n";

        let mut s = Stream::new();
        let mut pos = 0;
        s.push_fn(move |pull| {
            let chunk = &INPUT[pos..pos + 1];
            pos += 1;
            pull.again = chunk != "\n";
            Bytes::from(chunk)
        });

        let mut out = String::new();
        // One rule, pulled until it stops asking again.
        while !s.is_empty() {
            out.push_str(std::str::from_utf8(&s.pull_once()).unwrap());
        }
        assert_eq!(out, "Some multiple lines\n");
    }

    #[test]
    fn drain_consumes_each_rule_once() {
        let mut s = Stream::new();
        s.push("a").push("b").push("c");
        let mut out = Vec::new();
        s.drain(|chunk| out.extend_from_slice(chunk));
        assert_eq!(out, b"abc");
        assert!(s.is_empty());
    }

    #[test]
    fn append_transfers_rules_and_teardown() {
        let count = Arc::new(AtomicUsize::new(0));

        let mut a = Stream::new();
        a.push("left-");
        {
            let count = count.clone();
            a.when_done(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut b = Stream::new();
        b.push("right");
        {
            let count = count.clone();
            b.when_done(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        a.append(b);
        assert_eq!(a.collect(), b"left-right");

        drop(a);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
