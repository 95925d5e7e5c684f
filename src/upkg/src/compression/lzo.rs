//! LZO1X block codec
//!
//! The decoder is a bounds-checked port of the reference `decompress_safe`
//! state machine: every literal run and back-reference is validated against
//! both the input and the expected output size, and an overrun is reported
//! as a corrupt block instead of reading out of range.
//!
//! The encoder only emits literal runs. Its output is valid LZO1X that any
//! decoder accepts; it exists for fixtures and round trips.

use crate::{Error, Result};

const M2_MAX_OFFSET: usize = 0x0800;
const M4_BASE_OFFSET: usize = 0x4000;

#[derive(Debug, Clone, Copy)]
enum State {
    Outer,
    FirstLiteralRun,
    Match(usize),
    MatchDone,
    MatchNext(usize),
}

struct Decoder<'a> {
    src: &'a [u8],
    ip: usize,
    out: Vec<u8>,
    limit: usize,
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptBlock {
        method: "lzo",
        message: message.into(),
    }
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8> {
        self.src
            .get(self.ip)
            .copied()
            .ok_or_else(|| corrupt("input overrun"))
    }

    fn byte(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.ip += 1;
        Ok(b)
    }

    /// Length continued over zero bytes: each zero adds 255.
    fn extended(&mut self, base: usize) -> Result<usize> {
        let mut t = 0usize;
        while self.peek()? == 0 {
            t += 255;
            self.ip += 1;
        }
        Ok(t + base + self.byte()? as usize)
    }

    fn literals(&mut self, count: usize) -> Result<()> {
        let end = self.ip + count;
        if end > self.src.len() {
            return Err(corrupt("input overrun"));
        }
        if self.out.len() + count > self.limit {
            return Err(corrupt("output overrun"));
        }
        self.out.extend_from_slice(&self.src[self.ip..end]);
        self.ip = end;
        Ok(())
    }

    fn copy_match(&mut self, distance: usize, count: usize) -> Result<()> {
        if distance == 0 || distance > self.out.len() {
            return Err(corrupt("lookbehind overrun"));
        }
        if self.out.len() + count > self.limit {
            return Err(corrupt("output overrun"));
        }
        let start = self.out.len() - distance;
        for i in 0..count {
            let b = self.out[start + i];
            self.out.push(b);
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>> {
        if self.ip != self.src.len() {
            return Err(corrupt(format!(
                "input not consumed: {} of {} bytes",
                self.ip,
                self.src.len()
            )));
        }
        Ok(self.out)
    }
}

/// Decode one LZO1X block of at most `dst_len` bytes.
pub fn decompress(src: &[u8], dst_len: usize) -> Result<Vec<u8>> {
    let mut d = Decoder {
        src,
        ip: 0,
        out: Vec::with_capacity(dst_len),
        limit: dst_len,
    };

    let mut state = State::Outer;
    if d.peek()? > 17 {
        let t = (d.byte()? - 17) as usize;
        if t < 4 {
            state = State::MatchNext(t);
        } else {
            d.literals(t)?;
            state = State::FirstLiteralRun;
        }
    }

    loop {
        state = match state {
            State::Outer => {
                let t = d.byte()? as usize;
                if t >= 16 {
                    State::Match(t)
                } else {
                    let t = if t == 0 { d.extended(15)? } else { t };
                    d.literals(t + 3)?;
                    State::FirstLiteralRun
                }
            }
            State::FirstLiteralRun => {
                let t = d.byte()? as usize;
                if t >= 16 {
                    State::Match(t)
                } else {
                    let b = d.byte()? as usize;
                    d.copy_match(1 + M2_MAX_OFFSET + (t >> 2) + (b << 2), 3)?;
                    State::MatchDone
                }
            }
            State::Match(t) => {
                if t >= 64 {
                    let b = d.byte()? as usize;
                    d.copy_match(1 + ((t >> 2) & 7) + (b << 3), (t >> 5) + 1)?;
                } else if t >= 32 {
                    let len = if t & 31 == 0 { d.extended(31)? } else { t & 31 };
                    let b0 = d.byte()? as usize;
                    let b1 = d.byte()? as usize;
                    d.copy_match(1 + (b0 >> 2) + (b1 << 6), len + 2)?;
                } else if t >= 16 {
                    let high = (t & 8) << 11;
                    let len = if t & 7 == 0 { d.extended(7)? } else { t & 7 };
                    let b0 = d.byte()? as usize;
                    let b1 = d.byte()? as usize;
                    let distance = high + (b0 >> 2) + (b1 << 6);
                    if distance == 0 {
                        return d.finish();
                    }
                    d.copy_match(distance + M4_BASE_OFFSET, len + 2)?;
                } else {
                    let b = d.byte()? as usize;
                    d.copy_match(1 + (t >> 2) + (b << 2), 2)?;
                }
                State::MatchDone
            }
            State::MatchDone => {
                let marker = d
                    .ip
                    .checked_sub(2)
                    .and_then(|i| d.src.get(i))
                    .ok_or_else(|| corrupt("input underrun"))?;
                match (marker & 3) as usize {
                    0 => State::Outer,
                    t => State::MatchNext(t),
                }
            }
            State::MatchNext(t) => {
                d.literals(t)?;
                State::Match(d.byte()? as usize)
            }
        };
    }
}

/// Encode `data` as a single literal run followed by the end marker.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 255 + 8);
    let n = data.len();
    if n == 0 {
        // nothing to emit
    } else if n <= 238 {
        out.push((17 + n) as u8);
    } else {
        out.push(0);
        let mut tt = n - 18;
        while tt > 255 {
            tt -= 255;
            out.push(0);
        }
        out.push(tt as u8);
    }
    out.extend_from_slice(data);
    out.extend_from_slice(&[0x11, 0, 0]);
    out
}
