//! Bit-level I/O with 0xFF bit-unstuffing.
//!
//! Tier headers and code-block segments are bit-packed. To keep marker-like
//! byte values out of the payload, a byte following an 0xFF carries only
//! seven bits, its most significant bit forced to zero. The reader undoes
//! the stuffing; the writer applies it.

use super::CodecError;

/// Bit reader over a byte slice, applying bit-unstuffing.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Current byte being consumed.
    bbuf: u32,
    /// Bits remaining in `bbuf`.
    bpos: u32,
    /// Byte pre-read after an 0xFF (stuffed, 7 significant bits).
    nextbbuf: u32,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bbuf: 0,
            bpos: 0,
            nextbbuf: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u32, CodecError> {
        let b = *self.data.get(self.pos).ok_or(CodecError::Truncated)?;
        self.pos += 1;
        Ok(b as u32)
    }

    /// Loads the next byte into the bit buffer, honoring stuffing.
    fn refill(&mut self) -> Result<(), CodecError> {
        if self.bbuf != 0xFF {
            self.bbuf = self.next_byte()?;
            self.bpos = 8;
            if self.bbuf == 0xFF {
                // The byte after a 0xFF is stuffed and holds 7 bits.
                self.nextbbuf = self.next_byte()?;
            }
        } else {
            self.bbuf = self.nextbbuf;
            self.bpos = 7;
        }
        Ok(())
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> Result<u32, CodecError> {
        if self.bpos == 0 {
            self.refill()?;
        }
        self.bpos -= 1;
        Ok((self.bbuf >> self.bpos) & 0x01)
    }

    /// Reads `n` bits (at most 32), most significant first.
    pub fn read_bits(&mut self, n: u32) -> Result<u32, CodecError> {
        debug_assert!(n <= 32);
        let mut bits = 0u32;
        for _ in 0..n {
            bits = (bits << 1) | self.read_bit()?;
        }
        Ok(bits)
    }
}

/// Bit writer producing the stuffing the reader expects.
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    /// Bits accumulated for the byte under construction.
    acc: u32,
    /// Number of bits the current byte still accepts (7 after an 0xFF).
    room: u32,
}

impl BitWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            acc: 0,
            room: 8,
        }
    }

    fn close_byte(&mut self) {
        self.out.push(self.acc as u8);
        let stuffed = self.acc == 0xFF;
        self.acc = 0;
        self.room = if stuffed { 7 } else { 8 };
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, bit: u32) {
        self.acc = (self.acc << 1) | (bit & 0x01);
        self.room -= 1;
        if self.room == 0 {
            self.close_byte();
        }
    }

    /// Writes the low `n` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 0x01);
        }
    }

    /// Pads the current byte with zero bits and returns the output.
    pub fn finish(mut self) -> Vec<u8> {
        if self.room < 8 {
            self.acc <<= self.room;
            self.room = 0;
            self.close_byte();
        }
        self.out
    }
}
