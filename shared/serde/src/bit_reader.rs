use crate::error::SerdeErr;

fn bit_length(bytes: usize) -> usize {
    bytes.saturating_mul(8)
}

/// Reads bits back out of a buffer produced by `BitWriter`
pub struct BitReader<'b> {
    buffer: &'b [u8],
    bit_index: usize,
}

impl<'b> BitReader<'b> {
    pub fn new(buffer: &'b [u8]) -> Self {
        Self {
            buffer,
            bit_index: 0,
        }
    }

    pub fn bits_remaining(&self) -> usize {
        bit_length(self.buffer.len()).saturating_sub(self.bit_index)
    }

    pub fn read_bit(&mut self) -> Result<bool, SerdeErr> {
        if self.bits_remaining() == 0 {
            return Err(SerdeErr::EndOfBuffer {
                requested: 1,
                remaining: 0,
            });
        }
        let byte = self.buffer[self.bit_index / 8];
        let bit = byte & (1 << (self.bit_index % 8)) != 0;
        self.bit_index += 1;
        Ok(bit)
    }

    pub fn read_byte(&mut self) -> Result<u8, SerdeErr> {
        let remaining = self.bits_remaining();
        if remaining < 8 {
            return Err(SerdeErr::EndOfBuffer {
                requested: 8,
                remaining,
            });
        }
        let mut output = 0u8;
        for index in 0..8 {
            if self.read_bit()? {
                output |= 1 << index;
            }
        }
        Ok(output)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, SerdeErr> {
        let requested = bit_length(count);
        let remaining = self.bits_remaining();
        if requested > remaining {
            return Err(SerdeErr::EndOfBuffer {
                requested,
                remaining,
            });
        }
        let mut output = Vec::with_capacity(count);
        for _ in 0..count {
            output.push(self.read_byte()?);
        }
        Ok(output)
    }
}
