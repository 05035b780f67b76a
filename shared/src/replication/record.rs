use netrep_serde::{
    BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger, MAX_COLLECTION_LENGTH,
};

/// Bitset over an entity's replicated properties, one bit per property index.
/// A set bit means the property must be (re)sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationRecord {
    mask: Vec<u8>,
    property_count: usize,
}

impl ReplicationRecord {
    pub fn new(property_count: usize) -> Self {
        Self {
            mask: vec![0; property_count.div_ceil(8)],
            property_count,
        }
    }

    /// A record with every property marked
    pub fn full(property_count: usize) -> Self {
        let mut record = Self::new(property_count);
        record.set_all();
        record
    }

    pub fn property_count(&self) -> usize {
        self.property_count
    }

    /// Grows the record so it covers `property_count` properties. New bits start clear.
    pub fn resize(&mut self, property_count: usize) {
        if property_count <= self.property_count {
            return;
        }
        self.property_count = property_count;
        self.mask.resize(property_count.div_ceil(8), 0);
    }

    pub fn bit(&self, index: usize) -> bool {
        if index >= self.property_count {
            return false;
        }
        self.mask[index / 8] & (1 << (index % 8)) != 0
    }

    /// Sets or clears one bit, growing the record if needed
    pub fn set_bit(&mut self, index: usize, value: bool) {
        self.resize(index + 1);
        let byte = &mut self.mask[index / 8];
        if value {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
    }

    pub fn set_all(&mut self) {
        for index in 0..self.property_count {
            self.set_bit(index, true);
        }
    }

    pub fn clear(&mut self) {
        for byte in self.mask.iter_mut() {
            *byte = 0;
        }
    }

    pub fn is_clear(&self) -> bool {
        self.mask.iter().all(|byte| *byte == 0)
    }

    pub fn or(&mut self, other: &Self) {
        self.resize(other.property_count);
        for (byte, other_byte) in self.mask.iter_mut().zip(other.mask.iter()) {
            *byte |= *other_byte;
        }
    }

    /// Clears every bit that is set in `other`
    pub fn nand(&mut self, other: &Self) {
        for (byte, other_byte) in self.mask.iter_mut().zip(other.mask.iter()) {
            *byte &= !*other_byte;
        }
    }

    pub fn count_set(&self) -> usize {
        self.mask.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// Indices of set bits, ascending
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.property_count).filter(move |index| self.bit(*index))
    }
}

impl Serde for ReplicationRecord {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<5>::new(self.property_count as u64).ser(writer);
        for index in 0..self.property_count {
            writer.write_bit(self.bit(index));
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let property_count: u64 = UnsignedVariableInteger::<5>::de(reader)?.try_to()?;
        if property_count > MAX_COLLECTION_LENGTH {
            return Err(SerdeErr::LengthOutOfRange {
                length: property_count,
                limit: MAX_COLLECTION_LENGTH,
            });
        }
        let property_count = property_count as usize;
        let mut record = Self::new(property_count);
        for index in 0..property_count {
            if reader.read_bit()? {
                record.set_bit(index, true);
            }
        }
        Ok(record)
    }
}
