/// Largest datagram the transport will carry, in bytes
pub const MTU_SIZE_BYTES: usize = 1200;
pub const MTU_SIZE_BITS: u32 = (MTU_SIZE_BYTES * 8) as u32;
