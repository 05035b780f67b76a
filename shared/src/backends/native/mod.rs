mod instant;

pub use instant::Instant;
