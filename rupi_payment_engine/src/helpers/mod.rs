mod eip55;

pub use eip55::{checksum_address, AddressError};
