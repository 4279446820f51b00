//! Minimal RLP encoder, enough for legacy EVM transactions.
//!
//! Only encoding is needed (the engine never parses RLP), so the implementation is a single recursive item type.

#[derive(Debug, Clone)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// A big-endian integer with leading zeros trimmed. Zero encodes as the empty byte string per RLP convention.
    pub fn uint(value: u128) -> Self {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Item::Bytes(bytes[first..].to_vec())
    }

    pub fn bytes(value: &[u8]) -> Self {
        Item::Bytes(value.to_vec())
    }
}

pub fn encode(item: &Item) -> Vec<u8> {
    match item {
        Item::Bytes(bytes) => encode_bytes(bytes),
        Item::List(items) => {
            let mut payload = Vec::new();
            for item in items {
                payload.extend_from_slice(&encode(item));
            }
            let mut out = length_prefix(payload.len(), 0xc0);
            out.extend_from_slice(&payload);
            out
        },
    }
}

fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = length_prefix(bytes.len(), 0x80);
    out.extend_from_slice(bytes);
    out
}

fn length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_bytes = len.to_be_bytes();
        let first = len_bytes.iter().position(|b| *b != 0).unwrap_or(len_bytes.len() - 1);
        let mut out = vec![offset + 55 + (len_bytes.len() - first) as u8];
        out.extend_from_slice(&len_bytes[first..]);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_vectors() {
        // From the RLP reference test suite.
        assert_eq!(encode(&Item::bytes(b"dog")), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(encode(&Item::bytes(&[])), vec![0x80]);
        assert_eq!(encode(&Item::bytes(&[0x0f])), vec![0x0f]);
        assert_eq!(encode(&Item::List(vec![])), vec![0xc0]);
        let cat_dog = Item::List(vec![Item::bytes(b"cat"), Item::bytes(b"dog")]);
        assert_eq!(encode(&cat_dog), vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn integers_trim_leading_zeros() {
        assert_eq!(encode(&Item::uint(0)), vec![0x80]);
        assert_eq!(encode(&Item::uint(15)), vec![0x0f]);
        assert_eq!(encode(&Item::uint(1024)), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn long_string_prefix() {
        let payload = vec![b'a'; 60];
        let encoded = encode(&Item::bytes(&payload));
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 60);
        assert_eq!(&encoded[2..], payload.as_slice());
    }
}
