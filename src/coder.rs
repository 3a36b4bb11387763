//! Wire encoding for typed message payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// An object that can encode a particular type to, and decode it from, a
/// byte buffer. The implementation can be based on a `serde` data format,
/// or anything else.
pub trait Coder {
    type Type;

    fn encode(&self, inst: &Self::Type) -> Vec<u8>;

    fn decode(&self, data: &[u8]) -> Self::Type;
}

/// CBOR-backed `Coder` for any serde-compatible payload type. Decoding a
/// malformed buffer panics; the transports deliver frames intact, so a bad
/// buffer means a protocol bug, not an input error.
pub struct CborCoder<T> {
    phantom: PhantomData<T>,
}

impl<T> CborCoder<T> {
    pub fn new() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<T> Default for CborCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Coder for CborCoder<T>
where
    T: Serialize + DeserializeOwned,
{
    type Type = T;

    fn encode(&self, inst: &Self::Type) -> Vec<u8> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(inst, &mut buffer).unwrap();
        buffer
    }

    fn decode(&self, data: &[u8]) -> Self::Type {
        ciborium::de::from_reader(data).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip() {
        let code = CborCoder::<i32>::new();
        for value in [-1, 0, 7, i32::MAX, i32::MIN] {
            assert_eq!(code.decode(&code.encode(&value)), value);
        }
    }

    #[test]
    fn pixel_rows_round_trip() {
        let code = CborCoder::<Vec<i8>>::new();
        let row = vec![-1, 1, 1, -1];
        assert_eq!(code.decode(&code.encode(&row)), row);
    }
}
