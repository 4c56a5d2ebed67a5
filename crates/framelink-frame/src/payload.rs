use bytes::Bytes;

/// Conversion into a wire payload.
///
/// Implemented for byte containers, strings (UTF-8), integers and floats
/// (little-endian, matching the length prefix) and `bool` (one byte). Every
/// send-like operation accepts `impl IntoPayload`, so callers can pass a
/// typed value instead of encoding it by hand.
pub trait IntoPayload {
    /// Convert `self` into the payload bytes.
    fn into_payload(self) -> Bytes;
}

impl IntoPayload for Bytes {
    fn into_payload(self) -> Bytes {
        self
    }
}

impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoPayload for &[u8; N] {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Bytes {
        Bytes::from(self.into_bytes())
    }
}

impl IntoPayload for &str {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoPayload for bool {
    fn into_payload(self) -> Bytes {
        Bytes::copy_from_slice(&[u8::from(self)])
    }
}

macro_rules! impl_into_payload_le {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoPayload for $ty {
                fn into_payload(self) -> Bytes {
                    Bytes::copy_from_slice(&self.to_le_bytes())
                }
            }
        )*
    };
}

impl_into_payload_le!(u16, i16, u32, i32, u64, i64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pass_through() {
        let bytes = Bytes::from_static(b"raw");
        assert_eq!(bytes.clone().into_payload(), bytes);
    }

    #[test]
    fn slices_and_vecs_copy() {
        assert_eq!(b"abc".into_payload().as_ref(), b"abc");
        assert_eq!(vec![1u8, 2, 3].into_payload().as_ref(), &[1, 2, 3]);
        assert_eq!((&[9u8][..]).into_payload().as_ref(), &[9]);
    }

    #[test]
    fn strings_are_utf8() {
        assert_eq!("héllo".into_payload().as_ref(), "héllo".as_bytes());
        assert_eq!(String::from("x").into_payload().as_ref(), b"x");
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x0102u16.into_payload().as_ref(), &[0x02, 0x01]);
        assert_eq!(0x01020304u32.into_payload().as_ref(), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!((-1i32).into_payload().as_ref(), &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(1u64.into_payload().len(), 8);
    }

    #[test]
    fn bool_is_one_byte() {
        assert_eq!(true.into_payload().as_ref(), &[1]);
        assert_eq!(false.into_payload().as_ref(), &[0]);
    }

    #[test]
    fn floats_round_trip() {
        let bytes = 1.5f64.into_payload();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        assert_eq!(f64::from_le_bytes(raw), 1.5);
    }
}
