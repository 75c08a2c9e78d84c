//! Odds and ends shared by the hardware modules.

/// Sign extends the low `bits` bits of `v` to a full i32.
pub fn sign_extend(v: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((v << shift) as i32) >> shift
}

// The GBA has a handful of large fixed-size memories (work RAM, VRAM, OAM, palette RAM). We wrap each of them in a
// "glue" type so that Serde writes them out as a single byte blob instead of a sequence of u8s. The blob form is
// dramatically faster with bincode. The backing storage lives on the heap: EWRAM alone is 256KiB, which is not
// something we want to be shuffling around on the stack every time a snapshot is decoded.
// Multi-byte accessors are little endian, matching the ARM7TDMI bus.
#[macro_export]
macro_rules! memory_segment {
    ( $name:ident; $size:expr ) => {
        #[derive(Clone)]
        pub struct $name(Box<[u8]>);

        impl Default for $name {
            fn default() -> $name {
                $name(vec![0; $size].into_boxed_slice())
            }
        }

        #[allow(unused)]
        impl $name {
            pub const SIZE: usize = $size;

            pub fn read16(&self, offset: usize) -> u16 {
                <byteorder::LittleEndian as byteorder::ByteOrder>::read_u16(&self.0[offset..offset + 2])
            }

            pub fn read32(&self, offset: usize) -> u32 {
                <byteorder::LittleEndian as byteorder::ByteOrder>::read_u32(&self.0[offset..offset + 4])
            }

            pub fn write16(&mut self, offset: usize, v: u16) {
                <byteorder::LittleEndian as byteorder::ByteOrder>::write_u16(&mut self.0[offset..offset + 2], v)
            }

            pub fn write32(&mut self, offset: usize, v: u32) {
                <byteorder::LittleEndian as byteorder::ByteOrder>::write_u32(&mut self.0[offset..offset + 4], v)
            }

            pub fn clear(&mut self) {
                for b in self.0.iter_mut() {
                    *b = 0;
                }
            }
        }

        impl std::ops::Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut [u8] {
                &mut self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<$name, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                struct SegmentVisitor;

                impl<'de> serde::de::Visitor<'de> for SegmentVisitor {
                    type Value = $name;

                    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                        write!(formatter, "a byte array of {} elements", $size)
                    }

                    fn visit_bytes<E>(self, value: &[u8]) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        if value.len() != $size {
                            return Err(E::custom(format!(
                                "expected byte array of {:#x}, but this is {:#x}",
                                $size,
                                value.len()
                            )));
                        }
                        Ok($name(value.to_vec().into_boxed_slice()))
                    }

                    fn visit_byte_buf<E>(self, value: Vec<u8>) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        if value.len() != $size {
                            return Err(E::custom(format!(
                                "expected byte array of {:#x}, but this is {:#x}",
                                $size,
                                value.len()
                            )));
                        }
                        Ok($name(value.into_boxed_slice()))
                    }
                }

                deserializer.deserialize_bytes(SegmentVisitor)
            }
        }
    };
}
