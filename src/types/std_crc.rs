/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

use crc::{Crc, Digest, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

static IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
static FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Incremental checksum used for image header and payload integrity.
///
/// Hardware CRC units can implement this too; the session only relies on
/// `once(x) == finalize(update(init(), x))` for any split of `x`.
pub trait ChecksumEngine {
    type Digest;

    fn init(&self) -> Self::Digest;
    fn update(&self, digest: &mut Self::Digest, bytes: &[u8]);
    fn finalize(&self, digest: Self::Digest) -> u32;

    fn once(&self, bytes: &[u8]) -> u32 {
        let mut digest = self.init();
        self.update(&mut digest, bytes);
        self.finalize(digest)
    }
}

/// Software CRC-32/ISO-HDLC.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdCrc;

impl ChecksumEngine for StdCrc {
    type Digest = Digest<'static, u32>;

    fn init(&self) -> Self::Digest {
        IMAGE_CRC.digest()
    }

    fn update(&self, digest: &mut Self::Digest, bytes: &[u8]) {
        digest.update(bytes);
    }

    fn finalize(&self, digest: Self::Digest) -> u32 {
        digest.finalize()
    }

    fn once(&self, bytes: &[u8]) -> u32 {
        std_crc(bytes)
    }
}

pub fn std_crc(bytes: &[u8]) -> u32 {
    IMAGE_CRC.checksum(bytes)
}

/// CRC-16 carried by serial frames.
pub fn frame_crc(bytes: &[u8]) -> u16 {
    FRAME_CRC.checksum(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_values() {
        // catalogue check values for "123456789"
        assert_eq!(std_crc(b"123456789"), 0xCBF4_3926);
        assert_eq!(frame_crc(b"123456789"), 0x29B1);
    }

    #[test]
    fn split_updates_match_one_shot() {
        let data: [u8; 300] = core::array::from_fn(|i| (i * 7) as u8);
        let engine = StdCrc;

        let mut digest = engine.init();
        for piece in data.chunks(37) {
            engine.update(&mut digest, piece);
        }

        assert_eq!(engine.finalize(digest), engine.once(&data));
    }
}
