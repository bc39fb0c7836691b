/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Application image header.
//!
//! Every image starts with a 64 byte little endian record. The header is
//! persisted together with the payload, so an image in flash can be checked
//! again at boot without the transport that delivered it.

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::OtaConfig;
use crate::error::HeaderFault;
use crate::types::std_crc::ChecksumEngine;

type Le32 = U32<LittleEndian>;

pub const HEADER_SIZE: usize = core::mem::size_of::<AppHeader>();
pub const HEADER_INFO_SIZE: usize = core::mem::size_of::<AppHeaderInfo>();
const VTOR_ALIGN: u32 = 256;

/// Fields covered by `header_crc`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AppHeaderInfo {
    pub tag: Le32,
    pub version: u8,
    pub sub_version: u8,
    pub reserved: [u8; 2],
    /// Where the image must be written. Has to be the update bank.
    pub destination_address: Le32,
    /// First instruction executed after activation. Not validated.
    pub start_entry: Le32,
    /// Payload length, header excluded.
    pub code_length: Le32,
    pub code_crc: Le32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AppHeader {
    pub info: AppHeaderInfo,
    pub header_crc: Le32,
    pub reserved2: [u8; 36],
}

const_assert_eq!(HEADER_INFO_SIZE, 24);
const_assert_eq!(HEADER_SIZE, 64);

impl AppHeader {
    /// Read a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes).ok().map(|(hdr, _)| hdr)
    }

    /// Build the header for `payload`, filling in length and both CRCs.
    pub fn seal<C: ChecksumEngine>(
        config: &OtaConfig,
        version: u8,
        sub_version: u8,
        start_entry: u32,
        payload: &[u8],
        engine: &C,
    ) -> Self {
        let info = AppHeaderInfo {
            tag: Le32::new(config.header_tag),
            version,
            sub_version,
            reserved: [0xFF, 0xFF],
            destination_address: Le32::new(config.bank_base),
            start_entry: Le32::new(start_entry),
            code_length: Le32::new(payload.len() as u32),
            code_crc: Le32::new(engine.once(payload)),
        };

        Self {
            info,
            header_crc: Le32::new(engine.once(info.as_bytes())),
            reserved2: [0; 36],
        }
    }

    pub fn version(&self) -> (u8, u8) {
        (self.info.version, self.info.sub_version)
    }

    pub fn code_length(&self) -> u32 {
        self.info.code_length.get()
    }

    pub fn code_crc(&self) -> u32 {
        self.info.code_crc.get()
    }

    /// Check a header announced for an image of `expected_payload_len`
    /// payload bytes. Fails on the first mismatch.
    pub fn validate<C: ChecksumEngine>(
        &self,
        config: &OtaConfig,
        expected_payload_len: usize,
        engine: &C,
    ) -> Result<(), HeaderFault> {
        self.check_tag(config)?;
        self.check_destination(config)?;

        let declared = self.code_length();
        if declared as usize != expected_payload_len {
            return Err(HeaderFault::LengthMismatch {
                declared,
                expected: expected_payload_len,
            });
        }

        self.check_crc(engine)
    }

    /// Same checks as [`Self::validate`] minus the length, for an image that
    /// already sits in flash.
    pub fn check_resident<C: ChecksumEngine>(
        &self,
        config: &OtaConfig,
        engine: &C,
    ) -> Result<(), HeaderFault> {
        self.check_tag(config)?;
        self.check_destination(config)?;
        self.check_crc(engine)
    }

    /// `start_entry` when it can be loaded into VTOR: inside the payload and
    /// aligned, as Cortex-M0+ ignores VTOR bits [7:0].
    pub fn vector_table(&self) -> Option<u32> {
        let entry = self.info.start_entry.get();
        let payload = self.info.destination_address.get().checked_add(HEADER_SIZE as u32)?;
        let end = payload.checked_add(self.code_length())?;

        (entry % VTOR_ALIGN == 0 && (payload..end).contains(&entry)).then_some(entry)
    }

    fn check_tag(&self, config: &OtaConfig) -> Result<(), HeaderFault> {
        let found = self.info.tag.get();
        if found != config.header_tag {
            return Err(HeaderFault::BadTag { found });
        }
        Ok(())
    }

    fn check_destination(&self, config: &OtaConfig) -> Result<(), HeaderFault> {
        let found = self.info.destination_address.get();
        if found != config.bank_base {
            return Err(HeaderFault::BadDestination { found });
        }
        Ok(())
    }

    fn check_crc<C: ChecksumEngine>(&self, engine: &C) -> Result<(), HeaderFault> {
        let stored = self.header_crc.get();
        let computed = engine.once(self.info.as_bytes());
        if stored != computed {
            return Err(HeaderFault::BadHeaderCrc { stored, computed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::std_crc::StdCrc;

    const CONFIG: OtaConfig = OtaConfig::new(0xAABB_CCDD, 0x0060_0000);

    fn sealed(payload: &[u8]) -> AppHeader {
        AppHeader::seal(&CONFIG, 2, 7, 0x0060_0400, payload, &StdCrc)
    }

    #[test]
    fn layout_is_little_endian() {
        let hdr = sealed(&[0u8; 936]);
        let bytes = hdr.as_bytes();

        assert_eq!(&bytes[0..4], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 7);
        assert_eq!(&bytes[6..8], &[0xFF, 0xFF]);
        assert_eq!(&bytes[8..12], &0x0060_0000u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &936u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &StdCrc.once(&bytes[..24]).to_le_bytes());
        assert!(bytes[28..].iter().all(|&b| b == 0));
    }

    #[test]
    fn sealed_header_validates() {
        let payload = [0x5Au8; 100];
        let hdr = sealed(&payload);

        assert_eq!(hdr.validate(&CONFIG, 100, &StdCrc), Ok(()));
        assert_eq!(hdr.check_resident(&CONFIG, &StdCrc), Ok(()));
        assert_eq!(hdr.code_crc(), StdCrc.once(&payload));
        assert_eq!(AppHeader::parse(hdr.as_bytes()), Some(hdr));
    }

    #[test]
    fn parse_needs_full_record() {
        assert_eq!(AppHeader::parse(&[0u8; 63]), None);
    }

    #[test]
    fn faults_in_check_order() {
        let mut hdr = sealed(&[1u8; 10]);
        hdr.info.tag = Le32::new(0x1234_5678);
        hdr.info.destination_address = Le32::new(0);
        assert_eq!(
            hdr.validate(&CONFIG, 10, &StdCrc),
            Err(HeaderFault::BadTag { found: 0x1234_5678 })
        );

        let mut hdr = sealed(&[1u8; 10]);
        hdr.info.destination_address = Le32::new(0x0040_0000);
        assert_eq!(
            hdr.validate(&CONFIG, 10, &StdCrc),
            Err(HeaderFault::BadDestination { found: 0x0040_0000 })
        );

        let hdr = sealed(&[1u8; 10]);
        assert_eq!(
            hdr.validate(&CONFIG, 11, &StdCrc),
            Err(HeaderFault::LengthMismatch {
                declared: 10,
                expected: 11
            })
        );
    }

    #[test]
    fn header_crc_covers_info_fields_only() {
        let mut hdr = sealed(&[1u8; 10]);
        hdr.reserved2[5] = 0xEE;
        assert_eq!(hdr.validate(&CONFIG, 10, &StdCrc), Ok(()));

        hdr.info.start_entry = Le32::new(0xDEAD_BEEF);
        assert!(matches!(
            hdr.validate(&CONFIG, 10, &StdCrc),
            Err(HeaderFault::BadHeaderCrc { .. })
        ));
    }

    #[test]
    fn vector_table_is_aligned_inside_payload() {
        let payload = [0u8; 936];
        let at = |entry| AppHeader::seal(&CONFIG, 1, 0, entry, &payload, &StdCrc).vector_table();

        assert_eq!(at(0x0060_0100), Some(0x0060_0100));
        assert_eq!(at(0x0060_0300), Some(0x0060_0300));
        // payload starts at 0x40, ends at 0x3E8
        assert_eq!(at(0x0060_0000), None);
        assert_eq!(at(0x0060_0400), None);
        // VTOR would drop the low byte
        assert_eq!(at(0x0060_0104), None);
        assert_eq!(at(0x0060_0140), None);
    }
}
