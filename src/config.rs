/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

/// Header magic expected at the start of every application image.
pub const APP_HDR_TAG: u32 = 0xAABB_CCDD;

/// Base address of the inactive bank (bank B) receiving new images.
pub const APP_B_START: u32 = 0x0060_0000;

/// Fixed policy values an image header is validated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtaConfig {
    pub header_tag: u32,
    pub bank_base: u32,
}

impl OtaConfig {
    pub const fn new(header_tag: u32, bank_base: u32) -> Self {
        Self {
            header_tag,
            bank_base,
        }
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self::new(APP_HDR_TAG, APP_B_START)
    }
}
