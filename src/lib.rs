/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Dual-bank firmware update staging.
//!
//! [`UpdateSession`] receives an image slice by slice, validates its 64 byte
//! [`AppHeader`] on the first slice, keeps a running CRC of the payload and
//! only activates the inactive bank once the streamed CRC, a CRC re-read
//! from flash and the header's `code_crc` agree. [`SerialUpdater`] puts the
//! session behind the bootloader's UART frame protocol.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod types;
pub mod updater;

pub use config::OtaConfig;
pub use error::{HeaderFault, OtaError};
pub use session::{SessionState, UpdateSession};
pub use storage::{FlashStorage, RamFlash};
pub use types::app_header::{AppHeader, HEADER_SIZE};
pub use types::std_crc::{ChecksumEngine, StdCrc};
pub use updater::{DeviceIdentity, Reply, SerialUpdater};
