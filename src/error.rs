/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

use thiserror::Error;

/// Why a candidate image header was rejected. Checked in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum HeaderFault {
    #[error("header tag {found:#010x} does not match")]
    BadTag { found: u32 },
    #[error("destination {found:#010x} is not the update bank")]
    BadDestination { found: u32 },
    #[error("code length {declared} but {expected} payload bytes announced")]
    LengthMismatch { declared: u32, expected: usize },
    #[error("header crc {stored:#010x}, computed {computed:#010x}")]
    BadHeaderCrc { stored: u32, computed: u32 },
}

/// Failure of a single session operation. None of them are retried
/// internally; storage failures may be retried by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum OtaError {
    #[error("an update is already in progress")]
    AlreadyActive,
    #[error("declared image size is zero")]
    EmptyImage,
    #[error("image of {requested} bytes does not fit a bank of {capacity} bytes")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("storage could not reserve the update bank")]
    StorageReserveFailed,
    #[error("first chunk of {len} bytes cannot hold the image header")]
    HeaderTooShort { len: usize },
    #[error("invalid image header: {0}")]
    HeaderInvalid(#[from] HeaderFault),
    #[error("storage write failed")]
    StorageWriteFailed,
    #[error("chunk ends at byte {attempted}, past the declared {total}")]
    ImageOverrun { total: usize, attempted: usize },
    #[error("no update in progress")]
    NoActiveSession,
    #[error("received {received} of {expected} image bytes")]
    IncompleteImage { expected: usize, received: usize },
    #[error("storage readback failed")]
    StorageReadFailed,
    #[error("image crc {expected:#010x}, streamed {incremental:#010x}, flash {readback:#010x}")]
    IntegrityMismatch {
        expected: u32,
        incremental: u32,
        readback: u32,
    },
    #[error("storage refused to activate the new image")]
    ActivateFailed,
}

impl OtaError {
    /// Errors a transport may reasonably retry at a higher level.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StorageReserveFailed | Self::StorageWriteFailed | Self::ActivateFailed
        )
    }
}
