/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Firmware update staging.
//!
//! An update goes `begin` -> `write`* -> `end`. The first write must carry
//! the whole [`AppHeader`]; it is validated before anything reaches the
//! bank. Payload bytes (everything after the header) are folded into a
//! running CRC as they are persisted. `end` re-reads the whole image from
//! the bank: the stored header must match the validated one byte for byte,
//! and the payload is only activated when the flash copy, the streamed CRC
//! and the header's `code_crc` all agree.
//!
//! Chunks must arrive in order without gaps; the session has no notion of
//! offsets beyond counting what it has appended.

use log::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::storage::FlashStorage;
use crate::types::app_header::{AppHeader, HEADER_SIZE};
use crate::types::std_crc::{ChecksumEngine, StdCrc};

/// Granularity of the readback pass in [`UpdateSession::end`].
const READBACK_BLOCK: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    HeaderPending = 1,
    HeaderValidated = 2,
}

struct Progress<D> {
    total_size: usize,
    received: usize,
    running: D,
    header: Option<AppHeader>,
}

pub struct UpdateSession<S, C: ChecksumEngine = StdCrc> {
    storage: S,
    engine: C,
    config: OtaConfig,
    progress: Option<Progress<C::Digest>>,
}

impl<S: FlashStorage> UpdateSession<S, StdCrc> {
    pub fn new(storage: S, config: OtaConfig) -> Self {
        Self::with_engine(storage, StdCrc, config)
    }
}

impl<S: FlashStorage, C: ChecksumEngine> UpdateSession<S, C> {
    pub fn with_engine(storage: S, engine: C, config: OtaConfig) -> Self {
        Self {
            storage,
            engine,
            config,
            progress: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.progress {
            None => SessionState::Idle,
            Some(p) if p.header.is_none() => SessionState::HeaderPending,
            Some(_) => SessionState::HeaderValidated,
        }
    }

    pub fn is_active(&self) -> bool {
        self.progress.is_some()
    }

    /// Declared image size, 0 when idle.
    pub fn total_size(&self) -> usize {
        self.progress.as_ref().map_or(0, |p| p.total_size)
    }

    /// Bytes persisted so far, header included.
    pub fn received(&self) -> usize {
        self.progress.as_ref().map_or(0, |p| p.received)
    }

    pub fn header(&self) -> Option<&AppHeader> {
        self.progress.as_ref().and_then(|p| p.header.as_ref())
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Start an update of `total_size` bytes (header + payload).
    ///
    /// The image must be strictly smaller than the bank.
    pub fn begin(&mut self, total_size: usize) -> Result<(), OtaError> {
        if self.progress.is_some() {
            warn!("begin: update already in progress");
            return Err(OtaError::AlreadyActive);
        }
        if total_size == 0 {
            return Err(OtaError::EmptyImage);
        }

        let capacity = self.storage.capacity();
        if total_size >= capacity {
            warn!("begin: {} bytes do not fit bank of {}", total_size, capacity);
            return Err(OtaError::CapacityExceeded {
                requested: total_size,
                capacity,
            });
        }

        self.storage.reserve(total_size).map_err(|e| {
            warn!("begin: reserve failed: {:?}", e);
            OtaError::StorageReserveFailed
        })?;

        self.progress = Some(Progress {
            total_size,
            received: 0,
            running: self.engine.init(),
            header: None,
        });
        info!("update started, {} bytes", total_size);
        Ok(())
    }

    /// Persist the next slice of the image.
    ///
    /// A failed call leaves the session exactly as it was, so the same
    /// chunk may be offered again.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), OtaError> {
        let Some(progress) = self.progress.as_mut() else {
            return Err(OtaError::NoActiveSession);
        };

        let attempted = progress.received + chunk.len();
        if attempted > progress.total_size {
            warn!(
                "write: chunk ends at {} past image size {}",
                attempted, progress.total_size
            );
            return Err(OtaError::ImageOverrun {
                total: progress.total_size,
                attempted,
            });
        }

        let (header, payload) = match progress.header {
            Some(_) => (None, chunk),
            None => {
                if chunk.len() < HEADER_SIZE {
                    warn!("write: first chunk of {} bytes has no header", chunk.len());
                    return Err(OtaError::HeaderTooShort { len: chunk.len() });
                }
                let Some(header) = AppHeader::parse(chunk) else {
                    return Err(OtaError::HeaderTooShort { len: chunk.len() });
                };
                // a total below the header size can never match any code length
                let expected = progress.total_size.saturating_sub(HEADER_SIZE);
                header
                    .validate(&self.config, expected, &self.engine)
                    .inspect_err(|fault| warn!("write: {}", fault))?;

                let (major, minor) = header.version();
                debug!("header ok, image v{}.{}", major, minor);
                (Some(header), &chunk[HEADER_SIZE..])
            }
        };

        self.storage.append(chunk).map_err(|e| {
            warn!("write: append of {} bytes failed: {:?}", chunk.len(), e);
            OtaError::StorageWriteFailed
        })?;

        if header.is_some() {
            progress.header = header;
        }
        self.engine.update(&mut progress.running, payload);
        progress.received = attempted;
        debug!("chunk {} bytes, {}/{}", chunk.len(), attempted, progress.total_size);
        Ok(())
    }

    /// Verify the staged image and activate it.
    ///
    /// The session is idle afterwards whatever the outcome. On success the
    /// activated image's header is returned.
    pub fn end(&mut self) -> Result<AppHeader, OtaError> {
        let Some(progress) = self.progress.take() else {
            return Err(OtaError::NoActiveSession);
        };

        if progress.received != progress.total_size {
            warn!(
                "end: received {} of {} bytes",
                progress.received, progress.total_size
            );
            return Err(OtaError::IncompleteImage {
                expected: progress.total_size,
                received: progress.received,
            });
        }

        let incremental = self.engine.finalize(progress.running);
        let Some(header) = progress.header else {
            // unreachable for a complete image, the first write validates
            return Err(OtaError::IntegrityMismatch {
                expected: 0,
                incremental,
                readback: 0,
            });
        };

        self.storage.flush().map_err(|e| {
            warn!("end: flush failed: {:?}", e);
            OtaError::StorageWriteFailed
        })?;

        self.readback_header(&header)?;
        let readback = self.readback_crc(progress.total_size)?;
        let expected = header.code_crc();
        if readback != incremental || incremental != expected {
            warn!(
                "end: crc mismatch, header {:#010x} streamed {:#010x} flash {:#010x}",
                expected, incremental, readback
            );
            return Err(OtaError::IntegrityMismatch {
                expected,
                incremental,
                readback,
            });
        }

        self.storage.activate().map_err(|e| {
            warn!("end: activate failed: {:?}", e);
            OtaError::ActivateFailed
        })?;

        let (major, minor) = header.version();
        info!("image v{}.{} activated", major, minor);
        Ok(header)
    }

    /// Drop the in-progress update without activating anything.
    pub fn abort(&mut self) -> Result<(), OtaError> {
        match self.progress.take() {
            Some(p) => {
                warn!("update aborted at {}/{}", p.received, p.total_size);
                Ok(())
            }
            None => Err(OtaError::NoActiveSession),
        }
    }

    /// The header is not covered by `code_crc`, so its stored copy is
    /// compared against the one validated on the first write.
    fn readback_header(&mut self, header: &AppHeader) -> Result<(), OtaError> {
        let mut stored = [0u8; HEADER_SIZE];
        self.storage.read(0, &mut stored).map_err(|e| {
            warn!("end: header readback failed: {:?}", e);
            OtaError::StorageReadFailed
        })?;

        if stored == header.as_bytes() {
            return Ok(());
        }

        let expected = self.engine.once(header.as_bytes());
        let readback = self.engine.once(&stored);
        warn!(
            "end: stored header changed, {:#010x} became {:#010x}",
            expected, readback
        );
        Err(OtaError::IntegrityMismatch {
            expected,
            incremental: expected,
            readback,
        })
    }

    fn readback_crc(&mut self, total_size: usize) -> Result<u32, OtaError> {
        let mut digest = self.engine.init();
        let mut block = [0u8; READBACK_BLOCK];
        let mut offset = HEADER_SIZE;

        while offset < total_size {
            let len = READBACK_BLOCK.min(total_size - offset);
            self.storage.read(offset, &mut block[..len]).map_err(|e| {
                warn!("end: readback at {} failed: {:?}", offset, e);
                OtaError::StorageReadFailed
            })?;
            self.engine.update(&mut digest, &block[..len]);
            offset += len;
        }

        Ok(self.engine.finalize(digest))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::RamFlash;
    use zerocopy::IntoBytes;

    const CONFIG: OtaConfig = OtaConfig::new(0xAABB_CCDD, 0x0060_0000);

    fn image(payload_len: usize) -> ([u8; 512], usize) {
        let mut buf = [0u8; 512];
        let total = HEADER_SIZE + payload_len;
        for (i, b) in buf[HEADER_SIZE..total].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let hdr = AppHeader::seal(&CONFIG, 1, 0, 0, &buf[HEADER_SIZE..total], &StdCrc);
        buf[..HEADER_SIZE].copy_from_slice(hdr.as_bytes());
        (buf, total)
    }

    #[test]
    fn state_walks_through_lifecycle() {
        let (img, total) = image(100);
        let mut session = UpdateSession::new(RamFlash::<1024>::new(), CONFIG);
        assert_eq!(session.state(), SessionState::Idle);

        session.begin(total).unwrap();
        assert_eq!(session.state(), SessionState::HeaderPending);

        session.write(&img[..HEADER_SIZE]).unwrap();
        assert_eq!(session.state(), SessionState::HeaderValidated);
        assert_eq!(session.header().map(|h| h.code_length()), Some(100));

        session.write(&img[HEADER_SIZE..total]).unwrap();
        session.end().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.storage().activations(), 1);
    }

    #[test]
    fn header_rejection_keeps_session_untouched() {
        let (mut img, total) = image(100);
        img[0] ^= 1;
        let mut session = UpdateSession::new(RamFlash::<1024>::new(), CONFIG);
        session.begin(total).unwrap();

        assert!(matches!(
            session.write(&img[..total]),
            Err(OtaError::HeaderInvalid(_))
        ));
        assert_eq!(session.state(), SessionState::HeaderPending);
        assert_eq!(session.received(), 0);
        assert_eq!(session.storage().written(), 0);
    }

    #[test]
    fn failed_append_can_be_retried() {
        let (img, total) = image(100);
        let mut session = UpdateSession::new(RamFlash::<1024>::new(), CONFIG);
        session.begin(total).unwrap();

        session.storage_mut().fail_append(true);
        assert_eq!(
            session.write(&img[..total]),
            Err(OtaError::StorageWriteFailed)
        );
        assert_eq!(session.state(), SessionState::HeaderPending);

        session.storage_mut().fail_append(false);
        session.write(&img[..total]).unwrap();
        assert!(session.end().is_ok());
    }

    #[test]
    fn readback_failure_is_reported() {
        let (img, total) = image(300);
        let mut session = UpdateSession::new(RamFlash::<1024>::new(), CONFIG);
        session.begin(total).unwrap();
        session.write(&img[..total]).unwrap();

        session.storage_mut().fail_read(true);
        assert_eq!(session.end(), Err(OtaError::StorageReadFailed));
        assert!(!session.is_active());
        assert_eq!(session.storage().activations(), 0);
    }
}
