/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Serial transport in front of an [`UpdateSession`].
//!
//! Chunk payloads travel ChaCha20 encrypted. Each StartUpdate derives the
//! nonce from the serial number, the host's random salt and an update
//! counter, and hands it back to the host. The counter lives in RAM only,
//! so keystreams stay distinct across reboots only as long as the host
//! never repeats a salt.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use log::warn;

use crate::session::UpdateSession;
use crate::storage::FlashStorage;
use crate::types::ota::*;
use crate::types::std_crc::{ChecksumEngine, StdCrc};

pub struct DeviceIdentity {
    pub serial_number: [u8; 12],
    pub key: [u8; 32],
}

/// What to do after a request was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Request bytes to drop from the receive buffer.
    pub consumed: usize,
    /// Response bytes written to the output buffer.
    pub len: usize,
    /// The host asked for a reset once the response is sent.
    pub reset: bool,
}

pub struct SerialUpdater<S, C: ChecksumEngine = StdCrc> {
    session: UpdateSession<S, C>,
    identity: DeviceIdentity,
    cipher: ChaCha20,
    nonce: [u8; 12],
    generation: u32,
    activated_version: (u8, u8),
}

/// `serial_number` XOR (`salt` ++ `generation` little endian).
pub fn session_nonce(serial_number: &[u8; 12], salt: &[u8; 8], generation: u32) -> [u8; 12] {
    let mut mix = [0u8; 12];
    mix[..8].copy_from_slice(salt);
    mix[8..].copy_from_slice(&generation.to_le_bytes());

    let mut nonce = *serial_number;
    for (n, m) in nonce.iter_mut().zip(mix) {
        *n ^= m;
    }
    nonce
}

impl<S: FlashStorage, C: ChecksumEngine> SerialUpdater<S, C> {
    pub fn new(session: UpdateSession<S, C>, identity: DeviceIdentity) -> Self {
        let nonce = session_nonce(&identity.serial_number, &[0; 8], 0);
        let cipher = ChaCha20::new(&identity.key.into(), &nonce.into());

        Self {
            session,
            identity,
            cipher,
            nonce,
            generation: 0,
            activated_version: (0, 0),
        }
    }

    pub fn session(&self) -> &UpdateSession<S, C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut UpdateSession<S, C> {
        &mut self.session
    }

    pub fn nonce(&self) -> [u8; 12] {
        self.nonce
    }

    /// Handle the request at the start of `packet`, writing the response to
    /// `out`.
    ///
    /// Malformed frames are reported as `Err` and get no response;
    /// [`FrameError::OutOfRange`] also means "need more bytes".
    pub fn handle(&mut self, packet: &[u8], out: &mut [u8]) -> Result<Reply, FrameError> {
        let (request, consumed) = parse_request(packet)?;
        let mut reset = false;

        let len = match request {
            RequestForm::Handshake => encode(&BareForm::response(Command::Handshake), out)?,
            RequestForm::DeviceInfo => {
                let capacity = self.session.storage().capacity() as u32;
                encode(
                    &DeviceInfoResponseForm::new(capacity, self.identity.serial_number),
                    out,
                )?
            }
            RequestForm::StartUpdate(form) => {
                let result = self.start(form.total_size() as usize, &form.nonce_salt);
                encode(&StartUpdateResponseForm::new(result, self.nonce), out)?
            }
            RequestForm::WriteChunk(form) => {
                let result = self.write_chunk(form);
                encode(&StatusResponseForm::new(Command::WriteChunk, result), out)?
            }
            RequestForm::EndUpdate => {
                let result = match self.session.end() {
                    Ok(header) => {
                        self.activated_version = header.version();
                        ResultCode::Ok
                    }
                    Err(e) => ResultCode::from(&e),
                };
                encode(&StatusResponseForm::new(Command::EndUpdate, result), out)?
            }
            RequestForm::AbortUpdate => {
                let result = self.session.abort().into();
                encode(&StatusResponseForm::new(Command::AbortUpdate, result), out)?
            }
            RequestForm::UpdateStatus => {
                let version = self
                    .session
                    .header()
                    .map_or(self.activated_version, |h| h.version());
                encode(
                    &UpdateStatusResponseForm::new(
                        self.session.state(),
                        self.session.total_size() as u32,
                        self.session.received() as u32,
                        version,
                    ),
                    out,
                )?
            }
            RequestForm::Reset => {
                reset = true;
                encode(&BareForm::response(Command::Reset), out)?
            }
        };

        Ok(Reply {
            consumed,
            len,
            reset,
        })
    }

    fn start(&mut self, total_size: usize, salt: &[u8; 8]) -> ResultCode {
        if let Err(e) = self.session.begin(total_size) {
            return ResultCode::from(&e);
        }

        self.generation = self.generation.wrapping_add(1);
        self.nonce = session_nonce(&self.identity.serial_number, salt, self.generation);
        self.cipher = ChaCha20::new(&self.identity.key.into(), &self.nonce.into());
        ResultCode::Ok
    }

    fn write_chunk(&mut self, form: &WriteChunkRequestForm) -> ResultCode {
        let payload = match form.payload() {
            Ok(payload) => payload,
            Err(e) => return e.into(),
        };

        if !self.session.is_active() {
            return ResultCode::NoActiveSession;
        }

        let offset = form.offset() as usize;
        if offset != self.session.received() {
            warn!(
                "chunk at {} while {} bytes received",
                offset,
                self.session.received()
            );
            return ResultCode::OutOfOrder;
        }

        let mut data = [0u8; WRITE_CHUNK_SIZE];
        let data = &mut data[..payload.len()];
        data.copy_from_slice(payload);

        self.cipher.seek(offset as u64);
        self.cipher.apply_keystream(data); // decrypt

        self.session.write(data).into()
    }
}
