/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Serial update frames.
//!
//! Every frame has a fixed size chosen by its command byte:
//! `SOF | CMD | fields.. | EOF`. Responses other than the bare ones carry
//! a little endian CRC-16 at offset 2 over the bytes between it and EOF.

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::OtaError;
use crate::session::SessionState;
use crate::types::std_crc::frame_crc;

pub const EOF_SIGNATURE: u8 = 0xFF;
const CHECKSUM_OFFSET: usize = 2;
const CHECKSUM_END: usize = CHECKSUM_OFFSET + 2;

pub const PROTOCOL_VERSION: u8 = 0x01;
pub const WRITE_CHUNK_SIZE: usize = 256;
pub const CHUNK_BIT_IDX: usize = WRITE_CHUNK_SIZE.trailing_zeros() as usize;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sof {
    /// Host to slave
    Request = 0xAA,
    /// Slave to host
    Response = 0xBB,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Handshake = 0x01,
    DeviceInfo = 0x02,
    StartUpdate = 0x30,
    WriteChunk = 0x40,
    EndUpdate = 0x50,
    AbortUpdate = 0x60,
    UpdateStatus = 0xE0,
    Reset = 0xF0,
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::DeviceInfo),
            0x30 => Ok(Self::StartUpdate),
            0x40 => Ok(Self::WriteChunk),
            0x50 => Ok(Self::EndUpdate),
            0x60 => Ok(Self::AbortUpdate),
            0xE0 => Ok(Self::UpdateStatus),
            0xF0 => Ok(Self::Reset),
            _ => Err(FrameError::UnknownCommand),
        }
    }
}

/// A frame that could not be taken apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum FrameError {
    #[error("frame checksum mismatch")]
    ChecksumError = 0x80,
    #[error("unknown command")]
    UnknownCommand = 0x81,
    /// Also returned for a frame that is not complete yet.
    #[error("frame or field out of range")]
    OutOfRange = 0x82,
    #[error("missing end of frame")]
    MissingEof = 0x83,
    #[error("missing start of frame")]
    MissingSof = 0x84,
    #[error("response buffer too short")]
    BufferTooShort = 0x85,
}

/// One byte outcome carried by status responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0x00,
    AlreadyActive = 0x10,
    EmptyImage = 0x11,
    CapacityExceeded = 0x12,
    StorageReserveFailed = 0x13,
    HeaderTooShort = 0x20,
    HeaderInvalid = 0x21,
    StorageWriteFailed = 0x22,
    ImageOverrun = 0x23,
    OutOfOrder = 0x24,
    NoActiveSession = 0x30,
    IncompleteImage = 0x31,
    StorageReadFailed = 0x32,
    IntegrityMismatch = 0x33,
    ActivateFailed = 0x34,
    ChecksumError = 0x80,
    OutOfRange = 0x82,
    UnknownError = 0xFF,
}

impl From<&OtaError> for ResultCode {
    fn from(err: &OtaError) -> Self {
        match err {
            OtaError::AlreadyActive => Self::AlreadyActive,
            OtaError::EmptyImage => Self::EmptyImage,
            OtaError::CapacityExceeded { .. } => Self::CapacityExceeded,
            OtaError::StorageReserveFailed => Self::StorageReserveFailed,
            OtaError::HeaderTooShort { .. } => Self::HeaderTooShort,
            OtaError::HeaderInvalid(_) => Self::HeaderInvalid,
            OtaError::StorageWriteFailed => Self::StorageWriteFailed,
            OtaError::ImageOverrun { .. } => Self::ImageOverrun,
            OtaError::NoActiveSession => Self::NoActiveSession,
            OtaError::IncompleteImage { .. } => Self::IncompleteImage,
            OtaError::StorageReadFailed => Self::StorageReadFailed,
            OtaError::IntegrityMismatch { .. } => Self::IntegrityMismatch,
            OtaError::ActivateFailed => Self::ActivateFailed,
        }
    }
}

impl<T> From<Result<T, OtaError>> for ResultCode {
    fn from(result: Result<T, OtaError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => (&e).into(),
        }
    }
}

impl From<FrameError> for ResultCode {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ChecksumError => Self::ChecksumError,
            FrameError::OutOfRange => Self::OutOfRange,
            _ => Self::UnknownError,
        }
    }
}

impl ResultCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        [
            Self::Ok,
            Self::AlreadyActive,
            Self::EmptyImage,
            Self::CapacityExceeded,
            Self::StorageReserveFailed,
            Self::HeaderTooShort,
            Self::HeaderInvalid,
            Self::StorageWriteFailed,
            Self::ImageOverrun,
            Self::OutOfOrder,
            Self::NoActiveSession,
            Self::IncompleteImage,
            Self::StorageReadFailed,
            Self::IntegrityMismatch,
            Self::ActivateFailed,
            Self::ChecksumError,
            Self::OutOfRange,
            Self::UnknownError,
        ]
        .into_iter()
        .find(|code| *code as u8 == value)
    }
}

pub enum RequestForm<'a> {
    Handshake,
    DeviceInfo,
    StartUpdate(&'a StartUpdateRequestForm),
    WriteChunk(&'a WriteChunkRequestForm),
    EndUpdate,
    AbortUpdate,
    UpdateStatus,
    Reset,
}

pub const fn request_packet_size(command: Command) -> usize {
    match command {
        Command::StartUpdate => core::mem::size_of::<StartUpdateRequestForm>(),
        Command::WriteChunk => core::mem::size_of::<WriteChunkRequestForm>(),
        _ => core::mem::size_of::<BareForm>(),
    }
}

/// Take the request at the start of `packet` apart.
///
/// Returns the request and the number of bytes it occupies.
pub fn parse_request(packet: &[u8]) -> Result<(RequestForm<'_>, usize), FrameError> {
    match packet.first() {
        None => return Err(FrameError::OutOfRange),
        Some(&sof) if sof != Sof::Request as u8 => return Err(FrameError::MissingSof),
        Some(_) => {}
    }

    let cmd = Command::try_from(*packet.get(1).ok_or(FrameError::OutOfRange)?)?;

    let estimated_packet_size = request_packet_size(cmd);

    if packet.len() < estimated_packet_size {
        return Err(FrameError::OutOfRange);
    } else if packet[estimated_packet_size - 1] != EOF_SIGNATURE {
        return Err(FrameError::MissingEof);
    }

    let form = match cmd {
        Command::Handshake => RequestForm::Handshake,
        Command::DeviceInfo => RequestForm::DeviceInfo,
        Command::StartUpdate => RequestForm::StartUpdate(view(packet)?),
        Command::WriteChunk => RequestForm::WriteChunk(view(packet)?),
        Command::EndUpdate => RequestForm::EndUpdate,
        Command::AbortUpdate => RequestForm::AbortUpdate,
        Command::UpdateStatus => RequestForm::UpdateStatus,
        Command::Reset => RequestForm::Reset,
    };

    Ok((form, estimated_packet_size))
}

fn view<T: FromBytes + KnownLayout + Immutable>(packet: &[u8]) -> Result<&T, FrameError> {
    T::ref_from_prefix(packet)
        .map(|(form, _)| form)
        .map_err(|_| FrameError::OutOfRange)
}

/// Serialize `form` into the front of `out`.
pub fn encode<T: IntoBytes + Immutable>(form: &T, out: &mut [u8]) -> Result<usize, FrameError> {
    form.write_to_prefix(out)
        .map_err(|_| FrameError::BufferTooShort)?;
    Ok(core::mem::size_of::<T>())
}

/// Responses protected by the CRC-16 at [`CHECKSUM_OFFSET`].
pub trait Checksummed: IntoBytes + Immutable + Sized {
    fn checksum(&self) -> [u8; 2];
    fn checksum_mut(&mut self) -> &mut [u8; 2];

    fn compute_checksum(&self) -> [u8; 2] {
        let bytes = self.as_bytes();
        frame_crc(&bytes[CHECKSUM_END..bytes.len() - 1]).to_le_bytes()
    }

    fn sealed(mut self) -> Self {
        let checksum = self.compute_checksum();
        *self.checksum_mut() = checksum;
        self
    }

    fn verify(&self) -> bool {
        self.checksum() == self.compute_checksum()
    }
}

macro_rules! checksummed {
    ($($form:ty),+ $(,)?) => {
        $(impl Checksummed for $form {
            fn checksum(&self) -> [u8; 2] {
                self.checksum
            }

            fn checksum_mut(&mut self) -> &mut [u8; 2] {
                &mut self.checksum
            }
        })+
    };
}

/// Frame without fields: most requests, plus the handshake and reset
/// responses.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BareForm {
    pub sof: u8,
    pub command: u8,
    pub eof: u8,
}

impl BareForm {
    pub fn request(command: Command) -> Self {
        Self {
            sof: Sof::Request as u8,
            command: command as u8,
            eof: EOF_SIGNATURE,
        }
    }

    pub fn response(command: Command) -> Self {
        Self {
            sof: Sof::Response as u8,
            command: command as u8,
            eof: EOF_SIGNATURE,
        }
    }
}

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DeviceInfoResponseForm {
    pub sof: u8,
    pub command: u8,
    pub checksum: [u8; 2],
    pub protocol_version: u8,
    /// log2 of the largest WriteChunk payload
    pub payload_exponent: u8,
    pub capacity: [u8; 4],
    pub serial_number: [u8; 12],
    pub eof: u8,
}

impl DeviceInfoResponseForm {
    pub fn new(capacity: u32, serial_number: [u8; 12]) -> Self {
        Self {
            sof: Sof::Response as u8,
            command: Command::DeviceInfo as u8,
            checksum: [0; 2],
            protocol_version: PROTOCOL_VERSION,
            payload_exponent: CHUNK_BIT_IDX as u8,
            capacity: capacity.to_le_bytes(),
            serial_number,
            eof: EOF_SIGNATURE,
        }
        .sealed()
    }
}

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StartUpdateRequestForm {
    pub sof: u8,
    pub command: u8,
    pub total_size: [u8; 4], // little endian
    /// Random per update, picked by the host.
    pub nonce_salt: [u8; 8],
    pub eof: u8,
}

impl StartUpdateRequestForm {
    pub fn new(total_size: u32, nonce_salt: [u8; 8]) -> Self {
        Self {
            sof: Sof::Request as u8,
            command: Command::StartUpdate as u8,
            total_size: total_size.to_le_bytes(),
            nonce_salt,
            eof: EOF_SIGNATURE,
        }
    }

    pub fn total_size(&self) -> u32 {
        u32::from_le_bytes(self.total_size)
    }
}

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StartUpdateResponseForm {
    pub sof: u8,
    pub command: u8,
    pub checksum: [u8; 2],
    pub result: u8,
    /// Nonce the host must encrypt this update's chunks with.
    pub nonce: [u8; 12],
    pub eof: u8,
}

impl StartUpdateResponseForm {
    pub fn new(result: ResultCode, nonce: [u8; 12]) -> Self {
        Self {
            sof: Sof::Response as u8,
            command: Command::StartUpdate as u8,
            checksum: [0; 2],
            result: result as u8,
            nonce,
            eof: EOF_SIGNATURE,
        }
        .sealed()
    }
}

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WriteChunkRequestForm {
    pub sof: u8,
    pub command: u8,
    pub length: [u8; 2],   // little endian
    pub checksum: [u8; 2], // little endian, over payload[..length]
    pub offset: [u8; 4],   // little endian
    pub payload: [u8; WRITE_CHUNK_SIZE],
    pub eof: u8,
}

impl WriteChunkRequestForm {
    /// Host side constructor; `data` is the already encrypted slice.
    pub fn new(offset: u32, data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > WRITE_CHUNK_SIZE {
            return Err(FrameError::OutOfRange);
        }

        let mut payload = [0u8; WRITE_CHUNK_SIZE];
        payload[..data.len()].copy_from_slice(data);

        Ok(Self {
            sof: Sof::Request as u8,
            command: Command::WriteChunk as u8,
            length: (data.len() as u16).to_le_bytes(),
            checksum: frame_crc(data).to_le_bytes(),
            offset: offset.to_le_bytes(),
            payload,
            eof: EOF_SIGNATURE,
        })
    }

    pub fn offset(&self) -> u32 {
        u32::from_le_bytes(self.offset)
    }

    /// The meaningful part of the payload, checksum verified.
    pub fn payload(&self) -> Result<&[u8], FrameError> {
        let length = u16::from_le_bytes(self.length) as usize;
        let data = self.payload.get(..length).ok_or(FrameError::OutOfRange)?;

        if frame_crc(data) != u16::from_le_bytes(self.checksum) {
            return Err(FrameError::ChecksumError);
        }
        Ok(data)
    }
}

/// Response to WriteChunk, EndUpdate and AbortUpdate.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StatusResponseForm {
    pub sof: u8,
    pub command: u8,
    pub checksum: [u8; 2],
    pub result: u8,
    pub eof: u8,
}

impl StatusResponseForm {
    pub fn new(command: Command, result: ResultCode) -> Self {
        Self {
            sof: Sof::Response as u8,
            command: command as u8,
            checksum: [0; 2],
            result: result as u8,
            eof: EOF_SIGNATURE,
        }
        .sealed()
    }
}

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UpdateStatusResponseForm {
    pub sof: u8,
    pub command: u8,
    pub checksum: [u8; 2],
    pub state: u8,
    pub total_size: [u8; 4],
    pub received: [u8; 4],
    /// Version of the image in progress, or of the last activated one.
    pub version: u8,
    pub sub_version: u8,
    pub eof: u8,
}

impl UpdateStatusResponseForm {
    pub fn new(state: SessionState, total_size: u32, received: u32, version: (u8, u8)) -> Self {
        Self {
            sof: Sof::Response as u8,
            command: Command::UpdateStatus as u8,
            checksum: [0; 2],
            state: state as u8,
            total_size: total_size.to_le_bytes(),
            received: received.to_le_bytes(),
            version: version.0,
            sub_version: version.1,
            eof: EOF_SIGNATURE,
        }
        .sealed()
    }
}

checksummed!(
    DeviceInfoResponseForm,
    StartUpdateResponseForm,
    StatusResponseForm,
    UpdateStatusResponseForm,
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_sizes() {
        assert_eq!(request_packet_size(Command::Handshake), 3);
        assert_eq!(request_packet_size(Command::StartUpdate), 15);
        assert_eq!(request_packet_size(Command::WriteChunk), 267);
        assert_eq!(core::mem::size_of::<StatusResponseForm>(), 6);
        assert_eq!(CHUNK_BIT_IDX, 8);
    }

    #[test]
    fn parses_start_update() {
        let req = StartUpdateRequestForm::new(0x1234, [1, 2, 3, 4, 5, 6, 7, 8]);
        let mut packet = [0u8; 16];
        let len = encode(&req, &mut packet).unwrap();
        assert_eq!(
            &packet[..len],
            &[0xAA, 0x30, 0x34, 0x12, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 0xFF]
        );

        match parse_request(&packet) {
            Ok((RequestForm::StartUpdate(form), consumed)) => {
                assert_eq!(form.total_size(), 0x1234);
                assert_eq!(form.nonce_salt, [1, 2, 3, 4, 5, 6, 7, 8]);
                assert_eq!(consumed, 15);
            }
            _ => panic!("not a StartUpdate"),
        }
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(parse_request(&[]).err(), Some(FrameError::OutOfRange));
        assert_eq!(parse_request(&[0x55, 0x01, 0xFF]).err(), Some(FrameError::MissingSof));
        assert_eq!(parse_request(&[0xAA]).err(), Some(FrameError::OutOfRange));
        assert_eq!(parse_request(&[0xAA, 0x77, 0xFF]).err(), Some(FrameError::UnknownCommand));
        assert_eq!(parse_request(&[0xAA, 0x01, 0x00]).err(), Some(FrameError::MissingEof));
        // StartUpdate still being received
        assert_eq!(parse_request(&[0xAA, 0x30, 0x00]).err(), Some(FrameError::OutOfRange));
    }

    #[test]
    fn chunk_payload_checks() {
        let form = WriteChunkRequestForm::new(64, &[1, 2, 3]).unwrap();
        assert_eq!(form.payload(), Ok(&[1u8, 2, 3][..]));
        assert_eq!(form.offset(), 64);

        let mut bad = form.clone();
        bad.payload[1] = 9;
        assert_eq!(bad.payload(), Err(FrameError::ChecksumError));

        let mut long = form;
        long.length = 300u16.to_le_bytes();
        assert_eq!(long.payload(), Err(FrameError::OutOfRange));

        assert!(WriteChunkRequestForm::new(0, &[0u8; 257]).is_err());
    }

    #[test]
    fn responses_are_sealed() {
        let resp = StatusResponseForm::new(Command::EndUpdate, ResultCode::IntegrityMismatch);
        assert!(resp.verify());
        assert_eq!(resp.as_bytes()[4], 0x33);

        let mut tampered = UpdateStatusResponseForm::new(SessionState::HeaderPending, 10, 0, (1, 2));
        assert!(tampered.verify());
        tampered.received[0] = 1;
        assert!(!tampered.verify());
    }

    #[test]
    fn result_codes_map_back() {
        let code: ResultCode = Err::<(), _>(OtaError::NoActiveSession).into();
        assert_eq!(code, ResultCode::NoActiveSession);
        assert_eq!(ResultCode::from_u8(0x33), Some(ResultCode::IntegrityMismatch));
        assert_eq!(ResultCode::from_u8(0x99), None);
    }
}
