/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

use thiserror::Error;

/// Inactive flash bank as seen by an update session.
///
/// Writes are strictly sequential; the backend keeps its own cursor.
pub trait FlashStorage {
    type Error: core::fmt::Debug;

    /// Bytes available for an image (header included).
    fn capacity(&self) -> usize;

    /// Erase/prepare the bank for `len` bytes and rewind the write cursor.
    fn reserve(&mut self, len: usize) -> Result<(), Self::Error>;

    /// Program `bytes` at the write cursor.
    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Commit anything `append` staged, e.g. a tail shorter than the
    /// program granularity. Called before readback.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Read back persisted bytes, `offset` relative to the bank start.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Make the new image bootable (bank swap).
    fn activate(&mut self) -> Result<(), Self::Error>;
}

impl<T: FlashStorage + ?Sized> FlashStorage for &mut T {
    type Error = T::Error;

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn reserve(&mut self, len: usize) -> Result<(), Self::Error> {
        (**self).reserve(len)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        (**self).append(bytes)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (**self).flush()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(offset, buf)
    }

    fn activate(&mut self) -> Result<(), Self::Error> {
        (**self).activate()
    }
}

pub const ERASED: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RamFlashError {
    #[error("bank not reserved")]
    NotReserved,
    #[error("access past the reserved area")]
    OutOfBounds,
    #[error("injected fault")]
    Injected,
}

/// RAM backed bank, for staging images in SRAM and for host tests.
///
/// Faults can be armed to exercise the session's error paths.
pub struct RamFlash<const N: usize> {
    mem: [u8; N],
    reserved: Option<usize>,
    cursor: usize,
    activations: usize,
    fail_reserve: bool,
    fail_append: bool,
    fail_read: bool,
    fail_activate: bool,
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamFlash<N> {
    pub const fn new() -> Self {
        Self {
            mem: [ERASED; N],
            reserved: None,
            cursor: 0,
            activations: 0,
            fail_reserve: false,
            fail_append: false,
            fail_read: false,
            fail_activate: false,
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.mem[..self.cursor]
    }

    pub fn written(&self) -> usize {
        self.cursor
    }

    pub fn activations(&self) -> usize {
        self.activations
    }

    /// Flip every bit of an already programmed byte.
    pub fn corrupt(&mut self, offset: usize) {
        self.mem[offset] ^= 0xFF;
    }

    pub fn fail_reserve(&mut self, fail: bool) {
        self.fail_reserve = fail;
    }

    pub fn fail_append(&mut self, fail: bool) {
        self.fail_append = fail;
    }

    pub fn fail_read(&mut self, fail: bool) {
        self.fail_read = fail;
    }

    pub fn fail_activate(&mut self, fail: bool) {
        self.fail_activate = fail;
    }
}

impl<const N: usize> FlashStorage for RamFlash<N> {
    type Error = RamFlashError;

    fn capacity(&self) -> usize {
        N
    }

    fn reserve(&mut self, len: usize) -> Result<(), Self::Error> {
        if self.fail_reserve {
            return Err(RamFlashError::Injected);
        }
        if len > N {
            return Err(RamFlashError::OutOfBounds);
        }

        self.mem[..len].fill(ERASED);
        self.reserved = Some(len);
        self.cursor = 0;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_append {
            return Err(RamFlashError::Injected);
        }
        let limit = self.reserved.ok_or(RamFlashError::NotReserved)?;
        let end = self.cursor + bytes.len();
        if end > limit {
            return Err(RamFlashError::OutOfBounds);
        }

        self.mem[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_read {
            return Err(RamFlashError::Injected);
        }
        let limit = self.reserved.ok_or(RamFlashError::NotReserved)?;
        let end = offset + buf.len();
        if end > limit {
            return Err(RamFlashError::OutOfBounds);
        }

        buf.copy_from_slice(&self.mem[offset..end]);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), Self::Error> {
        if self.fail_activate {
            return Err(RamFlashError::Injected);
        }
        self.reserved.ok_or(RamFlashError::NotReserved)?;

        self.activations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserve_erases_and_rewinds() {
        let mut flash = RamFlash::<16>::new();
        flash.reserve(8).unwrap();
        flash.append(&[1, 2, 3]).unwrap();
        assert_eq!(flash.contents(), &[1, 2, 3]);

        flash.reserve(8).unwrap();
        assert_eq!(flash.written(), 0);
        let mut buf = [0u8; 3];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 3]);
    }

    #[test]
    fn append_is_bounded_by_reservation() {
        let mut flash = RamFlash::<16>::new();
        assert_eq!(flash.append(&[0]), Err(RamFlashError::NotReserved));

        flash.reserve(4).unwrap();
        flash.append(&[0; 3]).unwrap();
        assert_eq!(flash.append(&[0; 2]), Err(RamFlashError::OutOfBounds));
        assert_eq!(flash.written(), 3);
    }

    #[test]
    fn injected_faults() {
        let mut flash = RamFlash::<16>::new();
        flash.fail_reserve(true);
        assert_eq!(flash.reserve(4), Err(RamFlashError::Injected));
        flash.fail_reserve(false);
        flash.reserve(4).unwrap();

        flash.fail_activate(true);
        assert_eq!(flash.activate(), Err(RamFlashError::Injected));
        assert_eq!(flash.activations(), 0);
        flash.fail_activate(false);
        flash.activate().unwrap();
        assert_eq!(flash.activations(), 1);
    }
}
