/*
 * SPDX-FileCopyrightText: © 2025 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

use bankswap_ota::FlashStorage;
use embassy_stm32::flash::{Blocking, Error, FlashLayout};

use super::{REMAIN_OFFSET, REMAIN_SIZE};

/// STM32G0 programs double words and erases 2 KiB pages.
const WRITE_SIZE: usize = 8;
const PAGE_SIZE: usize = 2048;

/// Application region behind the bootloader.
///
/// The image is executed in place, so there is no bank to swap: once the
/// session verified the region, activation only has to commit the staged
/// tail. A failed program leaves the region unusable until the next
/// successful update.
pub struct BoardFlash<'d> {
    flash: &'d mut FlashLayout<'static, Blocking>,
    cursor: u32,
    tail: [u8; WRITE_SIZE],
    tail_len: usize,
}

impl<'d> BoardFlash<'d> {
    pub fn new(flash: &'d mut FlashLayout<'static, Blocking>) -> Self {
        Self {
            flash,
            cursor: 0,
            tail: [0xFF; WRITE_SIZE],
            tail_len: 0,
        }
    }

    fn program(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.flash
            .bank1_region
            .blocking_write(REMAIN_OFFSET as u32 + self.cursor, bytes)?;
        self.cursor += bytes.len() as u32;
        Ok(())
    }
}

impl FlashStorage for BoardFlash<'_> {
    type Error = Error;

    fn capacity(&self) -> usize {
        REMAIN_SIZE
    }

    fn reserve(&mut self, len: usize) -> Result<(), Error> {
        let erase_len = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        if erase_len > REMAIN_SIZE {
            return Err(Error::Size);
        }

        self.flash.bank1_region.blocking_erase(
            REMAIN_OFFSET as u32,
            (REMAIN_OFFSET + erase_len) as u32,
        )?;
        self.cursor = 0;
        self.tail_len = 0;
        Ok(())
    }

    fn append(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        if self.tail_len > 0 {
            let take = (WRITE_SIZE - self.tail_len).min(bytes.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&bytes[..take]);
            self.tail_len += take;
            bytes = &bytes[take..];

            if self.tail_len < WRITE_SIZE {
                return Ok(());
            }
            let tail = self.tail;
            self.program(&tail)?;
            self.tail_len = 0;
        }

        let aligned = bytes.len() - bytes.len() % WRITE_SIZE;
        if aligned > 0 {
            self.program(&bytes[..aligned])?;
        }

        let rest = &bytes[aligned..];
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.tail_len == 0 {
            return Ok(());
        }

        let mut tail = self.tail;
        tail[self.tail_len..].fill(0xFF);
        self.program(&tail)?;
        self.tail_len = 0;
        Ok(())
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.flash
            .bank1_region
            .blocking_read((REMAIN_OFFSET + offset) as u32, buf)
    }

    fn activate(&mut self) -> Result<(), Error> {
        self.flush()?;
        log::info!("application region committed, {} bytes", self.cursor);
        Ok(())
    }
}
