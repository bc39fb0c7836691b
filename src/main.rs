/*
 * SPDX-FileCopyrightText: © 2023 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

#![no_main]
#![no_std]

mod boards;

use bankswap_ota::types::ota::FrameError;
use bankswap_ota::{SerialUpdater, UpdateSession};
use cortex_m_rt::entry;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::InputPin;
use embedded_io::{Read, Write};
use panic_abort as _;
use static_cell::StaticCell;

use crate::boards::{jump_to_app, resident_image, Board, BoardFlash};

/// An update with no traffic for this long is dropped on the next frame.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

static BOARD: StaticCell<Board<'static>> = StaticCell::new();

fn update_requested(force_pin: &mut impl InputPin) -> bool {
    // pulled up, low when the button is held
    force_pin.is_low().unwrap_or(true)
}

fn consume(buf: &mut [u8], filled: &mut usize, n: usize) {
    buf.copy_within(n..*filled, 0);
    *filled -= n;
}

#[entry]
fn main() -> ! {
    let board = BOARD.init(Board::init());

    let force_pin = unsafe { &mut *board.hardware.force_bootloader.get() };
    if !update_requested(force_pin) {
        if let Some(header) = resident_image() {
            unsafe { jump_to_app(&header) }
        }
    }

    let rx = unsafe { &mut *board.hardware.rx.get() };
    let tx = unsafe { &mut *board.hardware.tx.get() };
    let flash = unsafe { &mut *board.hardware.flash.get() };

    let session = UpdateSession::new(BoardFlash::new(flash), Board::ota_config());
    let mut updater = SerialUpdater::new(session, Board::identity());

    let mut rx_buf: [u8; 1024] = [0; 1024];
    let mut tx_buf: [u8; 64] = [0; 64];
    let mut filled = 0;
    let mut last_activity = Instant::now();

    loop {
        match rx.read(&mut rx_buf[filled..]) {
            Ok(n) => filled += n,
            Err(_) => {
                filled = 0;
                continue;
            }
        }

        if updater.session().is_active() && last_activity.elapsed() > SESSION_IDLE_TIMEOUT {
            let _ = updater.session_mut().abort();
        }
        last_activity = Instant::now();

        while filled > 0 {
            match updater.handle(&rx_buf[..filled], &mut tx_buf) {
                Ok(reply) => {
                    let _ = tx.write_all(&tx_buf[..reply.len]);
                    let _ = tx.flush();
                    consume(&mut rx_buf, &mut filled, reply.consumed);

                    if reply.reset {
                        cortex_m::peripheral::SCB::sys_reset();
                    }
                }
                // frame not complete yet
                Err(FrameError::OutOfRange) => break,
                // resync on the next start of frame
                Err(_) => consume(&mut rx_buf, &mut filled, 1),
            }
        }

        if filled == rx_buf.len() {
            filled = 0;
        }
    }
}
