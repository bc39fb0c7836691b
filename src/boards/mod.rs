/*
 * SPDX-FileCopyrightText: © 2023 Jinwoo Park (pmnxis@gmail.com)
 *
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

use core::cell::UnsafeCell;

use bankswap_ota::config::APP_HDR_TAG;
use bankswap_ota::{AppHeader, ChecksumEngine, DeviceIdentity, OtaConfig, StdCrc, HEADER_SIZE};
use embassy_stm32::flash::{Blocking, FlashLayout, FLASH_BASE, FLASH_SIZE};
use embassy_stm32::gpio::{AnyPin, Input};
use embassy_stm32::peripherals;
use embassy_stm32::usart::{BufferedUartRx, BufferedUartTx};

#[cfg(feature = "hw_billmock_mini_0v5")]
use self::billmock_mini_0v5::*;

#[cfg(feature = "hw_billmock_mini_0v5")]
mod billmock_mini_0v5;

mod board_flash;

pub use board_flash::BoardFlash;

const BOOTLOADER_ORIGIN: usize = env_to_array::hex_env_to_usize!("FLASH_ORIGIN");
const BOOTLOADER_LENGTH: usize = env_to_array::hex_env_to_usize!("FLASH_LENGTH");

/// Offset of the application region from `FLASH_BASE`, right after the
/// bootloader.
pub const REMAIN_OFFSET: usize = BOOTLOADER_ORIGIN + BOOTLOADER_LENGTH - FLASH_BASE;
pub const REMAIN_SIZE: usize = FLASH_SIZE - REMAIN_OFFSET;

pub struct Hardware<'s> {
    pub flash: UnsafeCell<FlashLayout<'s, Blocking>>,
    pub tx: UnsafeCell<BufferedUartTx<'static, peripherals::USART2>>,
    pub rx: UnsafeCell<BufferedUartRx<'static, peripherals::USART2>>,
    pub force_bootloader: UnsafeCell<Input<'static, AnyPin>>,
}

impl Hardware<'static> {
    /// Initialize MCU PLL and CPU on init hardware
    pub fn mcu_pre_init() -> embassy_stm32::Peripherals {
        embassy_stm32::init(Default::default())
    }

    /// Initialize MCU peripherals and nearby components
    #[inline]
    fn hardware_init<'s>(peripherals: embassy_stm32::Peripherals) -> Hardware<'s> {
        hardware_specific_init(peripherals)
    }
}

pub struct Board<'s> {
    pub hardware: Hardware<'s>,
}

impl Board<'static> {
    pub fn init() -> Self {
        let peripherals = Hardware::mcu_pre_init();

        Self {
            hardware: Hardware::hardware_init(peripherals),
        }
    }

    pub fn identity() -> DeviceIdentity {
        DeviceIdentity {
            serial_number: serial_number(),
            key: [0x42; 32], // fill any key.
        }
    }

    /// Images are linked for, and written to, the application region.
    pub fn ota_config() -> OtaConfig {
        OtaConfig::new(APP_HDR_TAG, (FLASH_BASE + REMAIN_OFFSET) as u32)
    }
}

/// Header of the image in the application region, when it is complete and
/// intact.
pub fn resident_image() -> Option<AppHeader> {
    let base = FLASH_BASE + REMAIN_OFFSET;
    // SAFETY: the application region is memory mapped and never written
    // while the bootloader runs this check.
    let region = unsafe { core::slice::from_raw_parts(base as *const u8, REMAIN_SIZE) };

    let header = AppHeader::parse(region)?;
    header.check_resident(&Board::ota_config(), &StdCrc).ok()?;

    let code_end = HEADER_SIZE.checked_add(header.code_length() as usize)?;
    let payload = region.get(HEADER_SIZE..code_end)?;
    if StdCrc.once(payload) != header.code_crc() {
        return None;
    }

    header.vector_table()?;
    Some(header)
}

/// Start the application whose vector table sits at `header.start_entry`.
///
/// # Safety
/// `header` must come from [`resident_image`].
pub unsafe fn jump_to_app(header: &AppHeader) -> ! {
    let vector_table = header.info.start_entry.get();

    #[allow(unused_mut)]
    let mut p = cortex_m::Peripherals::steal();
    p.SCB.vtor.write(vector_table);

    cortex_m::asm::bootload(vector_table as *const u32)
}
