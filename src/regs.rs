//! Controller register map and the access seam
//!
//! Everything the driver does to the peripheral goes through
//! [`CanRegisters`], expressed as 32-bit word accesses at byte offsets from
//! the controller base. On hardware the implementation is a thin volatile
//! MMIO wrapper; the test build substitutes a simulated register bank.

use core::ptr;

pub const MCR: u32 = 0x00;
pub const CTRL1: u32 = 0x04;
pub const TIMER: u32 = 0x08;
pub const RXMGMASK: u32 = 0x10;
pub const RX14MASK: u32 = 0x14;
pub const RX15MASK: u32 = 0x18;
pub const ECR: u32 = 0x1C;
pub const ESR1: u32 = 0x20;
pub const IMASK2: u32 = 0x24;
pub const IMASK1: u32 = 0x28;
pub const IFLAG2: u32 = 0x2C;
pub const IFLAG1: u32 = 0x30;
pub const CTRL2: u32 = 0x34;
pub const RXFGMASK: u32 = 0x48;
pub const CBT: u32 = 0x50;
pub const MB_BASE: u32 = 0x80;
pub const FIFO_FILTER_BASE: u32 = 0xE0;
pub const RXIMR_BASE: u32 = 0x880;
pub const FDCTRL: u32 = 0xC00;
pub const FDCBT: u32 = 0xC04;

pub mod mcr {
    pub const MDIS: u32 = 1 << 31;
    pub const FRZ: u32 = 1 << 30;
    pub const RFEN: u32 = 1 << 29;
    pub const HALT: u32 = 1 << 28;
    pub const NOTRDY: u32 = 1 << 27;
    pub const WAKMSK: u32 = 1 << 26;
    pub const SOFTRST: u32 = 1 << 25;
    pub const FRZACK: u32 = 1 << 24;
    pub const SUPV: u32 = 1 << 23;
    pub const SLFWAK: u32 = 1 << 22;
    pub const WRNEN: u32 = 1 << 21;
    pub const LPMACK: u32 = 1 << 20;
    pub const WAKSRC: u32 = 1 << 19;
    pub const SRXDIS: u32 = 1 << 17;
    pub const IRMQ: u32 = 1 << 16;
    pub const LPRIOEN: u32 = 1 << 13;
    pub const AEN: u32 = 1 << 12;
    pub const FDEN: u32 = 1 << 11;
    pub const IDAM_MASK: u32 = 0x3 << 8;
    pub const MAXMB_MASK: u32 = 0x7F;
}

pub mod ctrl1 {
    pub const PRESDIV_SHIFT: u32 = 24;
    pub const RJW_SHIFT: u32 = 22;
    pub const PSEG1_SHIFT: u32 = 19;
    pub const PSEG2_SHIFT: u32 = 16;
    pub const BOFFMSK: u32 = 1 << 15;
    pub const CLKSRC: u32 = 1 << 13;
    pub const LPB: u32 = 1 << 12;
    pub const BOFFREC: u32 = 1 << 6;
    pub const TSYN: u32 = 1 << 5;
    pub const LOM: u32 = 1 << 3;
    pub const PROPSEG_MASK: u32 = 0x7;
}

pub mod esr1 {
    pub const WAKINT: u32 = 1 << 0;
    pub const ERRINT: u32 = 1 << 1;
    pub const BOFFINT: u32 = 1 << 2;
}

pub mod ctrl2 {
    pub const RRS: u32 = 1 << 17;
    pub const EACEN: u32 = 1 << 16;
    pub const TASD_SHIFT: u32 = 19;
}

pub mod cbt {
    pub const BTF: u32 = 1 << 31;
    pub const EPRESDIV_SHIFT: u32 = 21;
    pub const ERJW_SHIFT: u32 = 16;
    pub const EPROPSEG_SHIFT: u32 = 10;
    pub const EPSEG1_SHIFT: u32 = 5;
    pub const EPSEG2_SHIFT: u32 = 0;
}

pub mod fdcbt {
    pub const FPRESDIV_SHIFT: u32 = 20;
    pub const FRJW_SHIFT: u32 = 16;
    pub const FPROPSEG_SHIFT: u32 = 10;
    pub const FPSEG1_SHIFT: u32 = 5;
    pub const FPSEG2_SHIFT: u32 = 0;
}

pub mod fdctrl {
    pub const FDRATE: u32 = 1 << 31;
    pub const MBDSR0_SHIFT: u32 = 16;
}

/// Word access to one controller's register block.
///
/// All offsets are byte offsets from the controller base and 32-bit aligned.
pub trait CanRegisters {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, value: u32);

    fn modify<F: FnOnce(u32) -> u32>(&self, offset: u32, f: F) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }

    fn set_bits(&self, offset: u32, mask: u32) {
        self.modify(offset, |value| value | mask);
    }

    fn clear_bits(&self, offset: u32, mask: u32) {
        self.modify(offset, |value| value & !mask);
    }

    fn read_bits(&self, offset: u32, mask: u32) -> bool {
        self.read(offset) & mask != 0
    }
}

/// Memory-mapped register block of a real controller.
pub struct MmioRegisters {
    base: *mut u32,
}

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must be the base address of a CAN controller register block
    /// that stays mapped for the lifetime of the driver, and no other code
    /// may access it concurrently outside the driver's critical sections.
    pub const unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

impl CanRegisters for MmioRegisters {
    fn read(&self, offset: u32) -> u32 {
        unsafe { ptr::read_volatile(self.base.add((offset >> 2) as usize)) }
    }

    fn write(&self, offset: u32, value: u32) {
        unsafe { ptr::write_volatile(self.base.add((offset >> 2) as usize), value) }
    }
}

// The driver is handed to interrupt handlers; the raw pointer itself is
// just an address.
unsafe impl Send for MmioRegisters {}
