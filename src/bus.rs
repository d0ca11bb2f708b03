//! SCSI bus state: one 16 bit word of signal levels plus the 8 bit data latch.

/// Signal masks within `CdBus::signals`. The low byte is driven by the drive, the high byte
/// is latched from the host ("initiator") side.
pub mod signal {
    pub const BSY: u16 = 0x001;
    pub const REQ: u16 = 0x002;
    pub const MSG: u16 = 0x004;
    pub const CD: u16 = 0x008;
    pub const IO: u16 = 0x010;

    pub const ACK: u16 = 0x100;
    pub const RST: u16 = 0x200;
    pub const SEL: u16 = 0x400;
    pub const ATN: u16 = 0x800;
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct CdBus {
    /// Current signal levels
    pub signals: u16,
    /// Data bus latch
    pub db: u8,
}

impl CdBus {
    pub fn new() -> CdBus {
        CdBus { signals: 0, db: 0 }
    }

    pub fn is_set(&self, mask: u16) -> bool {
        self.signals & mask != 0
    }

    pub(crate) fn set(&mut self, mask: u16, level: bool) {
        self.signals &= !mask;
        if level {
            self.signals |= mask;
        }
    }

    pub fn bsy(&self) -> bool {
        self.is_set(signal::BSY)
    }

    pub fn req(&self) -> bool {
        self.is_set(signal::REQ)
    }

    pub fn msg(&self) -> bool {
        self.is_set(signal::MSG)
    }

    pub fn cd(&self) -> bool {
        self.is_set(signal::CD)
    }

    pub fn io(&self) -> bool {
        self.is_set(signal::IO)
    }

    pub fn ack(&self) -> bool {
        self.is_set(signal::ACK)
    }

    pub fn rst(&self) -> bool {
        self.is_set(signal::RST)
    }

    pub fn sel(&self) -> bool {
        self.is_set(signal::SEL)
    }

    pub fn atn(&self) -> bool {
        self.is_set(signal::ATN)
    }
}

/// SCSI bus phase. The direction signals (IO, CD, MSG) fully determine which side drives the
/// data bus in every phase but BusFree.
#[derive(serde::Serialize, serde::Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    BusFree,
    Command,
    DataIn,
    DataOut,
    Status,
    MessageIn,
    MessageOut,
}
