//! SCSI-2 CD-ROM drive core for PC Engine CD and PC-FX emulation.
//!
//! The host CPU drives the bus through the signal latches (`set_db`, `set_ack`, ...) and
//! clocks the drive with [`ScsiCd::run`]; everything the drive produces flows back out
//! synchronously through the [`Host`] trait: edge interrupts, decoded subchannel bytes and
//! CD-DA impulses mixed into the host's high-rate audio buffers. The disc image itself
//! lives behind [`DiscBackend`].

mod bitwise;
pub mod bus;
mod cdda;
pub mod commands;
mod debug;
mod disc;
mod drive;
mod error;
mod fifo;
mod mode_pages;
mod pce;
pub mod subq;
mod toc;

#[cfg(test)]
mod test;

pub use cdda::{PlayMode, PlayStatus};
pub use disc::{DiscBackend, RAW_SECTOR_SIZE};
pub use drive::{
    CycleCount, DriveKind, Host, ScsiCd, IRQ_DATA_TRANSFER_DONE, IRQ_DATA_TRANSFER_READY,
    IRQ_DEASSERT, IRQ_MAGICAL_REQ,
};
pub use error::{CdError, Result};
pub use toc::{amsf_to_lba, lba_to_amsf, Toc, TocEntry};
