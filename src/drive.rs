//! The emulated drive: signal handling, phase machine, sector read scheduler and save
//! states. The host CPU latches bus signals at any time, everything is acted upon from
//! `run`.

use arrayref::array_ref;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bus::{signal, CdBus, Phase};
use crate::cdda::{self, Cdda, PlayStatus};
use crate::commands;
use crate::disc::{DiscBackend, RAW_SECTOR_SIZE};
use crate::error::{CdError, Result};
use crate::fifo::Fifo;
use crate::mode_pages::{self, ModePages, NUM_MODE_PAGES};
use crate::scsi_debug;
use crate::subq::SubChannel;
use crate::toc::Toc;

pub type CycleCount = i32;

/// Which machine the drive is wired into. This selects the command set, the status byte
/// encoding and the data FIFO size.
#[derive(serde::Serialize, serde::Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriveKind {
    Pce,
    Pcfx,
}

/// IRQ codes passed to `Host::irq`
pub const IRQ_DATA_TRANSFER_DONE: u16 = 0x0001;
pub const IRQ_DATA_TRANSFER_READY: u16 = 0x0002;
pub const IRQ_MAGICAL_REQ: u16 = 0x0004;
/// OR'd into DONE/READY codes delivered on a phase transition to signal deassertion
pub const IRQ_DEASSERT: u16 = 0x8000;

/// Host-side resources the drive drives synchronously while it runs: edge interrupts,
/// decoded subchannel bytes and the two high-rate audio accumulators.
pub trait Host {
    /// Edge notification, one of the `IRQ_*` codes
    fn irq(&mut self, code: u16);

    /// One subchannel byte every six CD-DA samples. Negative indexes stand for the sync
    /// area, the system-specific code decides what those look like.
    fn subchannel_byte(&mut self, byte: u8, index: i32);

    /// Left and right high-rate sample accumulators, clocked at the host CPU frequency.
    /// Both must be at least `0x10000 + 8` entries long. Return None to skip audio
    /// synthesis entirely.
    fn high_rate_buffers(&mut self) -> Option<[&mut [i32]; 2]>;
}

/// Pending sense data, set by a CHECK CONDITION and cleared only by REQUEST SENSE
#[derive(serde::Serialize, serde::Deserialize, Copy, Clone, Default)]
pub(crate) struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub fru: u8,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct ScsiCd {
    kind: DriveKind,
    pub(crate) bus: CdBus,
    pub(crate) phase: Phase,
    last_rst: bool,
    /// The pending message to send in the message phase
    pub(crate) message_pending: u8,
    status_sent: bool,
    message_sent: bool,
    pub(crate) sense: Sense,
    #[serde(with = "serde_big_array::BigArray")]
    pub(crate) command_buffer: [u8; 256],
    command_pos: u8,
    /// False if not all pending data is in the FIFO, true if it is. Used for multiple
    /// sector reads.
    pub(crate) data_transfer_done: bool,
    /// Host to drive buffer, used to stage the MODE SELECT payload
    #[serde(with = "serde_big_array::BigArray")]
    pub(crate) data_out: [u8; 256],
    pub(crate) data_out_pos: u8,
    pub(crate) data_out_want: u8,
    pub(crate) disc_changed: bool,
    pub(crate) subq: SubChannel,
    pub(crate) din: Fifo,
    pub(crate) mode_pages: ModePages,
    pub(crate) cdda: Cdda,

    /// Countdown until the next data sector lands in `din`, 0 when no read is in flight
    pub(crate) read_timer: CycleCount,
    pub(crate) sector_addr: u32,
    pub(crate) sector_count: u32,

    /// Current playback window, `[read_sec_start, read_sec_end)`, cursor at `read_sec`
    pub(crate) read_sec_start: u32,
    pub(crate) read_sec: u32,
    pub(crate) read_sec_end: u32,

    last_ts: u32,
    pub(crate) monotonic_ts: i64,
    /// Monotonic date of the last PCE audio track search, for the repeat-seek window
    pub(crate) last_track_search_ts: i64,

    pub(crate) transfer_rate: u32,
    pub(crate) host_clock: u32,

    #[serde(skip)]
    pub(crate) disc: Option<Box<dyn DiscBackend + Send>>,
    #[serde(skip)]
    pub(crate) tray_open: bool,
    #[serde(skip)]
    pub(crate) toc: Toc,
}

impl ScsiCd {
    /// Build a powered-down drive. `cdda_time_div` relates the host clock to the high-rate
    /// buffer sample index, `transfer_rate` is the declared data rate in bytes per second.
    pub fn new(
        kind: DriveKind,
        cdda_time_div: i32,
        transfer_rate: u32,
        host_clock: u32,
    ) -> ScsiCd {
        // 30 million, sanity check
        assert!(host_clock < 30_000_000);

        let din_size = match kind {
            DriveKind::Pcfx => 65536,
            DriveKind::Pce => 2048,
        };

        let mut cd = ScsiCd {
            kind,
            bus: CdBus::new(),
            phase: Phase::BusFree,
            last_rst: false,
            message_pending: 0,
            status_sent: false,
            message_sent: false,
            sense: Sense::default(),
            command_buffer: [0; 256],
            command_pos: 0,
            data_transfer_done: false,
            data_out: [0; 256],
            data_out_pos: 0,
            data_out_want: 0,
            disc_changed: false,
            subq: SubChannel::new(),
            din: Fifo::new(din_size),
            mode_pages: ModePages::new(),
            cdda: Cdda::new(cdda_time_div, host_clock),
            read_timer: 0,
            sector_addr: 0,
            sector_count: 0,
            read_sec_start: 0,
            read_sec: 0,
            read_sec_end: !0,
            last_ts: 0,
            monotonic_ts: 0,
            last_track_search_ts: 0,
            transfer_rate,
            host_clock,
            disc: None,
            tray_open: true,
            toc: Toc::default(),
        };

        cd.cdda.fix_out_port_volumes();

        cd
    }

    pub fn kind(&self) -> DriveKind {
        self.kind
    }

    pub fn bus(&self) -> &CdBus {
        &self.bus
    }

    pub fn current_phase(&self) -> Phase {
        self.phase
    }

    pub fn disc_present(&self) -> bool {
        self.disc.is_some()
    }

    pub fn is_tray_open(&self) -> bool {
        self.tray_open
    }

    pub fn set_transfer_rate(&mut self, transfer_rate: u32) {
        self.transfer_rate = transfer_rate;
    }

    /// Cold boot: clear everything, re-read the TOC if a disc is loaded and settle on the
    /// bus-free phase
    pub fn power(&mut self, host: &mut dyn Host, system_timestamp: u32) {
        self.bus = CdBus::new();
        self.last_rst = false;
        self.message_pending = 0;
        self.status_sent = false;
        self.message_sent = false;
        self.sense = Sense::default();
        self.command_buffer = [0; 256];
        self.command_pos = 0;
        self.data_transfer_done = false;
        self.disc_changed = false;
        self.subq.clear();

        self.monotonic_ts = i64::from(system_timestamp);

        if !self.tray_open {
            if let Some(disc) = self.disc.as_mut() {
                self.toc = disc.read_toc();
            }
        }

        self.phase = Phase::BusFree;

        self.virtual_reset(host);
    }

    /// Rebase the run timestamp, called when the host rewinds its own clock
    pub fn reset_ts(&mut self, ts_base: u32) {
        self.last_ts = ts_base;
    }

    /// Update the tray/disc pairing. Closing the tray over a disc re-reads the TOC and
    /// (unless `no_side_effects` is set, as when reloading a save state) flags the disc
    /// change so the next medium-gated command reports UNIT ATTENTION.
    pub fn set_disc(
        &mut self,
        tray_open: bool,
        disc: Option<Box<dyn DiscBackend + Send>>,
        no_side_effects: bool,
    ) {
        self.disc = disc;

        if self.tray_open && !tray_open {
            // Closing the tray
            self.tray_open = false;

            if let Some(disc) = self.disc.as_mut() {
                self.toc = disc.read_toc();

                if !no_side_effects {
                    self.subq.clear();
                    self.disc_changed = true;
                }
            }
        } else if !self.tray_open && tray_open {
            // Opening the tray
            self.tray_open = true;
        }
    }

    /// Open the tray and hand the disc back to the host
    pub fn eject_disc(&mut self) -> Option<Box<dyn DiscBackend + Send>> {
        self.tray_open = true;

        self.disc.take()
    }

    pub fn set_db(&mut self, data: u8) {
        self.bus.db = data;
    }

    pub fn set_ack(&mut self, set: bool) {
        self.bus.set(signal::ACK, set);
    }

    pub fn set_sel(&mut self, set: bool) {
        self.bus.set(signal::SEL, set);
    }

    pub fn set_rst(&mut self, set: bool) {
        self.bus.set(signal::RST, set);
    }

    pub fn set_atn(&mut self, set: bool) {
        self.bus.set(signal::ATN, set);
    }

    /// The CD-DA sample pair currently latched on the output, (0, 0) when fully stopped
    pub fn cdda_values(&self) -> (i16, i16) {
        if self.cdda.status != PlayStatus::Stopped {
            (self.cdda.sr[0], self.cdda.sr[1])
        } else {
            (0, 0)
        }
    }

    /// Per-channel master volume, 1.0 = full scale
    pub fn set_cdda_volume(&mut self, left: f64, right: f64) {
        self.cdda.volume[0] = (65536.0 * left) as i32;
        self.cdda.volume[1] = (65536.0 * right) as i32;

        for v in self.cdda.volume.iter_mut() {
            if *v > 65536 {
                warn!("CD-DA volume too large: {}", *v);
                *v = 65536;
            }
        }

        self.cdda.fix_out_port_volumes();
    }

    pub(crate) fn set_req(&mut self, host: &mut dyn Host, set: bool) {
        if set && !self.bus.req() {
            host.irq(IRQ_MAGICAL_REQ);
        }

        self.bus.set(signal::REQ, set);
    }

    pub(crate) fn change_phase(&mut self, host: &mut dyn Host, new_phase: Phase) {
        scsi_debug!("phase {:?} -> {:?}", self.phase, new_phase);

        match new_phase {
            Phase::BusFree => {
                self.bus.set(signal::BSY, false);
                self.bus.set(signal::MSG, false);
                self.bus.set(signal::CD, false);
                self.bus.set(signal::IO, false);
                self.set_req(host, false);

                host.irq(IRQ_DEASSERT | IRQ_DATA_TRANSFER_DONE);
            }
            // Drive to host
            Phase::DataIn => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, false);
                self.bus.set(signal::CD, false);
                self.bus.set(signal::IO, true);
                // REQ is asserted per-byte once data lands in the FIFO
                self.set_req(host, false);
            }
            Phase::Status => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, false);
                self.bus.set(signal::CD, true);
                self.bus.set(signal::IO, true);
                self.set_req(host, true);
            }
            Phase::MessageIn => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, true);
                self.bus.set(signal::CD, true);
                self.bus.set(signal::IO, true);
                self.set_req(host, true);
            }
            // Host to drive
            Phase::DataOut => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, false);
                self.bus.set(signal::CD, false);
                self.bus.set(signal::IO, false);
                self.set_req(host, true);
            }
            Phase::Command => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, false);
                self.bus.set(signal::CD, true);
                self.bus.set(signal::IO, false);
                self.set_req(host, true);
            }
            Phase::MessageOut => {
                self.bus.set(signal::BSY, true);
                self.bus.set(signal::MSG, true);
                self.bus.set(signal::CD, true);
                self.bus.set(signal::IO, false);
                self.set_req(host, true);
            }
        }

        self.phase = new_phase;
    }

    pub(crate) fn send_status_and_message(&mut self, host: &mut dyn Host, status: u8, message: u8) {
        // This should never ever happen, but that doesn't mean it won't
        if !self.din.is_empty() {
            warn!("{} bytes still in the data FIFO", self.din.in_count());
            self.din.flush();
        }

        self.message_pending = message;

        self.status_sent = false;
        self.message_sent = false;

        self.bus.db = match self.kind {
            DriveKind::Pce => {
                if status == commands::STATUS_GOOD || status == commands::STATUS_CONDITION_MET {
                    0x00
                } else {
                    0x01
                }
            }
            DriveKind::Pcfx => status << 1,
        };

        self.change_phase(host, Phase::Status);
    }

    pub(crate) fn command_check_condition(
        &mut self,
        host: &mut dyn Host,
        key: u8,
        asc: u8,
        ascq: u8,
    ) {
        self.sense = Sense {
            key,
            asc,
            ascq,
            fru: 0x00,
        };

        self.send_status_and_message(host, commands::STATUS_CHECK_CONDITION, 0x00);
    }

    pub(crate) fn do_simple_data_in(&mut self, host: &mut dyn Host, data: &[u8]) {
        self.din.write(data);

        self.data_transfer_done = true;

        self.change_phase(host, Phase::DataIn);
    }

    /// Run the backend's error correction over a freshly read data sector, raising a
    /// MEDIUM ERROR and dropping the transfer if it's uncorrectable
    pub(crate) fn validate_raw_data_sector(&mut self, host: &mut dyn Host, data: &mut [u8]) -> bool {
        let valid = self
            .disc
            .as_mut()
            .map_or(false, |d| d.validate_raw_sector(&mut data[..2352]));

        if !valid {
            self.din.flush();
            self.data_transfer_done = false;

            self.command_check_condition(
                host,
                commands::SENSEKEY_MEDIUM_ERROR,
                commands::ASC_LEC_UNCORRECTABLE,
                commands::ASCQ_LEC_UNCORRECTABLE,
            );
        }

        valid
    }

    fn sector_read_period(&self) -> CycleCount {
        (2048u64 * u64::from(self.host_clock) / u64::from(self.transfer_rate)) as CycleCount
    }

    /// Arm the deferred sector read scheduler for `count` sectors starting at `addr`
    pub(crate) fn arm_sector_read(&mut self, addr: u32, count: u32) {
        self.sector_addr = addr;
        self.sector_count = count;

        // The PCE BIOS expects quite a bit of latency before the first sector shows up
        let first_wait = match self.kind {
            DriveKind::Pce => 3,
            DriveKind::Pcfx => 1,
        };

        self.read_timer = first_wait * self.sector_read_period();
    }

    fn run_cd_read(&mut self, host: &mut dyn Host, run_time: CycleCount) {
        if self.read_timer <= 0 {
            return;
        }

        self.read_timer -= run_time;

        if self.read_timer > 0 {
            return;
        }

        let needed = match self.kind {
            DriveKind::Pcfx => 2352,
            DriveKind::Pce => 2048,
        };

        if self.din.can_write() < needed {
            // The host isn't draining fast enough, retry in one sector time
            self.read_timer += self.sector_read_period();
            return;
        }

        if self.tray_open {
            self.din.flush();
            self.data_transfer_done = false;

            self.command_check_condition(
                host,
                commands::SENSEKEY_NOT_READY,
                commands::ASC_TRAY_OPEN,
                0x00,
            );
            return;
        }

        if self.disc.is_none() {
            self.command_check_condition(
                host,
                commands::SENSEKEY_NOT_READY,
                commands::ASC_NO_DISC,
                0x00,
            );
            return;
        }

        if self.sector_addr >= self.toc.leadout_lba() {
            self.command_check_condition(
                host,
                commands::SENSEKEY_ILLEGAL_REQUEST,
                commands::ASC_END_OF_VOLUME,
                0x00,
            );
            return;
        }

        let mut raw = [0u8; RAW_SECTOR_SIZE];

        let read_ok = self
            .disc
            .as_mut()
            .map_or(false, |d| d.read_raw_sector(&mut raw, self.sector_addr));

        if !read_ok {
            self.data_transfer_done = false;

            self.command_check_condition(host, commands::SENSEKEY_ILLEGAL_REQUEST, 0x00, 0x00);
            return;
        }

        if !self.validate_raw_data_sector(host, &mut raw) {
            return;
        }

        self.subq.pw = *array_ref![raw, 2352, 96];

        // Mode 2 sectors carry their payload after the 8 byte subheader
        if raw[12 + 3] == 0x2 {
            self.din.write(&raw[24..24 + 2048]);
        } else {
            self.din.write(&raw[16..16 + 2048]);
        }

        self.subq.update_q_from_pw();

        host.irq(IRQ_DATA_TRANSFER_READY);

        self.sector_addr += 1;
        self.sector_count -= 1;

        if self.phase != Phase::DataIn {
            self.change_phase(host, Phase::DataIn);
        }

        if self.sector_count > 0 {
            self.data_transfer_done = false;
            self.read_timer += self.sector_read_period();
        } else {
            self.data_transfer_done = true;
        }
    }

    /// Soft reset triggered by the RST signal: everything in flight is dropped and the mode
    /// pages go back to their defaults
    fn virtual_reset(&mut self, host: &mut dyn Host) {
        self.mode_pages.reset_defaults();
        for index in 0..NUM_MODE_PAGES {
            mode_pages::update_cache_indexed(self, index);
        }

        self.din.flush();

        self.read_timer = 0;

        self.last_track_search_ts = self.monotonic_ts;

        self.sector_addr = 0;
        self.sector_count = 0;
        self.read_sec_start = 0;
        self.read_sec = 0;
        self.read_sec_end = !0;

        self.cdda.reset();

        self.data_out = [0; 256];
        self.data_out_pos = 0;
        self.data_out_want = 0;

        self.cdda.fix_out_port_volumes();

        self.change_phase(host, Phase::BusFree);
    }

    /// Advance the drive up to `system_timestamp` and return a hint for the latest date at
    /// which the next call should happen, in host cycles (always >= 0)
    pub fn run(&mut self, host: &mut dyn Host, system_timestamp: u32) -> CycleCount {
        let run_time = i64::from(system_timestamp) - i64::from(self.last_ts);

        assert!(run_time >= 0);
        let run_time = run_time as CycleCount;

        self.monotonic_ts += i64::from(run_time);
        self.last_ts = system_timestamp;

        self.run_cd_read(host, run_time);
        cdda::run(self, host, system_timestamp, run_time);

        let reset_needed = self.bus.rst() && !self.last_rst;
        self.last_rst = self.bus.rst();

        if reset_needed {
            self.virtual_reset(host);
        } else if self.phase == Phase::BusFree {
            // The PC-FX BIOS puts 0x84 on the data bus before selecting, but checking SEL
            // alone works for everything tested so far
            if self.bus.sel() {
                self.change_phase(host, Phase::Command);
            }
        } else if self.bus.atn() && !self.bus.req() && !self.bus.ack() {
            self.change_phase(host, Phase::MessageOut);
        } else {
            match self.phase {
                Phase::Command => self.step_command_phase(host),
                Phase::DataOut => self.step_data_out_phase(host),
                Phase::MessageOut => self.step_message_out_phase(host),
                Phase::Status => self.step_status_phase(host),
                Phase::DataIn => self.step_data_in_phase(host),
                Phase::MessageIn => self.step_message_in_phase(host),
                Phase::BusFree => (),
            }
        }

        self.next_event_time()
    }

    fn step_command_phase(&mut self, host: &mut dyn Host) {
        if self.bus.req() && self.bus.ack() {
            // Data bus is valid now
            scsi_debug!("command byte {:02x} @{}", self.bus.db, self.command_pos);

            self.command_buffer[self.command_pos as usize] = self.bus.db;
            self.command_pos += 1;
            self.set_req(host, false);
        }

        if !self.bus.req() && !self.bus.ack() && self.command_pos > 0 {
            let required = commands::required_cdb_len(self.command_buffer[0]);

            if u32::from(self.command_pos) == required {
                self.dispatch_command(host, required as usize);
                self.command_pos = 0;
            } else {
                // Get more bytes for the command
                self.set_req(host, true);
            }
        }
    }

    fn dispatch_command(&mut self, host: &mut dyn Host, len: usize) {
        let mut cdb = [0u8; 16];
        cdb.copy_from_slice(&self.command_buffer[..16]);

        let def = match commands::lookup(self.kind, cdb[0]) {
            Some(def) => def,
            None => {
                warn!("Unknown SCSI command {:02x}", cdb[0]);

                self.command_check_condition(
                    host,
                    commands::SENSEKEY_ILLEGAL_REQUEST,
                    commands::ASC_INVALID_COMMAND,
                    0x00,
                );
                return;
            }
        };

        debug!("Command {:02x} ({}): {:02x?}", cdb[0], def.name, &cdb[..len]);

        if def.flags & commands::SCF_UNTESTED != 0 {
            debug!("Untested SCSI command {:02x} ({})", cdb[0], def.name);
        }

        if def.flags & commands::SCF_REQUIRES_MEDIUM != 0 {
            if self.tray_open {
                self.command_check_condition(
                    host,
                    commands::SENSEKEY_NOT_READY,
                    commands::ASC_TRAY_OPEN,
                    0x00,
                );
                return;
            }
            if self.disc.is_none() {
                self.command_check_condition(
                    host,
                    commands::SENSEKEY_NOT_READY,
                    commands::ASC_NO_DISC,
                    0x00,
                );
                return;
            }
            if self.disc_changed {
                self.command_check_condition(
                    host,
                    commands::SENSEKEY_UNIT_ATTENTION,
                    commands::ASC_DISC_CHANGED,
                    0x00,
                );
                self.disc_changed = false;
                return;
            }
        }

        let was_playing = self.cdda.is_active();

        (def.handler)(self, host, &cdb);

        // When a command kicks playback off, the resampling pipeline must not replay stale
        // samples from the previous play
        if !was_playing && self.cdda.is_active() {
            self.cdda.clear_resample_state();
        }
    }

    fn step_data_out_phase(&mut self, host: &mut dyn Host) {
        if self.bus.req() && self.bus.ack() {
            self.data_out[self.data_out_pos as usize] = self.bus.db;
            self.data_out_pos += 1;
            self.set_req(host, false);
        } else if !self.bus.req() && !self.bus.ack() && self.data_out_pos > 0 {
            if self.data_out_pos == self.data_out_want {
                self.data_out_pos = 0;

                if self.command_buffer[0] == 0x15 {
                    commands::finish_mode_select(self, host);
                } else {
                    // Shouldn't be reachable, only MODE SELECT arms this phase
                    self.send_status_and_message(host, commands::STATUS_GOOD, 0x00);
                }
            } else {
                self.set_req(host, true);
            }
        }
    }

    fn step_message_out_phase(&mut self, host: &mut dyn Host) {
        if self.bus.req() && self.bus.ack() {
            self.set_req(host, false);

            // The ABORT message is 0x06, but there's no support for recovering from a
            // message-out phase back to the previous phase, so any message aborts
            scsi_debug!("abort, message {:02x}", self.bus.db);

            self.din.flush();
            self.data_out_pos = 0;
            self.data_out_want = 0;

            self.read_timer = 0;
            self.cdda.status = PlayStatus::Stopped;
            self.change_phase(host, Phase::BusFree);
        }
    }

    fn step_status_phase(&mut self, host: &mut dyn Host) {
        if self.bus.req() && self.bus.ack() {
            self.set_req(host, false);
            self.status_sent = true;
        }

        if !self.bus.req() && !self.bus.ack() && self.status_sent {
            // Status sent, so get ready to send the message
            self.status_sent = false;
            self.bus.db = self.message_pending;

            self.change_phase(host, Phase::MessageIn);
        }
    }

    fn step_data_in_phase(&mut self, host: &mut dyn Host) {
        if !self.bus.req() && !self.bus.ack() {
            if self.din.is_empty() {
                host.irq(IRQ_DEASSERT | IRQ_DATA_TRANSFER_READY);

                if self.data_transfer_done {
                    self.send_status_and_message(host, commands::STATUS_GOOD, 0x00);
                    self.data_transfer_done = false;
                    host.irq(IRQ_DATA_TRANSFER_DONE);
                }
            } else {
                self.bus.db = self.din.read_byte();
                self.set_req(host, true);
            }
        }

        if self.bus.req() && self.bus.ack() {
            self.set_req(host, false);
        }
    }

    fn step_message_in_phase(&mut self, host: &mut dyn Host) {
        if self.bus.req() && self.bus.ack() {
            self.set_req(host, false);
            self.message_sent = true;
        }

        if !self.bus.req() && !self.bus.ack() && self.message_sent {
            self.message_sent = false;
            self.change_phase(host, Phase::BusFree);
        }
    }

    fn next_event_time(&self) -> CycleCount {
        let mut next_time = CycleCount::MAX;

        if self.read_timer > 0 && self.read_timer < next_time {
            next_time = self.read_timer;
        }

        if self.cdda.is_active() {
            let parity = i64::from(self.cdda.oversample_pos & 1);
            let next_sample = (self.cdda.div
                + i64::from(self.cdda.div_acc) * parity
                + ((1 << 20) - 1))
                >> 20;
            let next_sample = next_sample as CycleCount;

            if next_sample > 0 && next_sample < next_time {
                next_time = next_sample;
            }
        }

        debug_assert!(next_time >= 0);

        next_time
    }

    /// Serialize the whole drive state into a flexbuffers blob
    pub fn save_state(&self) -> Result<Vec<u8>> {
        let mut fb = flexbuffers::FlexbufferSerializer::new();

        let st = SaveStateRef {
            version: STATE_VERSION,
            drive: self,
        };

        st.serialize(&mut fb)
            .map_err(|e| CdError::SerializationError(e.to_string()))?;

        Ok(fb.take_buffer())
    }

    /// Restore a blob produced by `save_state`. The disc backend, tray state and cached TOC
    /// are not part of the blob and carry over from the current state, so the host should
    /// re-attach the disc (with `no_side_effects` set) before resuming.
    pub fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let root = flexbuffers::Reader::get_root(data)
            .map_err(|e| CdError::DeserializationError(e.to_string()))?;

        let mut st = SaveState::deserialize(root)
            .map_err(|e| CdError::DeserializationError(e.to_string()))?;

        if st.version > STATE_VERSION {
            return Err(CdError::UnsupportedStateVersion(st.version));
        }

        if !st.drive.din.size().is_power_of_two() {
            return Err(CdError::DeserializationError(
                "bad data FIFO geometry".to_string(),
            ));
        }

        let drive = &mut st.drive;

        // Host-side attachments carry over
        drive.disc = self.disc.take();
        drive.tray_open = self.tray_open;
        drive.toc = std::mem::take(&mut self.toc);

        drive.din.sanitize();

        // Older states counted the CD-DA divisor in half-steps
        if st.version < 0x0935 {
            drive.cdda.div /= 2;
        }
        if drive.cdda.div <= 0 {
            drive.cdda.div = 1;
        }

        drive.cdda.oversample_pos &= 0x1f;

        *self = st.drive;

        // Rebuild the derived caches from the restored page values
        for index in 0..NUM_MODE_PAGES {
            mode_pages::update_cache_indexed(self, index);
        }

        Ok(())
    }
}

const STATE_VERSION: u32 = 0x0935;

#[derive(serde::Serialize)]
struct SaveStateRef<'a> {
    version: u32,
    drive: &'a ScsiCd,
}

#[derive(serde::Deserialize)]
struct SaveState {
    version: u32,
    drive: ScsiCd,
}
