//! End-to-end tests: a synthetic disc backend plus a capturing host, driving the drive
//! through real bus handshakes.

use crate::bus::Phase;
use crate::commands;
use crate::disc::{DiscBackend, RAW_SECTOR_SIZE};
use crate::drive::{CycleCount, DriveKind, Host, ScsiCd, IRQ_DATA_TRANSFER_DONE};
use crate::mode_pages::ModePages;
use crate::subq::{q_scatter_to_pw, q_set_checksum};
use crate::toc::{lba_to_amsf, u8_to_bcd, Toc, TocEntry};

const HOST_CLOCK: u32 = 21_477_272;
const TRANSFER_RATE: u32 = 126_000;

/// Track 1: data, [0, 1000). Track 2: audio, [1000, 2000). Leadout at 2000.
const TRACK2_LBA: u32 = 1000;
const LEADOUT_LBA: u32 = 2000;

struct TestDisc;

impl TestDisc {
    fn toc() -> Toc {
        let mut toc = Toc {
            first_track: 1,
            last_track: 2,
            tracks: [TocEntry::default(); 101],
        };

        toc.tracks[1] = TocEntry {
            lba: 0,
            adr: 1,
            control: 0x4,
        };
        toc.tracks[2] = TocEntry {
            lba: TRACK2_LBA,
            adr: 1,
            control: 0x0,
        };
        toc.tracks[100] = TocEntry {
            lba: LEADOUT_LBA,
            adr: 1,
            control: 0x0,
        };

        toc
    }

    fn subchannel_for(lba: u32) -> [u8; 96] {
        let toc = Self::toc();
        let track = toc.find_track_by_lba(lba).clamp(1, 2);
        let control = toc.tracks[track as usize].control;

        let mut q = [0u8; 12];

        q[0] = (control << 4) | 0x1;
        q[1] = u8_to_bcd(track);
        q[2] = 0x01; // Index

        let rel = lba - toc.tracks[track as usize].lba;
        let (rm, rs, rf) = lba_to_amsf(rel as i32 - 150);
        q[3] = u8_to_bcd(rm);
        q[4] = u8_to_bcd(rs);
        q[5] = u8_to_bcd(rf);

        let (am, asec, af) = lba_to_amsf(lba as i32);
        q[7] = u8_to_bcd(am);
        q[8] = u8_to_bcd(asec);
        q[9] = u8_to_bcd(af);

        q_set_checksum(&mut q);

        q_scatter_to_pw(&q)
    }
}

impl DiscBackend for TestDisc {
    fn read_toc(&mut self) -> Toc {
        Self::toc()
    }

    fn read_raw_sector(&mut self, buf: &mut [u8; RAW_SECTOR_SIZE], lba: u32) -> bool {
        if lba >= LEADOUT_LBA {
            return false;
        }

        *buf = [0; RAW_SECTOR_SIZE];

        if lba < TRACK2_LBA {
            // Mode 1 data sector
            buf[0] = 0x00;
            for b in buf[1..11].iter_mut() {
                *b = 0xff;
            }
            buf[11] = 0x00;

            let (m, s, f) = lba_to_amsf(lba as i32);
            buf[12] = u8_to_bcd(m);
            buf[13] = u8_to_bcd(s);
            buf[14] = u8_to_bcd(f);
            buf[15] = 0x01;

            for i in 0..2048 {
                buf[16 + i] = (lba as usize + i) as u8;
            }
        } else {
            // Audio sector with a deterministic non-silent pattern
            for j in 0..1176u32 {
                let v = ((lba.wrapping_mul(31).wrapping_add(j.wrapping_mul(7))) & 0x7fff) as i16
                    - 0x4000;

                buf[j as usize * 2..j as usize * 2 + 2].copy_from_slice(&v.to_le_bytes());
            }
        }

        buf[2352..].copy_from_slice(&Self::subchannel_for(lba));

        true
    }

    fn validate_raw_sector(&mut self, _data: &mut [u8]) -> bool {
        true
    }
}

struct TestHost {
    irqs: Vec<u16>,
    sub_bytes: Vec<(u8, i32)>,
    hr: [Vec<i32>; 2],
}

impl TestHost {
    fn new() -> TestHost {
        TestHost {
            irqs: Vec::new(),
            sub_bytes: Vec::new(),
            hr: [vec![0; 0x10000 + 8], vec![0; 0x10000 + 8]],
        }
    }
}

impl Host for TestHost {
    fn irq(&mut self, code: u16) {
        self.irqs.push(code);
    }

    fn subchannel_byte(&mut self, byte: u8, index: i32) {
        self.sub_bytes.push((byte, index));
    }

    fn high_rate_buffers(&mut self) -> Option<[&mut [i32]; 2]> {
        let [l, r] = &mut self.hr;

        Some([l.as_mut_slice(), r.as_mut_slice()])
    }
}

struct Rig {
    cd: ScsiCd,
    host: TestHost,
    ts: u32,
    last_hint: CycleCount,
}

impl Rig {
    /// Powered-up drive with an open, empty tray
    fn empty(kind: DriveKind) -> Rig {
        let mut rig = Rig {
            cd: ScsiCd::new(kind, 1, TRANSFER_RATE, HOST_CLOCK),
            host: TestHost::new(),
            ts: 0,
            last_hint: 1,
        };

        rig.cd.power(&mut rig.host, 0);

        rig
    }

    /// Powered-up drive with the test disc loaded and no pending disc-changed condition
    fn with_disc(kind: DriveKind) -> Rig {
        let mut rig = Rig {
            cd: ScsiCd::new(kind, 1, TRANSFER_RATE, HOST_CLOCK),
            host: TestHost::new(),
            ts: 0,
            last_hint: 1,
        };

        rig.cd.set_disc(false, Some(Box::new(TestDisc)), true);
        rig.cd.power(&mut rig.host, 0);

        rig
    }

    fn run(&mut self, delta: u32) {
        self.ts += delta;
        self.last_hint = self.cd.run(&mut self.host, self.ts);
    }

    /// Select the drive and handshake a full CDB through the command phase
    fn send_cdb(&mut self, cdb: &[u8]) {
        assert_eq!(self.cd.current_phase(), Phase::BusFree);

        self.cd.set_sel(true);
        self.run(2);
        self.cd.set_sel(false);

        assert_eq!(self.cd.current_phase(), Phase::Command);

        for &b in cdb {
            assert!(self.cd.bus().req());

            self.cd.set_db(b);
            self.cd.set_ack(true);
            self.run(2);
            self.cd.set_ack(false);
            self.run(2);
        }
    }

    /// Handshake a MODE SELECT payload through the data-out phase
    fn send_data_out(&mut self, data: &[u8]) {
        assert_eq!(self.cd.current_phase(), Phase::DataOut);

        for &b in data {
            assert!(self.cd.bus().req());

            self.cd.set_db(b);
            self.cd.set_ack(true);
            self.run(2);
            self.cd.set_ack(false);
            self.run(2);
        }
    }

    /// Drain the data-in phase until the drive moves on
    fn read_data_in(&mut self) -> Vec<u8> {
        let mut out = Vec::new();

        for _ in 0..4_000_000 {
            if self.cd.current_phase() != Phase::DataIn {
                return out;
            }

            if self.cd.bus().req() {
                out.push(self.cd.bus().db);

                self.cd.set_ack(true);
                self.run(2);
                self.cd.set_ack(false);
                self.run(2);
            } else {
                // Nothing on the bus yet, let the drive refill
                let wait = self.last_hint.clamp(2, 400_000) as u32;
                self.run(wait);
            }
        }

        panic!("data-in transfer never completed");
    }

    /// Handshake the status and message bytes, returning the raw status byte
    fn finish_status(&mut self) -> u8 {
        assert_eq!(self.cd.current_phase(), Phase::Status);

        let status = self.cd.bus().db;

        self.cd.set_ack(true);
        self.run(2);
        self.cd.set_ack(false);
        self.run(2);

        assert_eq!(self.cd.current_phase(), Phase::MessageIn);
        assert_eq!(self.cd.bus().db, 0x00);

        self.cd.set_ack(true);
        self.run(2);
        self.cd.set_ack(false);
        self.run(2);

        assert_eq!(self.cd.current_phase(), Phase::BusFree);

        status
    }

    /// Run a command to completion: returns (status, data-in payload)
    fn command(&mut self, cdb: &[u8]) -> (u8, Vec<u8>) {
        self.send_cdb(cdb);

        let mut data = Vec::new();

        loop {
            match self.cd.current_phase() {
                Phase::Status => break,
                Phase::DataIn => data.extend(self.read_data_in()),
                Phase::Command | Phase::BusFree => {
                    let wait = self.last_hint.clamp(2, 400_000) as u32;
                    self.run(wait);
                }
                other => panic!("unexpected phase {:?}", other),
            }
        }

        (self.finish_status(), data)
    }

    fn request_sense(&mut self) -> Vec<u8> {
        let (status, data) = self.command(&[0x03, 0x00, 0x00, 0x00, 0x12, 0x00]);

        assert_eq!(status, self.good_status());
        assert_eq!(data.len(), 18);

        data
    }

    fn good_status(&self) -> u8 {
        0x00
    }

    fn check_condition_status(&self) -> u8 {
        match self.cd.kind() {
            DriveKind::Pcfx => commands::STATUS_CHECK_CONDITION << 1,
            DriveKind::Pce => 0x01,
        }
    }
}

#[test]
fn phase_signal_table() {
    let mut rig = Rig::empty(DriveKind::Pcfx);

    // (phase, BSY, MSG, CD, IO)
    let table = [
        (Phase::BusFree, false, false, false, false),
        (Phase::Command, true, false, true, false),
        (Phase::DataOut, true, false, false, false),
        (Phase::DataIn, true, false, false, true),
        (Phase::Status, true, false, true, true),
        (Phase::MessageIn, true, true, true, true),
        (Phase::MessageOut, true, true, true, false),
    ];

    for &(phase, bsy, msg, cd, io) in table.iter() {
        rig.cd.change_phase(&mut rig.host, phase);

        assert_eq!(rig.cd.bus().bsy(), bsy, "{:?}", phase);
        assert_eq!(rig.cd.bus().msg(), msg, "{:?}", phase);
        assert_eq!(rig.cd.bus().cd(), cd, "{:?}", phase);
        assert_eq!(rig.cd.bus().io(), io, "{:?}", phase);
    }
}

#[test]
fn test_unit_ready_empty_tray() {
    let mut rig = Rig::empty(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();

    assert_eq!(sense[0], 0x70);
    assert_eq!(sense[2], commands::SENSEKEY_NOT_READY);
    assert_eq!(sense[7], 0x0a);
    assert_eq!(sense[12], commands::ASC_TRAY_OPEN);
    assert_eq!(sense[13], 0x00);

    // Sense is consumed by the read
    let sense = rig.request_sense();
    assert_eq!(sense[2], 0x00);
    assert_eq!(sense[12], 0x00);
}

#[test]
fn inquiry_short_alloc() {
    let mut rig = Rig::empty(DriveKind::Pcfx);

    let (status, data) = rig.command(&[0x12, 0x00, 0x00, 0x00, 0x08, 0x00]);

    assert_eq!(status, rig.good_status());
    assert_eq!(data, &[0x05, 0x80, 0x02, 0x00, 0x1f, 0x00, 0x00, 0x00]);
}

#[test]
fn disc_changed_unit_attention() {
    let mut rig = Rig::empty(DriveKind::Pcfx);

    rig.cd.set_disc(false, Some(Box::new(TestDisc)), false);

    let (status, _) = rig.command(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_UNIT_ATTENTION);
    assert_eq!(sense[12], commands::ASC_DISC_CHANGED);

    // The attention condition only fires once
    let (status, _) = rig.command(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());
}

#[test]
fn read6_one_sector() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);

    // The drive paces itself against the declared transfer rate
    let expected = (2048u64 * u64::from(HOST_CLOCK) / u64::from(TRANSFER_RATE)) as CycleCount;
    assert_eq!(rig.last_hint, expected);
    assert_eq!(rig.cd.din.in_count(), 0);

    rig.run(expected as u32);

    // 2048 payload bytes landed; the first one is already latched on the bus
    assert_eq!(rig.cd.din.in_count(), 2047);
    assert!(rig.cd.bus().req());
    assert_eq!(rig.cd.current_phase(), Phase::DataIn);
    assert!(rig.host.irqs.contains(&crate::IRQ_DATA_TRANSFER_READY));

    let data = rig.read_data_in();

    assert_eq!(data.len(), 2048);
    for (i, &b) in data.iter().enumerate() {
        assert_eq!(b, (150 + i) as u8);
    }

    assert_eq!(rig.finish_status(), rig.good_status());
    assert!(rig.host.irqs.contains(&IRQ_DATA_TRANSFER_DONE));

    // The data sector's sub-Q got decoded along the way: absolute position 150
    let q = rig.cd.subq.q_bufs[crate::subq::QMODE_TIME];
    assert_eq!(q[1], 0x01);
    assert_eq!([q[7], q[8], q[9]], [0x00, 0x04, 0x00]);
}

#[test]
fn read6_count_zero_is_256() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(rig.cd.sector_count, 256);

    // Abort the transfer with a bus reset
    rig.cd.set_rst(true);
    rig.run(2);
    rig.cd.set_rst(false);
    rig.run(2);

    assert_eq!(rig.cd.current_phase(), Phase::BusFree);
}

#[test]
fn read10_leadout_boundary() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Zero count right at the leadout
    let (status, _) = rig.command(&[0x28, 0x00, 0x00, 0x00, 0x07, 0xd0, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_MEDIUM_ERROR);
    assert_eq!(sense[12], commands::ASC_HEADER_READ_ERROR);

    // One past the leadout
    let (status, _) = rig.command(&[0x28, 0x00, 0x00, 0x00, 0x07, 0xd1, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_ILLEGAL_REQUEST);
    assert_eq!(sense[12], commands::ASC_END_OF_VOLUME);
}

#[test]
fn multi_sector_read_paces_against_fifo() {
    // The PCE FIFO holds exactly one sector, so a two sector read must wait for the host to
    // drain the first one
    let mut rig = Rig::with_disc(DriveKind::Pce);

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x00, 0x02, 0x00]);

    let mut data = Vec::new();

    loop {
        match rig.cd.current_phase() {
            Phase::Status => break,
            Phase::DataIn => data.extend(rig.read_data_in()),
            _ => {
                let wait = rig.last_hint.clamp(2, 400_000) as u32;
                rig.run(wait);
            }
        }
    }

    assert_eq!(data.len(), 2 * 2048);
    for (i, &b) in data.iter().enumerate() {
        assert_eq!(b, ((i / 2048) + (i % 2048)) as u8);
    }

    assert_eq!(rig.finish_status(), rig.good_status());
}

#[test]
fn read_toc_msf() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) =
        rig.command(&[0x43, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00]);

    assert_eq!(status, rig.good_status());
    assert_eq!(data.len(), 4 + 3 * 8);

    // Header: length (26 bytes follow), first and last track
    assert_eq!(&data[0..4], &[0x00, 0x1a, 0x01, 0x02]);

    // Track 1: data track at 00:02:00
    assert_eq!(
        &data[4..12],
        &[0x00, 0x14, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00]
    );
    // Track 2: audio at LBA 1000 = 00:15:25
    assert_eq!(
        &data[12..20],
        &[0x00, 0x10, 0x02, 0x00, 0x00, 0x00, 0x0f, 0x19]
    );
    // Leadout at LBA 2000 = 00:28:50
    assert_eq!(
        &data[20..28],
        &[0x00, 0x10, 0xaa, 0x00, 0x00, 0x00, 0x1c, 0x32]
    );
}

#[test]
fn read_toc_lba_form() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) =
        rig.command(&[0x43, 0x00, 0x00, 0x00, 0x00, 0x00, 0xaa, 0x00, 0x10, 0x00]);

    assert_eq!(status, rig.good_status());

    // Starting track 0xAA: only the leadout, as a big-endian LBA
    assert_eq!(data.len(), 12);
    assert_eq!(&data[4..12], &[0x00, 0x10, 0xaa, 0x00, 0x00, 0x00, 0x07, 0xd0]);
}

#[test]
fn play_audio_msf_over_data_track() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x47, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_MEDIUM_ERROR);
    assert_eq!(sense[12], commands::ASC_NOT_AUDIO_TRACK);
    assert_eq!(sense[13], 0x00);
}

#[test]
fn play_audio_and_synthesize() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Play 75 sectors of track 2
    let (status, _) = rig.command(&[0x45, 0x00, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x4b, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);
    assert_eq!(rig.cd.read_sec_start, TRACK2_LBA);
    assert_eq!(rig.cd.read_sec_end, TRACK2_LBA + 75);

    for _ in 0..400 {
        rig.run(3000);
    }

    // Samples made it into the high-rate buffers
    assert!(rig.host.hr[0].iter().any(|&v| v != 0));
    assert!(rig.host.hr[1].iter().any(|&v| v != 0));

    // And the sidecar output latched a live sample pair
    assert_ne!(rig.cd.cdda_values(), (0, 0));

    // Subchannel bytes stream out, sync area first
    assert!(rig.host.sub_bytes.iter().any(|&(_, i)| i < 0));
    assert!(rig.host.sub_bytes.iter().any(|&(_, i)| i > 0));
}

#[test]
fn play_audio_window_end_stops() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Two sectors only
    let (status, _) = rig.command(&[0x45, 0x00, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x02, 0x00]);
    assert_eq!(status, rig.good_status());

    for _ in 0..2_000 {
        rig.run(3000);

        if rig.cd.cdda.status == crate::PlayStatus::Stopped {
            break;
        }
    }

    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Stopped);
    assert_eq!(rig.cd.cdda_values(), (0, 0));
}

#[test]
fn pause_resume() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Pause with nothing playing is an error
    let (status, _) = rig.command(&[0x4b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[12], commands::ASC_AUDIO_NOT_PLAYING);

    let (status, _) = rig.command(&[0x45, 0x00, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x4b, 0x00]);
    assert_eq!(status, rig.good_status());

    let (status, _) = rig.command(&[0x4b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Paused);

    let (status, _) = rig.command(&[0x4b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);
}

#[test]
fn mode_select_sense_round_trip() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // MODE SELECT(6) with a 7 byte parameter list: header + page 0x29
    rig.send_cdb(&[0x15, 0x00, 0x00, 0x00, 0x07, 0x00]);
    assert_eq!(rig.cd.current_phase(), Phase::DataOut);

    rig.send_data_out(&[0x00, 0x00, 0x00, 0x00, 0x29, 0x01, 0x05]);
    assert_eq!(rig.finish_status(), rig.good_status());

    let idx = ModePages::index_of(0x29).unwrap();
    assert_eq!(rig.cd.mode_pages.current(idx), &[0x05]);

    // MODE SENSE(6) reads the same value back
    let (status, data) = rig.command(&[0x1a, 0x00, 0x29, 0x00, 0xff, 0x00]);
    assert_eq!(status, rig.good_status());

    // Header + block descriptor + page
    assert_eq!(data.len(), 4 + 8 + 3);
    assert_eq!(data[0], (data.len() - 1) as u8);
    assert_eq!(data[3], 0x08);
    assert_eq!(&data[12..], &[0x29, 0x01, 0x05]);

    // Writing current values back through MODE SELECT is idempotent
    rig.send_cdb(&[0x15, 0x00, 0x00, 0x00, 0x07, 0x00]);
    rig.send_data_out(&[0x00, 0x00, 0x00, 0x00, 0x29, 0x01, 0x05]);
    assert_eq!(rig.finish_status(), rig.good_status());
    assert_eq!(rig.cd.mode_pages.current(idx), &[0x05]);
}

#[test]
fn mode_sense_all_pages_order() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) = rig.command(&[0x1a, 0x08, 0x3f, 0x00, 0xff, 0x00]);
    assert_eq!(status, rig.good_status());

    // DBD set: no block descriptor, pages in fixed order with 0x0E last
    assert_eq!(data[3], 0x00);

    let mut codes = Vec::new();
    let mut offset = 4;

    while offset < data.len() {
        codes.push(data[offset]);
        offset += 2 + data[offset + 1] as usize;
    }

    assert_eq!(codes, &[0x28, 0x29, 0x2a, 0x2b, 0x0e]);
}

#[test]
fn mode_sense_zero_alloc() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) = rig.command(&[0x1a, 0x00, 0x29, 0x00, 0x00, 0x00]);

    assert_eq!(status, rig.good_status());
    assert!(data.is_empty());
}

#[test]
fn cdda_speed_page_updates_rate() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let nominal = rig.cd.cdda.div_acc;

    // +10 speed steps through page 0x2B
    rig.send_cdb(&[0x15, 0x00, 0x00, 0x00, 0x07, 0x00]);
    rig.send_data_out(&[0x00, 0x00, 0x00, 0x00, 0x2b, 0x01, 0x0a]);
    assert_eq!(rig.finish_status(), rig.good_status());

    let expected =
        (i64::from(HOST_CLOCK) * (1 << 20) / (2 * (44_100 + 441 * 10))) as u32;
    assert_eq!(rig.cd.cdda.div_acc, expected);
    assert!(rig.cd.cdda.div_acc < nominal);

    // Volume fudge follows the speed
    assert_eq!(rig.cd.cdda.div_acc_vol_fudge, 110);
}

#[test]
fn request_sense_after_seek_past_leadout() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x2b, 0x00, 0x00, 0x00, 0x07, 0xd0, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_ILLEGAL_REQUEST);
    assert_eq!(sense[12], commands::ASC_END_OF_VOLUME);

    // In-range seek succeeds and stops playback
    let (status, _) = rig.command(&[0x2b, 0x00, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());
}

#[test]
fn prefetch_returns_condition_met() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x34, 0x00, 0x00, 0x00, 0x00, 0x96, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, commands::STATUS_CONDITION_MET << 1);
}

#[test]
fn read_capacity() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) = rig.command(&[0x25, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(data.len(), 8);
    assert_eq!(u32::from_be_bytes([data[0], data[1], data[2], data[3]]), LEADOUT_LBA - 1);
    assert_eq!(u32::from_be_bytes([data[4], data[5], data[6], data[7]]), 2048);

    // PMI from inside the data track reports the last sector before the track type flips
    let (status, data) = rig.command(&[0x25, 0x00, 0x00, 0x00, 0x00, 0x96, 0x00, 0x00, 0x01, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(
        u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        TRACK2_LBA - 1
    );
}

#[test]
fn read_header() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, data) = rig.command(&[0x44, 0x00, 0x00, 0x00, 0x00, 0x96, 0x00, 0x00, 0x08, 0x00]);
    assert_eq!(status, rig.good_status());

    // Mode 1 sector at LBA 150
    assert_eq!(data[0], 0x01);
    assert_eq!(&data[1..4], &[0x00, 0x00, 0x00]);
    assert_eq!(u32::from_be_bytes([data[4], data[5], data[6], data[7]]), 150);
}

#[test]
fn rst_during_data_in() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);
    rig.run(rig.last_hint as u32);

    assert!(rig.cd.din.in_count() > 1000);
    assert_eq!(rig.cd.current_phase(), Phase::DataIn);

    // Scribble on a mode page so the reset-to-defaults is observable
    let idx = ModePages::index_of(0x29).unwrap();
    rig.cd.mode_pages.apply_param(idx, 0, 0x42);

    rig.cd.set_rst(true);
    rig.run(2);

    assert_eq!(rig.cd.current_phase(), Phase::BusFree);
    assert_eq!(rig.cd.din.in_count(), 0);
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Stopped);
    assert_eq!(rig.cd.mode_pages.current(idx), &[0x00]);

    rig.cd.set_rst(false);
    rig.run(2);

    // The bus is usable again
    let (status, data) = rig.command(&[0x12, 0x00, 0x00, 0x00, 0x04, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(data, &[0x05, 0x80, 0x02, 0x00]);
}

#[test]
fn message_out_aborts() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);
    rig.run(rig.last_hint as u32);
    assert_eq!(rig.cd.current_phase(), Phase::DataIn);

    // ACK the byte already latched on the bus, then ATN with REQ/ACK idle forces
    // message-out
    rig.cd.set_atn(true);
    rig.cd.set_ack(true);
    rig.run(2);
    rig.cd.set_ack(false);
    rig.run(2);
    assert_eq!(rig.cd.current_phase(), Phase::MessageOut);

    rig.cd.set_atn(false);
    rig.cd.set_db(0x06); // ABORT
    rig.cd.set_ack(true);
    rig.run(2);
    rig.cd.set_ack(false);
    rig.run(2);

    assert_eq!(rig.cd.current_phase(), Phase::BusFree);
    assert_eq!(rig.cd.din.in_count(), 0);
}

#[test]
fn pcfx_sapsp_track_aliasing() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Track form (mode 0x80): one past the last track is the leadout, which plays an empty
    // window and returns GOOD without starting
    let (status, _) = rig.command(&[0xd8, 0x01, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
    assert_eq!(status, rig.good_status());
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Stopped);

    // Track 0 is rejected
    let (status, _) = rig.command(&[0xd8, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[12], commands::ASC_INVALID_PARAMETER);

    // Track 2 in BCD starts the audio track
    let (status, _) = rig.command(&[0xd8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
    assert_eq!(status, rig.good_status());
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);
    assert_eq!(rig.cd.read_sec_start, TRACK2_LBA);
    assert_eq!(rig.cd.read_sec_end, LEADOUT_LBA);
}

#[test]
fn pcfx_sapep_sets_play_mode() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0xd8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
    assert_eq!(status, rig.good_status());

    // Loop mode, end at LBA 1500
    let (status, _) = rig.command(&[0xd9, 0x04, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(rig.cd.read_sec_end, 1500);
    assert_eq!(rig.cd.cdda.play_mode, crate::PlayMode::Loop);
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);

    // SAPEP while stopped is an error
    rig.cd.set_rst(true);
    rig.run(2);
    rig.cd.set_rst(false);
    rig.run(2);

    let (status, _) = rig.command(&[0xd9, 0x04, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    let sense = rig.request_sense();
    assert_eq!(sense[12], commands::ASC_AUDIO_NOT_PLAYING);
}

#[test]
fn nec_scan_engages() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0xd8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
    assert_eq!(status, rig.good_status());

    // Forward scan towards LBA 1500
    let (status, _) = rig.command(&[0xd2, 0x02, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Scanning);
    assert_eq!(rig.cd.cdda.scan_sec_end, 1500);
    assert_eq!(rig.cd.cdda.scan_mode, 0x02);
}

#[test]
fn nec_read_subq_after_data_read() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);
    assert_eq!(status, rig.good_status());

    let (status, data) = rig.command(&[0xdd, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(data.len(), 10);
    assert_eq!(data[0], 3); // Stopped
    assert_eq!(data[1], 0x41); // Data track, ADR 1
    assert_eq!(data[2], 0x01); // Track 1
    assert_eq!(&data[7..10], &[0x00, 0x04, 0x00]); // Absolute 00:04:00
}

#[test]
fn nec_get_dir_info() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Mode 0: track range
    let (status, data) = rig.command(&[0xde, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(&data[..2], &[0x01, 0x02]);

    // Mode 1: leadout MSF
    let (status, data) = rig.command(&[0xde, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());
    assert_eq!(&data[..3], &[0x00, 0x28, 0x50]);

    // Mode 3 with no match byte: A0/A1/A2 plus one entry per track
    let (status, data) = rig.command(&[0xde, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.good_status());

    let expected_len = 2 + 5 * 10;
    assert_eq!(data.len(), expected_len);
    assert_eq!(
        u16::from_be_bytes([data[0], data[1]]) as usize,
        expected_len - 2
    );
    assert_eq!(data[2 + 2], 0xa0);
    assert_eq!(data[2 + 3], 0x00); // Lead-in timecode starts at 00:00:00
    assert_eq!(data[2 + 10 + 2], 0xa1);
    assert_eq!(data[2 + 20 + 2], 0xa2);
    // Leadout position, BCD MSF
    assert_eq!(&data[2 + 20 + 7..2 + 30], &[0x00, 0x28, 0x50]);
    // Track entries follow in BCD
    assert_eq!(data[2 + 30 + 2], 0x01);
    assert_eq!(data[2 + 40 + 2], 0x02);
}

#[test]
fn read_subchannel_formats() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);
    assert_eq!(status, rig.good_status());

    // Format 1: position data in LBA form
    let (status, data) = rig.command(&[0x42, 0x00, 0x40, 0x01, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00]);
    assert_eq!(status, rig.good_status());

    assert_eq!(data[1], 0x13); // Audio status: stopped
    assert_eq!(data[4], 0x01); // Format echo
    assert_eq!(data[5], 0x14); // Control/ADR, nibble swapped
    assert_eq!(data[6], 0x01); // Track
    assert_eq!(data[7], 0x01); // Index
    assert_eq!(
        u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        150
    );

    // Format 2 (MCN): zero filled payload
    let (status, data) = rig.command(&[0x42, 0x00, 0x40, 0x02, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00]);
    assert_eq!(status, rig.good_status());
    assert!(data[4..].iter().skip(1).all(|&b| b == 0));
}

#[test]
fn pce_status_byte_and_vendor_commands() {
    let mut rig = Rig::with_disc(DriveKind::Pce);

    // PCE encodes GOOD as 0x00 and everything else as 0x01
    let (status, _) = rig.command(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);

    // Unknown command on the PCE table (MODE SELECT isn't wired there)
    let (status, _) = rig.command(&[0x15, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x01);

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_ILLEGAL_REQUEST);
    assert_eq!(sense[12], commands::ASC_INVALID_COMMAND);

    // GETDIRINFO mode 0 returns the track range in BCD
    let (status, data) = rig.command(&[0xde, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);
    assert_eq!(data, &[0x01, 0x02]);

    // GETDIRINFO mode 1: leadout in BCD MSF, three bytes only on PCE
    let (status, data) = rig.command(&[0xde, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);
    assert_eq!(data, &[0x00, 0x28, 0x50]);
}

#[test]
fn pce_sapsp_starts_playback() {
    let mut rig = Rig::with_disc(DriveKind::Pce);

    let (status, _) = rig.command(&[0xd8, 0x01, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);

    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);
    assert_eq!(rig.cd.read_sec_start, TRACK2_LBA);
    assert_eq!(rig.cd.read_sec_end, LEADOUT_LBA);
    assert!(rig.host.irqs.contains(&IRQ_DATA_TRANSFER_DONE));

    // Without the play bit the drive lands on the position paused and silent
    rig.run(1000);
    let (status, _) = rig.command(&[0xd8, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);

    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Paused);
    assert_eq!(rig.cd.cdda.play_mode, crate::PlayMode::Silent);
    assert_eq!(rig.cd.read_sec_start, 0x400);
}

#[test]
fn pce_sapep_play_modes() {
    let mut rig = Rig::with_disc(DriveKind::Pce);

    let (status, _) = rig.command(&[0xd8, 0x01, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);

    // Mode 0x01: loop
    let (status, _) = rig.command(&[0xd9, 0x01, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);
    assert_eq!(rig.cd.read_sec_end, 1500);
    assert_eq!(rig.cd.cdda.play_mode, crate::PlayMode::Loop);
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Playing);

    // Mode 0x00: silent stop
    let (status, _) = rig.command(&[0xd9, 0x00, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, 0x00);
    assert_eq!(rig.cd.cdda.status, crate::PlayStatus::Stopped);
}

#[test]
fn save_state_round_trip_reproduces_audio() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    let (status, _) = rig.command(&[0x45, 0x00, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x4b, 0x00]);
    assert_eq!(status, rig.good_status());

    // Let playback settle mid-sector
    for _ in 0..50 {
        rig.run(3000);
    }

    let blob = rig.cd.save_state().unwrap();
    let ts0 = rig.ts;

    // First continuation
    rig.host = TestHost::new();
    for _ in 0..200 {
        rig.run(3000);
    }

    let hr_a = rig.host.hr.clone();
    let sub_a = rig.host.sub_bytes.clone();
    let irq_a = rig.host.irqs.clone();

    // Rewind through the save state and replay the same schedule
    rig.cd.load_state(&blob).unwrap();
    rig.ts = ts0;
    rig.host = TestHost::new();

    for _ in 0..200 {
        rig.run(3000);
    }

    assert_eq!(rig.host.hr, hr_a);
    assert_eq!(rig.host.sub_bytes, sub_a);
    assert_eq!(rig.host.irqs, irq_a);
}

#[test]
fn save_state_preserves_pending_sense_and_fifo() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    // Leave a pending sense and a partly drained FIFO
    let (status, _) = rig.command(&[0x2b, 0x00, 0x00, 0x00, 0x07, 0xd0, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(status, rig.check_condition_status());

    rig.send_cdb(&[0x08, 0x00, 0x00, 0x96, 0x01, 0x00]);
    rig.run(rig.last_hint as u32);
    assert_eq!(rig.cd.din.in_count(), 2047);

    let blob = rig.cd.save_state().unwrap();

    // Trash the live state, then restore
    rig.cd.set_rst(true);
    rig.run(2);
    rig.cd.set_rst(false);
    rig.run(2);
    assert_eq!(rig.cd.din.in_count(), 0);

    rig.cd.load_state(&blob).unwrap();

    assert_eq!(rig.cd.din.in_count(), 2047);
    assert_eq!(rig.cd.current_phase(), Phase::DataIn);

    // The pending sense survived the trip
    let data = rig.read_data_in();
    assert_eq!(data.len(), 2048);
    assert_eq!(rig.finish_status(), rig.good_status());

    let sense = rig.request_sense();
    assert_eq!(sense[2], commands::SENSEKEY_ILLEGAL_REQUEST);
    assert_eq!(sense[12], commands::ASC_END_OF_VOLUME);
}

#[test]
fn load_state_rejects_garbage() {
    let mut rig = Rig::with_disc(DriveKind::Pcfx);

    assert!(rig.cd.load_state(&[0x00, 0x01, 0x02]).is_err());
}
