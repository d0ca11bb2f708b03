//! PC Engine CD command set. The PCE BIOS only exercises a small subset of the SCSI-2
//! commands and its vendor commands diverge from the PC-FX versions in small but
//! game-visible ways, so they get their own handlers here.

use log::warn;

use crate::cdda::{PlayMode, PlayStatus};
use crate::commands::{
    do_nec_pause, do_read6, do_request_sense, do_test_unit_ready, CommandDef,
    ASC_INVALID_ADDRESS, SCF_REQUIRES_MEDIUM, SENSEKEY_ILLEGAL_REQUEST, STATUS_GOOD,
};
use crate::drive::{Host, ScsiCd, IRQ_DATA_TRANSFER_DONE};
use crate::toc::{amsf_to_lba, bcd_to_u8, lba_to_amsf, u8_to_bcd};

#[rustfmt::skip]
pub(crate) static PCE_COMMANDS: [CommandDef; 8] = [
    CommandDef { opcode: 0x00, flags: SCF_REQUIRES_MEDIUM, handler: do_test_unit_ready, name: "Test Unit Ready" },
    CommandDef { opcode: 0x03, flags: 0, handler: do_request_sense, name: "Request Sense" },
    CommandDef { opcode: 0x08, flags: SCF_REQUIRES_MEDIUM, handler: do_read6, name: "Read(6)" },
    CommandDef { opcode: 0xd8, flags: SCF_REQUIRES_MEDIUM, handler: do_sapsp, name: "Set Audio Playback Start Position" },
    CommandDef { opcode: 0xd9, flags: SCF_REQUIRES_MEDIUM, handler: do_sapep, name: "Set Audio Playback End Position" },
    CommandDef { opcode: 0xda, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_pause, name: "Pause" },
    CommandDef { opcode: 0xdd, flags: SCF_REQUIRES_MEDIUM, handler: do_read_subq, name: "Read Subchannel Q" },
    CommandDef { opcode: 0xde, flags: SCF_REQUIRES_MEDIUM, handler: do_get_dir_info, name: "Get Dir Info" },
];

/// Decode the position argument shared by the PCE SAPSP/SAPEP commands. Track 0 aliases to
/// track 1 and the raw byte one past the last track aliases to the leadout.
fn decode_position(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) -> Option<u32> {
    let lba = match cdb[9] & 0xc0 {
        0x40 => amsf_to_lba(bcd_to_u8(cdb[2]), bcd_to_u8(cdb[3]), bcd_to_u8(cdb[4])) as u32,
        0x80 => {
            let mut track = bcd_to_u8(cdb[2]) as usize;

            if track == 0 {
                track = 1;
            } else if cdb[2] == cd.toc.last_track + 1 {
                track = 100;
            } else if track > cd.toc.last_track as usize {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_ADDRESS,
                    0x00,
                );
                return None;
            }

            cd.toc.tracks[track].lba
        }
        _ => (u32::from(cdb[3]) << 16) | (u32::from(cdb[4]) << 8) | u32::from(cdb[5]),
    };

    Some(lba)
}

fn do_sapsp(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let new_start = match decode_position(cd, host, cdb) {
        Some(lba) => lba,
        None => return,
    };

    // Games hammer the track search command while polling; a repeat seek to the position
    // already playing within ~190ms doesn't interrupt playback
    let since_last = (cd.monotonic_ts - cd.last_track_search_ts) * 1000 / i64::from(cd.host_clock);

    if cd.cdda.status == PlayStatus::Playing && new_start == cd.read_sec_start && since_last < 190 {
        cd.last_track_search_ts = cd.monotonic_ts;

        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        host.irq(IRQ_DATA_TRANSFER_DONE);
        return;
    }

    cd.last_track_search_ts = cd.monotonic_ts;

    cd.cdda.read_pos = 588;
    cd.read_sec = new_start;
    cd.read_sec_start = new_start;
    cd.read_sec_end = cd.toc.leadout_lba();

    if cdb[1] != 0 {
        cd.cdda.play_mode = PlayMode::Normal;
        cd.cdda.status = PlayStatus::Playing;
    } else {
        cd.cdda.play_mode = PlayMode::Silent;
        cd.cdda.status = PlayStatus::Paused;
    }

    if cd.read_sec < cd.toc.leadout_lba() {
        if let Some(disc) = cd.disc.as_mut() {
            disc.hint_read_sector(cd.read_sec);
        }
    }

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
    host.irq(IRQ_DATA_TRANSFER_DONE);
}

fn do_sapep(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let new_end = match decode_position(cd, host, cdb) {
        Some(lba) => lba,
        None => return,
    };

    cd.read_sec_end = new_end;

    match cdb[1] {
        0x01 => {
            cd.cdda.play_mode = PlayMode::Loop;
            cd.cdda.status = PlayStatus::Playing;
        }
        0x02 => {
            cd.cdda.play_mode = PlayMode::Interrupt;
            cd.cdda.status = PlayStatus::Playing;
        }
        0x03 => {
            cd.cdda.play_mode = PlayMode::Normal;
            cd.cdda.status = PlayStatus::Playing;
        }
        _ => {
            cd.cdda.play_mode = PlayMode::Silent;
            cd.cdda.status = PlayStatus::Stopped;
        }
    }

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_read_subq(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    let q = cd.subq.q_bufs[crate::subq::QMODE_TIME];

    let mut data = [0u8; 10];

    data[0] = match cd.cdda.status {
        PlayStatus::Paused => 2,
        PlayStatus::Playing | PlayStatus::Scanning => 0,
        PlayStatus::Stopped => 3,
    };

    data[1] = q[0]; // Control/ADR
    data[2] = q[1]; // Track
    data[3] = q[2]; // Index
    data[4] = q[3]; // M (rel)
    data[5] = q[4]; // S (rel)
    data[6] = q[5]; // F (rel)
    data[7] = q[7]; // M (abs)
    data[8] = q[8]; // S (abs)
    data[9] = q[9]; // F (abs)

    // Unlike the PC-FX flavor, the transfer length here is fixed
    cd.do_simple_data_in(host, &data);
}

fn do_get_dir_info(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let mut data = [0u8; 4];
    let data_in_size: usize;

    let mode = if cdb[1] > 0x2 {
        warn!("Unknown GETDIRINFO mode {:02x}", cdb[1]);
        0x0
    } else {
        cdb[1]
    };

    match mode {
        0x0 => {
            data[0] = u8_to_bcd(cd.toc.first_track);
            data[1] = u8_to_bcd(cd.toc.last_track);

            data_in_size = 2;
        }

        0x1 => {
            let (m, s, f) = lba_to_amsf(cd.toc.leadout_lba() as i32);

            data[0] = u8_to_bcd(m);
            data[1] = u8_to_bcd(s);
            data[2] = u8_to_bcd(f);

            data_in_size = 3;
        }

        _ => {
            let mut track = bcd_to_u8(cdb[2]) as usize;

            if track == 0 {
                track = 1;
            } else if cdb[2] == cd.toc.last_track + 1 {
                track = 100;
            } else if track > cd.toc.last_track as usize {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_ADDRESS,
                    0x00,
                );
                return;
            }

            let (m, s, f) = lba_to_amsf(cd.toc.tracks[track].lba as i32);

            data[0] = u8_to_bcd(m);
            data[1] = u8_to_bcd(s);
            data[2] = u8_to_bcd(f);
            data[3] = cd.toc.tracks[track].control;

            data_in_size = 4;
        }
    }

    cd.do_simple_data_in(host, &data[..data_in_size]);
}
