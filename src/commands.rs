//! Command decoding and the per-opcode handlers for the PC-FX command set (the PCE variant
//! table lives in `pce.rs`). Handlers never return errors: failures become pending sense
//! data and a CHECK CONDITION status on the bus.

use arrayref::array_ref;
use log::{debug, warn};

use crate::bitwise::Bitwise;
use crate::bus::Phase;
use crate::cdda::{PlayMode, PlayStatus};
use crate::drive::{DriveKind, Host, ScsiCd};
use crate::mode_pages::{self, ModePages, MODE_PAGE_DEFS};
use crate::pce;
use crate::subq::QMODE_TIME;
use crate::toc::{amsf_to_lba, bcd_to_u8, bcd_to_u8_checked, lba_to_amsf, u8_to_bcd};

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 1;
pub const STATUS_CONDITION_MET: u8 = 2;

pub const SENSEKEY_NOT_READY: u8 = 0x2;
pub const SENSEKEY_MEDIUM_ERROR: u8 = 0x3;
pub const SENSEKEY_ILLEGAL_REQUEST: u8 = 0x5;
pub const SENSEKEY_UNIT_ATTENTION: u8 = 0x6;

// NEC sub-errors (ASC), no ASCQ unless noted
/// Tray is closed but no disc is present
pub const ASC_NO_DISC: u8 = 0x0b;
pub const ASC_TRAY_OPEN: u8 = 0x0d;
/// Used with SENSEKEY_MEDIUM_ERROR
pub const ASC_HEADER_READ_ERROR: u8 = 0x16;
/// Used with SENSEKEY_MEDIUM_ERROR
pub const ASC_NOT_AUDIO_TRACK: u8 = 0x1c;
/// Used with SENSEKEY_MEDIUM_ERROR
pub const ASC_NOT_DATA_TRACK: u8 = 0x1d;
pub const ASC_INVALID_COMMAND: u8 = 0x20;
pub const ASC_INVALID_ADDRESS: u8 = 0x21;
pub const ASC_INVALID_PARAMETER: u8 = 0x22;
pub const ASC_END_OF_VOLUME: u8 = 0x25;
pub const ASC_INVALID_REQUEST_IN_CDB: u8 = 0x27;
/// Used with SENSEKEY_UNIT_ATTENTION
pub const ASC_DISC_CHANGED: u8 = 0x28;
pub const ASC_AUDIO_NOT_PLAYING: u8 = 0x2c;
/// ASC/ASCQ pair, used with SENSEKEY_MEDIUM_ERROR
pub const ASC_LEC_UNCORRECTABLE: u8 = 0x11;
pub const ASCQ_LEC_UNCORRECTABLE: u8 = 0x05;
/// Defined by SCSI-2 but only the NEC codes above are ever raised
pub const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3a;

pub const SCF_REQUIRES_MEDIUM: u32 = 0x0001;
pub const SCF_UNTESTED: u32 = 0x8000;

/// CDB length by opcode group (the high nibble of the opcode)
static REQUIRED_CDB_LEN: [u32; 16] = [6, 6, 10, 10, 10, 10, 10, 10, 10, 10, 12, 12, 10, 10, 10, 10];

pub(crate) fn required_cdb_len(opcode: u8) -> u32 {
    REQUIRED_CDB_LEN[(opcode >> 4) as usize]
}

pub(crate) type CommandHandler = fn(&mut ScsiCd, &mut dyn Host, &[u8]);

pub(crate) struct CommandDef {
    pub opcode: u8,
    pub flags: u32,
    pub handler: CommandHandler,
    pub name: &'static str,
}

pub(crate) fn lookup(kind: DriveKind, opcode: u8) -> Option<&'static CommandDef> {
    let table: &[CommandDef] = match kind {
        DriveKind::Pcfx => &PCFX_COMMANDS,
        DriveKind::Pce => &pce::PCE_COMMANDS,
    };

    table.iter().find(|def| def.opcode == opcode)
}

#[rustfmt::skip]
pub(crate) static PCFX_COMMANDS: [CommandDef; 34] = [
    CommandDef { opcode: 0x00, flags: SCF_REQUIRES_MEDIUM, handler: do_test_unit_ready, name: "Test Unit Ready" },
    CommandDef { opcode: 0x01, flags: 0, handler: do_rezero_unit, name: "Rezero Unit" },
    CommandDef { opcode: 0x03, flags: 0, handler: do_request_sense, name: "Request Sense" },
    CommandDef { opcode: 0x08, flags: SCF_REQUIRES_MEDIUM, handler: do_read6, name: "Read(6)" },
    CommandDef { opcode: 0x0b, flags: SCF_REQUIRES_MEDIUM, handler: do_seek6, name: "Seek(6)" },
    CommandDef { opcode: 0x0d, flags: 0, handler: do_nec_nop, name: "No Operation" },
    CommandDef { opcode: 0x12, flags: 0, handler: do_inquiry, name: "Inquiry" },
    CommandDef { opcode: 0x15, flags: 0, handler: do_mode_select6, name: "Mode Select(6)" },
    CommandDef { opcode: 0x1a, flags: 0, handler: do_mode_sense6, name: "Mode Sense(6)" },
    CommandDef { opcode: 0x1b, flags: SCF_REQUIRES_MEDIUM, handler: do_start_stop_unit, name: "Start/Stop Unit" },
    CommandDef { opcode: 0x1e, flags: 0, handler: do_prevent_allow_removal, name: "Prevent/Allow Media Removal" },
    CommandDef { opcode: 0x25, flags: SCF_REQUIRES_MEDIUM, handler: do_read_cd_capacity, name: "Read CD-ROM Capacity" },
    CommandDef { opcode: 0x28, flags: SCF_REQUIRES_MEDIUM, handler: do_read10, name: "Read(10)" },
    CommandDef { opcode: 0x2b, flags: SCF_REQUIRES_MEDIUM, handler: do_seek10, name: "Seek(10)" },
    CommandDef { opcode: 0x34, flags: SCF_REQUIRES_MEDIUM, handler: do_prefetch, name: "Prefetch" },
    CommandDef { opcode: 0x42, flags: SCF_REQUIRES_MEDIUM, handler: do_read_subchannel, name: "Read Subchannel" },
    CommandDef { opcode: 0x43, flags: SCF_REQUIRES_MEDIUM, handler: do_read_toc, name: "Read TOC" },
    CommandDef { opcode: 0x44, flags: SCF_REQUIRES_MEDIUM, handler: do_read_header, name: "Read Header" },
    CommandDef { opcode: 0x45, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio10, name: "Play Audio(10)" },
    CommandDef { opcode: 0x47, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio_msf, name: "Play Audio MSF" },
    CommandDef { opcode: 0x48, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio_track_index, name: "Play Audio Track Index" },
    CommandDef { opcode: 0x49, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio_track_relative10, name: "Play Audio Track Relative(10)" },
    CommandDef { opcode: 0x4b, flags: SCF_REQUIRES_MEDIUM, handler: do_pause_resume, name: "Pause/Resume" },
    CommandDef { opcode: 0xa5, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio12, name: "Play Audio(12)" },
    CommandDef { opcode: 0xa8, flags: SCF_REQUIRES_MEDIUM, handler: do_read12, name: "Read(12)" },
    CommandDef { opcode: 0xa9, flags: SCF_REQUIRES_MEDIUM, handler: do_play_audio_track_relative12, name: "Play Audio Track Relative(12)" },
    CommandDef { opcode: 0xd2, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_scan, name: "Scan" },
    CommandDef { opcode: 0xd8, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_sapsp, name: "Set Audio Playback Start Position" },
    CommandDef { opcode: 0xd9, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_sapep, name: "Set Audio Playback End Position" },
    CommandDef { opcode: 0xda, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_pause, name: "Pause" },
    CommandDef { opcode: 0xdb, flags: SCF_REQUIRES_MEDIUM | SCF_UNTESTED, handler: do_nec_set_stop_time, name: "Set Stop Time" },
    CommandDef { opcode: 0xdc, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_eject, name: "Eject" },
    CommandDef { opcode: 0xdd, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_read_subq, name: "Read Subchannel Q" },
    CommandDef { opcode: 0xde, flags: SCF_REQUIRES_MEDIUM, handler: do_nec_get_dir_info, name: "Get Dir Info" },
];

fn de16msb(b: &[u8]) -> u32 {
    u32::from(u16::from_be_bytes(*array_ref![b, 0, 2]))
}

fn de24msb(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn de32msb(b: &[u8]) -> u32 {
    u32::from_be_bytes(*array_ref![b, 0, 4])
}

fn en16msb(b: &mut [u8], v: u16) {
    b[..2].copy_from_slice(&v.to_be_bytes());
}

fn en24msb(b: &mut [u8], v: u32) {
    b[0] = (v >> 16) as u8;
    b[1] = (v >> 8) as u8;
    b[2] = v as u8;
}

fn en32msb(b: &mut [u8], v: u32) {
    b[..4].copy_from_slice(&v.to_be_bytes());
}

/// Fixed 18 byte sense block layout
pub(crate) fn make_sense(key: u8, asc: u8, ascq: u8, fru: u8) -> [u8; 18] {
    let mut b = [0u8; 18];

    // Current errors; the sense data layout is not quite SCSI compliant
    b[0] = 0x70;
    b[2] = key;
    b[7] = 0x0a;
    b[12] = asc;
    b[13] = ascq;
    b[14] = fru;

    b
}

pub(crate) fn do_test_unit_ready(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_rezero_unit(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_nec_nop(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_nec_set_stop_time(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_nec_eject(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_REQUEST_IN_CDB, 0x00);
}

fn do_prevent_allow_removal(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_REQUEST_IN_CDB, 0x00);
}

fn do_start_stop_unit(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

pub(crate) fn do_request_sense(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    let sense = make_sense(cd.sense.key, cd.sense.asc, cd.sense.ascq, cd.sense.fru);

    cd.do_simple_data_in(host, &sense);

    cd.sense = Default::default();
}

// Miraculum behaves differently if the last byte (offset 0x23) of the inquiry data is 0x45
// (ASCII 'E'): it runs MODE SELECT and transfers 00 00 00 00 29 01 00 to the drive.
static INQUIRY_DATA: [u8; 0x24] = [
    // CD-ROM, removable media, SCSI-2, response data format 0
    0x05, 0x80, 0x02, 0x00,
    // Additional length
    0x1f,
    // Reserved
    0x00, 0x00,
    // No special funky features
    0x00,
    // Vendor ID: "NEC     "
    0x4e, 0x45, 0x43, 0x20, 0x20, 0x20, 0x20, 0x20,
    // Product ID: "CD-ROM DRIVE:FX "
    0x43, 0x44, 0x2d, 0x52, 0x4f, 0x4d, 0x20, 0x44, 0x52, 0x49, 0x56, 0x45, 0x3a, 0x46, 0x58,
    0x20,
    // Product revision level: "1.0 "
    0x31, 0x2e, 0x30, 0x20,
];

fn do_inquiry(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let alloc_size = (cdb[4] as usize).min(INQUIRY_DATA.len());

    if alloc_size > 0 {
        cd.do_simple_data_in(host, &INQUIRY_DATA[..alloc_size]);
    } else {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
    }
}

fn do_mode_select6(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    if cdb[4] != 0 {
        cd.data_out_pos = 0;
        cd.data_out_want = cdb[4];

        cd.change_phase(host, Phase::DataOut);
    } else {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
    }
}

/// Apply the MODE SELECT(6) payload staged in `data_out`
pub(crate) fn finish_mode_select(cd: &mut ScsiCd, host: &mut dyn Host) {
    let data_len = cd.data_out_want as usize;
    let mut payload = [0u8; 256];
    payload[..data_len].copy_from_slice(&cd.data_out[..data_len]);
    let data = &payload[..data_len];

    if data_len < 4 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let mut offset = 0;

    let _mode_data_length = data[offset];
    let _medium_type = data[offset + 1];
    let _device_specific = data[offset + 2];
    let block_descriptor_length = data[offset + 3] as usize;
    offset += 4;

    if block_descriptor_length & 0x7 != 0 || offset + block_descriptor_length > data_len {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    // Block descriptors are accepted but ignored
    offset += block_descriptor_length;

    while offset < data_len {
        let code = data[offset];
        offset += 1;

        // Legacy pseudo-page, fixed six byte length and no effect beyond the cache poke
        if code == 0x00 {
            if offset + 0x5 > data_len {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_PARAMETER,
                    0x00,
                );
                return;
            }

            mode_pages::update_cache(cd, 0x00);

            offset += 0x5;
            continue;
        }

        if offset >= data_len {
            cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
            return;
        }

        let param_len = data[offset] as usize;
        offset += 1;

        let index = match ModePages::index_of(code) {
            Some(i) => i,
            None => {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_PARAMETER,
                    0x00,
                );
                return;
            }
        };

        if param_len != MODE_PAGE_DEFS[index].param_length() || offset + param_len > data_len {
            cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
            return;
        }

        for parami in 0..param_len {
            cd.mode_pages.apply_param(index, parami, data[offset]);
            offset += 1;
        }

        mode_pages::update_cache_indexed(cd, index);
    }

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_mode_sense6(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let pc = (cdb[2] >> 6) & 0x3;
    let page_code = cdb[2] & 0x3f;
    let dbd = cdb[1].bit(3);
    let mut alloc_size = cdb[4] as usize;

    if alloc_size == 0 {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    if pc == 3 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    // Special weird legacy case
    if page_code == 0x00 {
        if dbd || pc != 0 {
            cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
            return;
        }

        let mut data = [0u8; 0xa];
        data[0] = 0x09;
        data[2] = 0x80;
        data[9] = 0x0f;

        if alloc_size > 0xa {
            alloc_size = 0xa;
        }

        cd.do_simple_data_in(host, &data[..alloc_size]);
        return;
    }

    let mut data = [0u8; 64];
    let mut index = 0;

    data[0] = 0x00; // Filled in later
    data[1] = 0x00; // Medium type
    data[2] = 0x00; // Device-specific parameter
    data[3] = if dbd { 0x00 } else { 0x08 }; // Block descriptor length
    index += 4;

    if !dbd {
        data[index] = 0x00; // Density code
        en24msb(&mut data[index + 1..], 0x6e); // Number of blocks?
        index += 4;

        data[index] = 0x00; // Reserved
        en24msb(&mut data[index + 1..], 0x800); // Block length
        index += 4;
    }

    let page_match_or = if page_code == 0x3f { 0x3f } else { 0x00 };
    let mut any_page_match = false;

    for (pi, def) in MODE_PAGE_DEFS.iter().enumerate() {
        if (def.code | page_match_or) != page_code {
            continue;
        }

        any_page_match = true;

        data[index] = def.code;
        data[index + 1] = def.param_length() as u8;
        index += 2;

        for (parami, param) in def.params.iter().enumerate() {
            data[index] = match pc {
                0x02 => param.default_value,
                0x01 => param.alterable_mask,
                _ => cd.mode_pages.current(pi)[parami],
            };
            index += 1;
        }
    }

    if !any_page_match {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    if alloc_size > index {
        alloc_size = index;
    }

    data[0] = (alloc_size - 1) as u8;

    cd.do_simple_data_in(host, &data[..alloc_size]);
}

fn do_read_base(cd: &mut ScsiCd, host: &mut dyn Host, sa: u32, sc: u32) {
    let leadout = cd.toc.leadout_lba();

    // Another one of those off-by-one PC-FX CD bugs: > instead of >=
    if sa > leadout {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    let track = cd.toc.find_track_by_lba(sa);

    if track == 0 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    // READ(10)/READ(12) with a zero count right at the leadout
    if sc == 0 && sa == leadout {
        cd.command_check_condition(host, SENSEKEY_MEDIUM_ERROR, ASC_HEADER_READ_ERROR, 0x00);
        return;
    }

    debug!(
        "Read: start={:#010x} (track={}, offs={:#x}), cnt={:#x}",
        sa,
        track,
        sa - cd.toc.tracks[track as usize].lba,
        sc
    );

    if sc > 0 {
        if let Some(disc) = cd.disc.as_mut() {
            disc.hint_read_sector(sa);
        }

        cd.arm_sector_read(sa, sc);
    } else {
        cd.sector_addr = sa;
        cd.sector_count = 0;
        cd.read_timer = 0;

        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
    }

    cd.cdda.status = PlayStatus::Stopped;
}

pub(crate) fn do_read6(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let sa = (u32::from(cdb[1] & 0x1f) << 16) | (u32::from(cdb[2]) << 8) | u32::from(cdb[3]);
    let mut sc = u32::from(cdb[4]);

    // A zero count reads the full 256 sectors
    if sc == 0 {
        sc = 256;
    }

    do_read_base(cd, host, sa, sc);
}

fn do_read10(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let sa = de32msb(&cdb[2..]);
    let sc = de16msb(&cdb[7..]);

    do_read_base(cd, host, sa, sc);
}

fn do_read12(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let sa = de32msb(&cdb[2..]);
    let sc = de32msb(&cdb[6..]);

    do_read_base(cd, host, sa, sc);
}

fn do_prefetch(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let lba = de32msb(&cdb[2..]);

    // A real PC-FX locks up to some degree when lba + length crosses the leadout, so this
    // stays deliberately partial
    if lba >= cd.toc.leadout_lba() {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    cd.send_status_and_message(host, STATUS_CONDITION_MET, 0x00);
}

// Seeks are instantaneous for now, until seek delays get emulated
fn do_seek_base(cd: &mut ScsiCd, host: &mut dyn Host, lba: u32) {
    if lba >= cd.toc.leadout_lba() {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    cd.cdda.status = PlayStatus::Stopped;
    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_seek6(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let lba = (u32::from(cdb[1] & 0x1f) << 16) | (u32::from(cdb[2]) << 8) | u32::from(cdb[3]);

    do_seek_base(cd, host, lba);
}

fn do_seek10(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    do_seek_base(cd, host, de32msb(&cdb[2..]));
}

fn do_read_cd_capacity(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let pmi = cdb[8].bit(0);
    let lba = de32msb(&cdb[2..]);

    if lba > 0x05ff69 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    let leadout = cd.toc.leadout_lba();
    let first_lba = cd.toc.tracks[cd.toc.first_track as usize].lba;

    let mut ret_lba = leadout - 1;

    if pmi {
        // Report the last sector of the region (ending at a track-type boundary) that
        // contains the given address
        if lba >= leadout {
            ret_lba = leadout - 1;
        } else if lba < first_lba {
            ret_lba = first_lba - 1;
        } else {
            let track = cd.toc.find_track_by_lba(lba) as usize;

            for next in track + 1..=cd.toc.last_track as usize {
                if (cd.toc.tracks[next].control ^ cd.toc.tracks[track].control) & 0x4 != 0 {
                    ret_lba = cd.toc.tracks[next].lba - 1;
                    break;
                }
            }
        }
    }

    let mut data = [0u8; 8];

    en32msb(&mut data[0..], ret_lba);
    en32msb(&mut data[4..], 2048); // Block length

    cd.cdda.status = PlayStatus::Stopped;

    cd.do_simple_data_in(host, &data);
}

fn do_read_header(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let want_msf = cdb[1].bit(1);
    let header_lba = de32msb(&cdb[2..]);
    let alloc_size = de16msb(&cdb[7..]);

    // A real PC-FX returns success with a zero allocation even without a disc
    if alloc_size == 0 {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    if header_lba >= cd.toc.leadout_lba()
        || header_lba < cd.toc.tracks[cd.toc.first_track as usize].lba
    {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let mut raw = [0u8; crate::disc::RAW_SECTOR_SIZE];

    if let Some(disc) = cd.disc.as_mut() {
        disc.read_raw_sector(&mut raw, header_lba);
    }

    if !cd.validate_raw_data_sector(host, &mut raw) {
        return;
    }

    let m = bcd_to_u8(raw[12]);
    let s = bcd_to_u8(raw[12 + 1]);
    let f = bcd_to_u8(raw[12 + 2]);
    let mode = raw[12 + 3];
    let lba = amsf_to_lba(m, s, f);

    let mut data = [0u8; 8];

    data[0] = mode;

    if want_msf {
        data[4] = 0;
        data[5] = m;
        data[6] = s;
        data[7] = f;
    } else {
        en32msb(&mut data[4..], lba as u32);
    }

    cd.cdda.status = PlayStatus::Stopped;

    cd.do_simple_data_in(host, &data);
}

/// Common entry point of the whole PLAY AUDIO family
pub(crate) fn play_audio_base(
    cd: &mut ScsiCd,
    host: &mut dyn Host,
    lba: u32,
    length: u32,
    status: PlayStatus,
    mode: PlayMode,
) {
    // > is not a typo: a real PC-FX accepts playback starting right at the leadout
    if lba > cd.toc.leadout_lba() {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    if lba < cd.toc.tracks[cd.toc.first_track as usize].lba {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    if length == 0 {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    let track = cd.toc.find_track_by_lba(lba) as usize;

    if cd.toc.tracks[track].control & 0x04 != 0 {
        cd.command_check_condition(host, SENSEKEY_MEDIUM_ERROR, ASC_NOT_AUDIO_TRACK, 0x00);
        return;
    }

    cd.cdda.read_pos = 588;
    cd.read_sec = lba;
    cd.read_sec_start = lba;
    cd.read_sec_end = lba.wrapping_add(length);

    cd.cdda.status = status;
    cd.cdda.play_mode = mode;

    if cd.read_sec < cd.toc.leadout_lba() {
        if let Some(disc) = cd.disc.as_mut() {
            disc.hint_read_sector(lba);
        }
    }

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_play_audio10(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let lba = de32msb(&cdb[2..]);
    let length = de16msb(&cdb[7..]);

    play_audio_base(cd, host, lba, length, PlayStatus::Playing, PlayMode::Normal);
}

fn do_play_audio12(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let lba = de32msb(&cdb[2..]);
    let length = de32msb(&cdb[6..]);

    play_audio_base(cd, host, lba, length, PlayStatus::Playing, PlayMode::Normal);
}

fn do_play_audio_msf(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    // The MSF fields here are plain binary, not BCD
    let lba_start = amsf_to_lba(cdb[3], cdb[4], cdb[5]);
    let lba_end = amsf_to_lba(cdb[6], cdb[7], cdb[8]);

    if lba_start < 0 || lba_end < 0 || lba_start >= cd.toc.leadout_lba() as i32 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_END_OF_VOLUME, 0x00);
        return;
    }

    if lba_start == lba_end {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    if lba_start > lba_end {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_ADDRESS, 0x00);
        return;
    }

    play_audio_base(
        cd,
        host,
        lba_start as u32,
        (lba_end - lba_start) as u32,
        PlayStatus::Playing,
        PlayMode::Normal,
    );
}

fn do_play_audio_track_index(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    // "Boundary Gate" uses this command. The index fields aren't handled: the ending index
    // wouldn't be too bad, but the starting index would require scanning the sub-Q for the
    // index transition.
    let start_track = cdb[4] as usize;
    let end_track = cdb[7] as usize;

    if start_track == 0
        || start_track < cd.toc.first_track as usize
        || start_track > cd.toc.last_track as usize
        || end_track > 100
    {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let start = cd.toc.tracks[start_track].lba;
    let length = cd.toc.tracks[end_track].lba.wrapping_sub(start);

    play_audio_base(cd, host, start, length, PlayStatus::Playing, PlayMode::Normal);
}

fn do_play_audio_track_relative_base(
    cd: &mut ScsiCd,
    host: &mut dyn Host,
    rel_lba: u32,
    start_track: usize,
    length: u32,
) {
    if start_track == 0
        || start_track < cd.toc.first_track as usize
        || start_track > cd.toc.last_track as usize
    {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let lba = cd.toc.tracks[start_track].lba.wrapping_add(rel_lba);

    play_audio_base(cd, host, lba, length, PlayStatus::Playing, PlayMode::Normal);
}

fn do_play_audio_track_relative10(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    // The relative address is signed, out-of-disc results fall out of the base checks
    let rel_lba = de32msb(&cdb[2..]);
    let start_track = cdb[6] as usize;
    let length = de16msb(&cdb[7..]);

    do_play_audio_track_relative_base(cd, host, rel_lba, start_track, length);
}

fn do_play_audio_track_relative12(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let rel_lba = de32msb(&cdb[2..]);
    let start_track = cdb[10] as usize;
    let length = de32msb(&cdb[6..]);

    do_play_audio_track_relative_base(cd, host, rel_lba, start_track, length);
}

fn do_pause_resume(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    // "It shall not be considered an error to request a pause when a pause is already in
    // effect, or to request a resume when a play operation is in progress."
    if cd.cdda.status == PlayStatus::Stopped {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_AUDIO_NOT_PLAYING, 0x00);
        return;
    }

    cd.cdda.status = if cdb[8].bit(0) {
        PlayStatus::Playing
    } else {
        PlayStatus::Paused
    };

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_read_subchannel(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let data_format = cdb[3];
    let track_num = cdb[6];
    let alloc_size = de16msb(&cdb[7..]) as usize;
    let want_q = cdb[2].bit(6);
    let want_msf = cdb[1].bit(1);

    if alloc_size == 0 {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    if data_format > 0x3 {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    if data_format == 0x3 && (track_num < cd.toc.first_track || track_num > cd.toc.last_track) {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let mut data = [0u8; 96];
    let mut offset = 0;

    data[offset] = 0;
    offset += 1;

    data[offset] = match cd.cdda.status {
        PlayStatus::Playing | PlayStatus::Scanning => 0x11, // Audio play in progress
        PlayStatus::Paused => 0x12,                         // Audio play paused
        PlayStatus::Stopped => 0x13,                        // Play completed successfully
    };
    offset += 1;

    // Subchannel data length, filled in at the end
    data[offset] = 0x00;
    data[offset + 1] = 0x00;
    offset += 2;

    if want_q {
        let q = cd.subq.q_bufs[QMODE_TIME];

        data[offset] = data_format;
        offset += 1;

        if data_format == 0x0 || data_format == 0x1 {
            // Control/ADR, nibble-swapped relative to the raw Q
            data[offset] = ((q[0] & 0x0f) << 4) | ((q[0] & 0xf0) >> 4);
            data[offset + 1] = q[1]; // Track
            data[offset + 2] = q[2]; // Index
            offset += 3;

            // Absolute address
            if want_msf {
                data[offset] = 0;
                data[offset + 1] = bcd_to_u8(q[7]);
                data[offset + 2] = bcd_to_u8(q[8]);
                data[offset + 3] = bcd_to_u8(q[9]);
            } else {
                let lba = i32::from(bcd_to_u8(q[7])) * 60 * 75
                    + i32::from(bcd_to_u8(q[8])) * 75
                    + i32::from(bcd_to_u8(q[9]))
                    - 150;

                en32msb(&mut data[offset..], lba as u32);
            }
            offset += 4;

            // Relative address, no 150 sector offset in the conversion
            if want_msf {
                data[offset] = 0;
                data[offset + 1] = bcd_to_u8(q[3]);
                data[offset + 2] = bcd_to_u8(q[4]);
                data[offset + 3] = bcd_to_u8(q[5]);
            } else {
                let lba = i32::from(bcd_to_u8(q[3])) * 60 * 75
                    + i32::from(bcd_to_u8(q[4])) * 75
                    + i32::from(bcd_to_u8(q[5]));

                en32msb(&mut data[offset..], lba as u32);
            }
            offset += 4;
        }

        // Media catalog number, never present
        if data_format == 0x0 || data_format == 0x2 {
            if data_format == 0x2 {
                data[offset] = 0x00;
                data[offset + 1] = 0x00;
                data[offset + 2] = 0x00;
                offset += 3;
            }

            // MCVal + zero filled MCN
            for _ in 0..16 {
                data[offset] = 0x00;
                offset += 1;
            }
        }

        // Track ISRC, never present either
        if data_format == 0x0 || data_format == 0x3 {
            if data_format == 0x3 {
                data[offset] = ((q[0] & 0x0f) << 4) | ((q[0] & 0xf0) >> 4);
                data[offset + 1] = track_num; // From sub-Q or from the CDB?
                data[offset + 2] = 0x00;
                offset += 3;
            }

            // TCVal + zero filled ISRC
            for _ in 0..16 {
                data[offset] = 0x00;
                offset += 1;
            }
        }
    }

    en16msb(&mut data[2..], (offset - 4) as u16);

    let transfer = offset.min(alloc_size);
    cd.do_simple_data_in(host, &data[..transfer]);
}

fn do_read_toc(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let first_track = cd.toc.first_track;
    let last_track = cd.toc.last_track;
    let mut starting_track = cdb[6];
    let alloc_size = de16msb(&cdb[7..]) as usize;
    let want_msf = cdb[1].bit(1);

    if alloc_size == 0 {
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
        return;
    }

    if (cdb[1] & !0x2) != 0
        || cdb[2] != 0
        || cdb[3] != 0
        || cdb[4] != 0
        || cdb[5] != 0
        || cdb[9] != 0
    {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    if starting_track == 0 {
        starting_track = 1;
    } else if starting_track == 0xaa {
        starting_track = last_track + 1;
    } else if starting_track > last_track {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
        return;
    }

    let mut data = [0u8; 1024];

    data[2] = first_track;
    data[3] = last_track;

    let mut real_size = 4;

    // The leadout is reported as one extra descriptor past the last track
    for track in starting_track..=(last_track + 1) {
        let eff_track = if track == last_track + 1 {
            100
        } else {
            track as usize
        };

        let entry = cd.toc.tracks[eff_track];
        let lba = entry.lba;
        let (m, s, f) = lba_to_amsf(lba as i32);

        data[real_size] = 0;
        data[real_size + 1] = entry.control | (entry.adr << 4);
        data[real_size + 2] = if eff_track == 100 { 0xaa } else { track };
        data[real_size + 3] = 0;

        if want_msf {
            data[real_size + 4] = 0;
            data[real_size + 5] = m;
            data[real_size + 6] = s;
            data[real_size + 7] = f;
        } else {
            en32msb(&mut data[real_size + 4..], lba);
        }

        real_size += 8;
    }

    // PC-FX: an allocation size that's too small doesn't reflect in this
    en16msb(&mut data[0..], (real_size - 2) as u16);

    let transfer = real_size.min(alloc_size);
    cd.do_simple_data_in(host, &data[..transfer]);
}

fn do_nec_sapsp(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let lba: u32 = match cdb[9] & 0xc0 {
        0x00 => de24msb(&cdb[3..]),
        0x40 => {
            let msf = (
                bcd_to_u8_checked(cdb[2]),
                bcd_to_u8_checked(cdb[3]),
                bcd_to_u8_checked(cdb[4]),
            );

            match msf {
                (Some(m), Some(s), Some(f)) => amsf_to_lba(m, s, f) as u32,
                _ => {
                    cd.command_check_condition(
                        host,
                        SENSEKEY_ILLEGAL_REQUEST,
                        ASC_INVALID_PARAMETER,
                        0x00,
                    );
                    return;
                }
            }
        }
        0x80 => {
            let track = match (cdb[2], bcd_to_u8_checked(cdb[2])) {
                (0, _) | (_, None) => {
                    cd.command_check_condition(
                        host,
                        SENSEKEY_ILLEGAL_REQUEST,
                        ASC_INVALID_PARAMETER,
                        0x00,
                    );
                    return;
                }
                (_, Some(t)) => t,
            };

            let track = if track == cd.toc.last_track + 1 {
                // One past the last track aliases to the leadout
                100
            } else if track > cd.toc.last_track {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_END_OF_VOLUME,
                    0x00,
                );
                return;
            } else {
                track as usize
            };

            cd.toc.tracks[track].lba
        }
        _ => {
            cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
            return;
        }
    };

    let length = cd.toc.leadout_lba().wrapping_sub(lba);

    if cdb[1].bit(0) {
        play_audio_base(cd, host, lba, length, PlayStatus::Playing, PlayMode::Normal);
    } else {
        // Audio track search: land on the position paused and silent
        play_audio_base(cd, host, lba, length, PlayStatus::Paused, PlayMode::Silent);
    }
}

fn do_nec_sapep(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    if cd.cdda.status == PlayStatus::Stopped {
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_AUDIO_NOT_PLAYING, 0x00);
        return;
    }

    let lba: u32 = match cdb[9] & 0xc0 {
        0x00 => de24msb(&cdb[3..]),
        0x40 => {
            let msf = (
                bcd_to_u8_checked(cdb[2]),
                bcd_to_u8_checked(cdb[3]),
                bcd_to_u8_checked(cdb[4]),
            );

            match msf {
                (Some(m), Some(s), Some(f)) => amsf_to_lba(m, s, f) as u32,
                _ => {
                    cd.command_check_condition(
                        host,
                        SENSEKEY_ILLEGAL_REQUEST,
                        ASC_INVALID_PARAMETER,
                        0x00,
                    );
                    return;
                }
            }
        }
        0x80 => {
            let track = match (cdb[2], bcd_to_u8_checked(cdb[2])) {
                (0, _) | (_, None) => {
                    cd.command_check_condition(
                        host,
                        SENSEKEY_ILLEGAL_REQUEST,
                        ASC_INVALID_PARAMETER,
                        0x00,
                    );
                    return;
                }
                (_, Some(t)) => t,
            };

            let track = if track == cd.toc.last_track + 1 {
                100
            } else if track > cd.toc.last_track {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_END_OF_VOLUME,
                    0x00,
                );
                return;
            } else {
                track as usize
            };

            cd.toc.tracks[track].lba
        }
        _ => {
            cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_INVALID_PARAMETER, 0x00);
            return;
        }
    };

    cd.cdda.play_mode = match cdb[1] & 0x7 {
        0x00 => PlayMode::Silent,
        0x04 => PlayMode::Loop,
        _ => PlayMode::Normal,
    };
    cd.cdda.status = PlayStatus::Playing;

    cd.read_sec_end = lba;

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

pub(crate) fn do_nec_pause(cd: &mut ScsiCd, host: &mut dyn Host, _cdb: &[u8]) {
    if cd.cdda.status != PlayStatus::Stopped {
        cd.cdda.status = PlayStatus::Paused;
        cd.send_status_and_message(host, STATUS_GOOD, 0x00);
    } else {
        // Definitely an error to pause when no track is playing
        cd.command_check_condition(host, SENSEKEY_ILLEGAL_REQUEST, ASC_AUDIO_NOT_PLAYING, 0x00);
    }
}

fn do_nec_scan(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let mut sector_tmp: u32 = 0;

    match cdb[9] & 0xc0 {
        0x00 => sector_tmp = de24msb(&cdb[3..]),
        0x40 => {
            sector_tmp =
                amsf_to_lba(bcd_to_u8(cdb[2]), bcd_to_u8(cdb[3]), bcd_to_u8(cdb[4])) as u32;
        }
        0x80 => {
            let track = (bcd_to_u8(cdb[2]) as usize).min(100);

            sector_tmp = cd.toc.tracks[track].lba;
        }
        _ => warn!("Unknown SCAN address format {:02x}", cdb[9]),
    }

    // Bit 0 of the mode selects the direction, set for reverse
    cd.cdda.scan_mode = cdb[1] & 0x3;
    cd.cdda.scan_sec_end = sector_tmp;

    if cd.cdda.status != PlayStatus::Stopped && cd.cdda.scan_mode != 0 {
        cd.cdda.status = PlayStatus::Scanning;
    }

    cd.send_status_and_message(host, STATUS_GOOD, 0x00);
}

fn do_nec_read_subq(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let q = cd.subq.q_bufs[QMODE_TIME];
    let alloc_size = (cdb[1] as usize).min(10);

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

    cd.do_simple_data_in(host, &data[..alloc_size]);
}

/// Write one lead-in style Q entry the way GETDIRINFO mode 3 reports them, sans CRC
fn encode_m3_toc_entry(buf: &mut [u8], pointer_raw: u8, lba: i32, plba: i32, control: u8) {
    let (m, s, f) = lba_to_amsf(lba);
    let (pm, ps, pf) = lba_to_amsf(plba);

    buf[0x0] = control << 4;
    buf[0x1] = 0x00; // TNO
    buf[0x2] = pointer_raw;
    buf[0x3] = u8_to_bcd(m);
    buf[0x4] = u8_to_bcd(s);
    buf[0x5] = u8_to_bcd(f);
    buf[0x6] = 0x00; // Zero
    buf[0x7] = u8_to_bcd(pm);
    buf[0x8] = u8_to_bcd(ps);
    buf[0x9] = u8_to_bcd(pf);
}

fn do_nec_get_dir_info(cd: &mut ScsiCd, host: &mut dyn Host, cdb: &[u8]) {
    let mut data = [0u8; 2048];
    let data_in_size: usize;

    match cdb[1] & 0x03 {
        // Raw TOC data as encoded in the lead-in Q subchannel, sans the CRC bytes.
        //
        // A real PC-FX has a few semi-indeterminate fields here that depend on where in the
        // lead-in the data was read; those aren't emulated.
        0x3 => {
            let mut lilba: i32 = -150;
            let match_code = cdb[2];

            if match_code != 0x00
                && match_code != 0xa0
                && match_code != 0xa1
                && match_code != 0xa2
                && match_code != 0xb0
            {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_ADDRESS,
                    0x00,
                );
                return;
            }

            // Total size - 2, filled in below
            let mut offset = 2;

            if match_code == 0 || match_code == 0xa0 {
                let first = cd.toc.first_track;

                encode_m3_toc_entry(
                    &mut data[offset..],
                    0xa0,
                    lilba,
                    i32::from(first) * 75 * 60 - 150,
                    cd.toc.tracks[first as usize].control,
                );
                lilba += 1;
                offset += 0xa;
            }

            if match_code == 0 || match_code == 0xa1 {
                let last = cd.toc.last_track;

                encode_m3_toc_entry(
                    &mut data[offset..],
                    0xa1,
                    lilba,
                    i32::from(last) * 75 * 60 - 150,
                    cd.toc.tracks[last as usize].control,
                );
                lilba += 1;
                offset += 0xa;
            }

            if match_code == 0 || match_code == 0xa2 {
                encode_m3_toc_entry(
                    &mut data[offset..],
                    0xa2,
                    lilba,
                    cd.toc.tracks[100].lba as i32,
                    cd.toc.tracks[100].control,
                );
                lilba += 1;
                offset += 0xa;
            }

            if match_code == 0 {
                for track in cd.toc.first_track..=cd.toc.last_track {
                    let entry = cd.toc.tracks[track as usize];

                    encode_m3_toc_entry(
                        &mut data[offset..],
                        u8_to_bcd(track),
                        lilba,
                        entry.lba as i32,
                        entry.control,
                    );
                    lilba += 1;
                    offset += 0xa;
                }
            }

            // Probably the catalog number, or something else; zero filled for now
            if match_code == 0xb0 {
                offset += 0x14;
            }

            data_in_size = offset;
            en16msb(&mut data[0..], (offset - 2) as u16);
        }

        0x0 => {
            data[0] = u8_to_bcd(cd.toc.first_track);
            data[1] = u8_to_bcd(cd.toc.last_track);

            data_in_size = 4;
        }

        0x1 => {
            let (m, s, f) = lba_to_amsf(cd.toc.leadout_lba() as i32);

            data[0] = u8_to_bcd(m);
            data[1] = u8_to_bcd(s);
            data[2] = u8_to_bcd(f);

            data_in_size = 4;
        }

        _ => {
            let track = bcd_to_u8(cdb[2]);

            if track < cd.toc.first_track || track > cd.toc.last_track {
                cd.command_check_condition(
                    host,
                    SENSEKEY_ILLEGAL_REQUEST,
                    ASC_INVALID_ADDRESS,
                    0x00,
                );
                return;
            }

            let (m, s, f) = lba_to_amsf(cd.toc.tracks[track as usize].lba as i32);

            data[0] = u8_to_bcd(m);
            data[1] = u8_to_bcd(s);
            data[2] = u8_to_bcd(f);
            data[3] = cd.toc.tracks[track as usize].control;

            data_in_size = 4;
        }
    }

    cd.do_simple_data_in(host, &data[..data_in_size]);
}
