//! Mode page storage for MODE SELECT(6)/MODE SENSE(6).
//!
//! Each page parameter carries three values: the default, the alterable mask reported when
//! the host asks for changeable values (PC = 1) and the mask of bits a MODE SELECT can
//! really change.

pub const NUM_MODE_PAGES: usize = 5;

/// Longest parameter list of any page (0x0E, the audio control page)
const MAX_PARAMS: usize = 14;

pub struct ModePageParam {
    pub default_value: u8,
    /// Alterable mask reported when PC == 1
    pub alterable_mask: u8,
    /// Real alterable mask
    pub real_mask: u8,
}

pub struct ModePageDef {
    pub code: u8,
    pub params: &'static [ModePageParam],
}

impl ModePageDef {
    pub fn param_length(&self) -> usize {
        self.params.len()
    }
}

const fn p(default_value: u8, alterable_mask: u8, real_mask: u8) -> ModePageParam {
    ModePageParam {
        default_value,
        alterable_mask,
        real_mask,
    }
}

/// The five pages the drive knows about. Page 0x0E goes last, for correct order of return
/// data when the sense page code is 0x3F.
pub static MODE_PAGE_DEFS: [ModePageDef; NUM_MODE_PAGES] = [
    // Unknown
    ModePageDef {
        code: 0x28,
        params: &[
            p(0x00, 0x00, 0xff),
            p(0x00, 0x00, 0xff),
            p(0x00, 0x00, 0xff),
            p(0x00, 0x00, 0xff),
        ],
    },
    // Unknown
    ModePageDef {
        code: 0x29,
        params: &[p(0x00, 0x00, 0xff)],
    },
    // Unknown
    ModePageDef {
        code: 0x2a,
        params: &[p(0x00, 0x00, 0xff), p(0x11, 0x00, 0xff)],
    },
    // CD-DA playback speed modifier
    ModePageDef {
        code: 0x2b,
        params: &[p(0x00, 0x00, 0xff)],
    },
    // CD-ROM audio control parameters. Real mask values are probably not right; some
    // functionality not emulated yet.
    ModePageDef {
        code: 0x0e,
        params: &[
            p(0x04, 0x04, 0x04), // Immed
            p(0x00, 0x00, 0x00), // Reserved
            p(0x00, 0x00, 0x00), // Reserved
            p(0x00, 0x01, 0x01), // Reserved?
            p(0x00, 0x00, 0x00), // MSB of LBA per second
            p(0x00, 0x00, 0x00), // LSB of LBA per second
            p(0x01, 0x01, 0x03), // Output port 0 channel selection
            p(0xff, 0x00, 0x00), // Output port 0 volume
            p(0x02, 0x02, 0x03), // Output port 1 channel selection
            p(0xff, 0x00, 0x00), // Output port 1 volume
            p(0x00, 0x00, 0x00), // Output port 2 channel selection
            p(0x00, 0x00, 0x00), // Output port 2 volume
            p(0x00, 0x00, 0x00), // Output port 3 channel selection
            p(0x00, 0x00, 0x00), // Output port 3 volume
        ],
    },
];

/// Current values of every mode page parameter. Row `i` matches `MODE_PAGE_DEFS[i]`.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ModePages {
    current: [[u8; MAX_PARAMS]; NUM_MODE_PAGES],
}

impl ModePages {
    pub fn new() -> ModePages {
        let mut mp = ModePages {
            current: [[0; MAX_PARAMS]; NUM_MODE_PAGES],
        };

        mp.reset_defaults();

        mp
    }

    pub fn reset_defaults(&mut self) {
        for (row, def) in self.current.iter_mut().zip(MODE_PAGE_DEFS.iter()) {
            for (cur, param) in row.iter_mut().zip(def.params.iter()) {
                *cur = param.default_value;
            }
        }
    }

    pub fn index_of(code: u8) -> Option<usize> {
        MODE_PAGE_DEFS.iter().position(|def| def.code == code)
    }

    /// Current parameter bytes of the page at table index `index`
    pub fn current(&self, index: usize) -> &[u8] {
        &self.current[index][..MODE_PAGE_DEFS[index].param_length()]
    }

    /// Apply one incoming MODE SELECT parameter byte through the page's real mask
    pub fn apply_param(&mut self, index: usize, param: usize, incoming: u8) {
        let mask = MODE_PAGE_DEFS[index].params[param].real_mask;
        let cur = &mut self.current[index][param];

        *cur = (*cur & !mask) | (incoming & mask);
    }
}

/// Re-derive the caches hanging off the page with the given code, if any
pub(crate) fn update_cache(cd: &mut crate::drive::ScsiCd, code: u8) {
    if let Some(index) = ModePages::index_of(code) {
        update_cache_indexed(cd, index);
    }
}

/// Re-derive the caches hanging off the page at table index `index`
pub(crate) fn update_cache_indexed(cd: &mut crate::drive::ScsiCd, index: usize) {
    match MODE_PAGE_DEFS[index].code {
        // CD-ROM audio control: bytes 6 and 8 route the two output ports
        0x0e => {
            let pd = cd.mode_pages.current(index);

            cd.cdda.out_port_ch_select = [pd[6], pd[8]];
            cd.cdda.fix_out_port_volumes();
        }
        // CD-DA playback speed. The range of speed values accessible via the BIOS CD-DA
        // player is apparently -10 to 10; clamping at +/-32 at least keeps the playback
        // system from imploding in on itself. No game is known to use this.
        0x2b => {
            let speed = i32::from(cd.mode_pages.current(index)[0] as i8).clamp(-32, 32);
            let rate = 44_100 + 441 * speed;

            cd.cdda.div_acc =
                (i64::from(cd.host_clock) * (1 << 20) / (2 * i64::from(rate))) as u32;
            cd.cdda.div_acc_vol_fudge = (100 + speed) as u8;

            // Impulse amplitude adjustment, must come after the fudge factor is set
            cd.cdda.fix_out_port_volumes();
        }
        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let mp = ModePages::new();

        let i = ModePages::index_of(0x0e).unwrap();
        let audio = mp.current(i);

        assert_eq!(audio.len(), 14);
        assert_eq!(audio[0], 0x04);
        assert_eq!(audio[6], 0x01); // port 0 routed left
        assert_eq!(audio[8], 0x02); // port 1 routed right

        let i = ModePages::index_of(0x2a).unwrap();
        assert_eq!(mp.current(i), &[0x00, 0x11]);
    }

    #[test]
    fn real_mask_limits_writes() {
        let mut mp = ModePages::new();
        let i = ModePages::index_of(0x0e).unwrap();

        // Volume bytes are read-only on this drive
        mp.apply_param(i, 7, 0x12);
        assert_eq!(mp.current(i)[7], 0xff);

        // Channel select only has two writable bits
        mp.apply_param(i, 6, 0xff);
        assert_eq!(mp.current(i)[6], 0x03);
    }
}
