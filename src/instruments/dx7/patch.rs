// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::error::{Error, Result};

/// Voices in a packed bank.
pub const VOICES_PER_BANK: usize = 32;
/// Bytes in one packed voice.
pub const PACKED_VOICE_SIZE: usize = 128;
/// Bytes in a 32-voice bulk dump, header and trailer included.
pub const BANK_SYSEX_SIZE: usize = 4104;

const SYSEX_HEADER: [u8; 6] = [0xf0, 0x43, 0x00, 0x09, 0x20, 0x00];
const PACKED_OPERATOR_SIZE: usize = 17;
const OPERATORS: usize = 6;

/// One operator's settings, all in the synth's native 0..99 style ranges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperatorPatch {
    /// EG rates R1-R4, 0..99.
    pub rates: [u8; 4],
    /// EG levels L1-L4, 0..99.
    pub levels: [u8; 4],
    /// Keyboard level scaling break point, 0..99 (39 is C3).
    pub break_point: u8,
    #[allow(missing_docs)]
    pub left_depth: u8,
    #[allow(missing_docs)]
    pub right_depth: u8,
    /// 0 -LIN, 1 -EXP, 2 +EXP, 3 +LIN.
    pub left_curve: u8,
    #[allow(missing_docs)]
    pub right_curve: u8,
    /// Keyboard rate scaling, 0..7.
    pub rate_scaling: u8,
    /// Amplitude modulation sensitivity, 0..3.
    pub amp_mod_sensitivity: u8,
    /// Key velocity sensitivity, 0..7.
    pub velocity_sensitivity: u8,
    /// 0..99.
    pub output_level: u8,
    /// Fixed frequency instead of a ratio of the note.
    pub fixed: bool,
    /// 0..31.
    pub coarse: u8,
    /// 0..99.
    pub fine: u8,
    /// 0..14, 7 is centered.
    pub detune: u8,
}

/// A complete voice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    /// Operators 1 through 6, in that order.
    pub operators: [OperatorPatch; OPERATORS],
    /// Pitch EG rates, 0..99.
    pub pitch_rates: [u8; 4],
    /// Pitch EG levels, 0..99, 50 is no change.
    pub pitch_levels: [u8; 4],
    /// 0..31.
    pub algorithm: u8,
    /// 0..7.
    pub feedback: u8,
    /// Restart oscillator phase on each key.
    pub oscillator_sync: bool,
    /// LFO speed 0..99.
    pub lfo_speed: u8,
    /// LFO delay 0..99.
    pub lfo_delay: u8,
    /// Pitch modulation depth 0..99.
    pub lfo_pitch_depth: u8,
    /// Amplitude modulation depth 0..99.
    pub lfo_amp_depth: u8,
    /// Restart the LFO on each key.
    pub lfo_sync: bool,
    /// 0 triangle, 1 saw down, 2 saw up, 3 square, 4 sine, 5 sample and hold.
    pub lfo_waveform: u8,
    /// Pitch modulation sensitivity, 0..7.
    pub pitch_mod_sensitivity: u8,
    /// 0..48, 24 is no transposition.
    pub transpose: u8,
    /// Up to ten characters.
    pub name: String,
}
impl Patch {
    /// Decodes one packed voice from a bulk dump. Out-of-range fields are
    /// clamped rather than rejected, since real-world banks have junk in them.
    pub fn unpack(packed: &[u8]) -> Result<Self> {
        if packed.len() < PACKED_VOICE_SIZE {
            return Err(Error::InvalidSysex(packed.len()));
        }
        let b = |i: usize, max: u8| packed[i].min(max);
        let mut r = Self::default();

        // Operator 6 comes first.
        for op in 0..OPERATORS {
            let base = op * PACKED_OPERATOR_SIZE;
            let o = &mut r.operators[OPERATORS - 1 - op];
            for i in 0..4 {
                o.rates[i] = b(base + i, 99);
                o.levels[i] = b(base + 4 + i, 99);
            }
            o.break_point = b(base + 8, 99);
            o.left_depth = b(base + 9, 99);
            o.right_depth = b(base + 10, 99);
            o.left_curve = packed[base + 11] & 0x03;
            o.right_curve = (packed[base + 11] >> 2) & 0x03;
            o.rate_scaling = packed[base + 12] & 0x07;
            o.detune = ((packed[base + 12] >> 3) & 0x0f).min(14);
            o.amp_mod_sensitivity = packed[base + 13] & 0x03;
            o.velocity_sensitivity = (packed[base + 13] >> 2) & 0x07;
            o.output_level = b(base + 14, 99);
            o.fixed = packed[base + 15] & 0x01 != 0;
            o.coarse = (packed[base + 15] >> 1) & 0x1f;
            o.fine = b(base + 16, 99);
        }
        for i in 0..4 {
            r.pitch_rates[i] = b(102 + i, 99);
            r.pitch_levels[i] = b(106 + i, 99);
        }
        r.algorithm = packed[110] & 0x1f;
        r.feedback = packed[111] & 0x07;
        r.oscillator_sync = packed[111] & 0x08 != 0;
        r.lfo_speed = b(112, 99);
        r.lfo_delay = b(113, 99);
        r.lfo_pitch_depth = b(114, 99);
        r.lfo_amp_depth = b(115, 99);
        r.lfo_sync = packed[116] & 0x01 != 0;
        r.lfo_waveform = ((packed[116] >> 1) & 0x07).min(5);
        r.pitch_mod_sensitivity = (packed[116] >> 4) & 0x07;
        r.transpose = b(117, 48);
        r.name = packed[118..128]
            .iter()
            .map(|c| match c {
                32..=126 => *c as char,
                _ => ' ',
            })
            .collect::<String>()
            .trim_end()
            .to_string();
        Ok(r)
    }

    /// Encodes this voice in the packed bulk-dump format.
    pub fn pack(&self) -> [u8; PACKED_VOICE_SIZE] {
        let mut packed = [0u8; PACKED_VOICE_SIZE];
        for op in 0..OPERATORS {
            let base = op * PACKED_OPERATOR_SIZE;
            let o = &self.operators[OPERATORS - 1 - op];
            packed[base..base + 4].copy_from_slice(&o.rates);
            packed[base + 4..base + 8].copy_from_slice(&o.levels);
            packed[base + 8] = o.break_point;
            packed[base + 9] = o.left_depth;
            packed[base + 10] = o.right_depth;
            packed[base + 11] = (o.left_curve & 0x03) | ((o.right_curve & 0x03) << 2);
            packed[base + 12] = (o.rate_scaling & 0x07) | ((o.detune & 0x0f) << 3);
            packed[base + 13] = (o.amp_mod_sensitivity & 0x03) | ((o.velocity_sensitivity & 0x07) << 2);
            packed[base + 14] = o.output_level;
            packed[base + 15] = o.fixed as u8 | ((o.coarse & 0x1f) << 1);
            packed[base + 16] = o.fine;
        }
        packed[102..106].copy_from_slice(&self.pitch_rates);
        packed[106..110].copy_from_slice(&self.pitch_levels);
        packed[110] = self.algorithm & 0x1f;
        packed[111] = (self.feedback & 0x07) | ((self.oscillator_sync as u8) << 3);
        packed[112] = self.lfo_speed;
        packed[113] = self.lfo_delay;
        packed[114] = self.lfo_pitch_depth;
        packed[115] = self.lfo_amp_depth;
        packed[116] = self.lfo_sync as u8
            | ((self.lfo_waveform & 0x07) << 1)
            | ((self.pitch_mod_sensitivity & 0x07) << 4);
        packed[117] = self.transpose;
        for (i, slot) in packed[118..128].iter_mut().enumerate() {
            *slot = self.name.as_bytes().get(i).copied().unwrap_or(b' ');
        }
        packed
    }

    /// The classic initialized voice: a single sine carrier on algorithm 1.
    pub fn init_voice() -> Self {
        let mut r = Self {
            pitch_rates: [99; 4],
            pitch_levels: [50; 4],
            lfo_speed: 35,
            lfo_sync: true,
            pitch_mod_sensitivity: 3,
            oscillator_sync: true,
            transpose: 24,
            name: "INIT VOICE".to_string(),
            ..Default::default()
        };
        for o in r.operators.iter_mut() {
            *o = OperatorPatch {
                rates: [99; 4],
                levels: [99, 99, 99, 0],
                break_point: 39,
                left_curve: 0,
                right_curve: 0,
                coarse: 1,
                detune: 7,
                ..Default::default()
            };
        }
        r.operators[0].output_level = 99;
        r
    }
}

/// Checks the header of a 32-voice bulk dump and returns its 4096 bytes of
/// packed voices.
pub fn bank_voices(sysex: &[u8]) -> Result<&[u8]> {
    if sysex.len() < BANK_SYSEX_SIZE || sysex[..SYSEX_HEADER.len()] != SYSEX_HEADER {
        return Err(Error::InvalidSysex(sysex.len()));
    }
    let start = SYSEX_HEADER.len();
    Ok(&sysex[start..start + VOICES_PER_BANK * PACKED_VOICE_SIZE])
}

/// Wraps 32 voices in a bulk dump with header, checksum, and end marker.
/// Missing voices are filled with [Patch::init_voice()].
pub fn bank_sysex(patches: &[Patch]) -> Vec<u8> {
    let mut r = Vec::with_capacity(BANK_SYSEX_SIZE);
    r.extend_from_slice(&SYSEX_HEADER);
    let init = Patch::init_voice();
    for i in 0..VOICES_PER_BANK {
        r.extend_from_slice(&patches.get(i).unwrap_or(&init).pack());
    }
    let sum = r[SYSEX_HEADER.len()..]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    r.push(sum.wrapping_neg() & 0x7f);
    r.push(0xf7);
    r
}

/// The names of the voices in a bulk dump.
pub fn bank_patch_names(sysex: &[u8]) -> Vec<String> {
    bank_voices(sysex)
        .map(|voices| {
            voices
                .chunks_exact(PACKED_VOICE_SIZE)
                .filter_map(|v| Patch::unpack(v).ok())
                .map(|p| p.name)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interesting_patch() -> Patch {
        let mut p = Patch::init_voice();
        p.name = "BRASS  1".to_string();
        p.algorithm = 21;
        p.feedback = 7;
        p.lfo_waveform = 4;
        p.pitch_mod_sensitivity = 5;
        p.operators[5].fixed = true;
        p.operators[5].coarse = 2;
        p.operators[5].detune = 14;
        p.operators[2].left_curve = 1;
        p.operators[2].right_curve = 2;
        p.operators[1].velocity_sensitivity = 7;
        p.operators[1].amp_mod_sensitivity = 3;
        p
    }

    #[test]
    fn pack_unpack() {
        let p = interesting_patch();
        let packed = p.pack();
        assert_eq!(&packed[118..126], b"BRASS  1");
        assert_eq!(Patch::unpack(&packed).unwrap(), p);
        // Operator 6 is stored first.
        assert_eq!(packed[15] & 0x01, 1);
    }

    #[test]
    fn short_voice_is_rejected() {
        assert!(matches!(
            Patch::unpack(&[0; 100]),
            Err(Error::InvalidSysex(100))
        ));
    }

    #[test]
    fn bulk_dump_layout() {
        let sysex = bank_sysex(&[interesting_patch()]);
        assert_eq!(sysex.len(), BANK_SYSEX_SIZE);
        assert_eq!(sysex[..6], SYSEX_HEADER);
        assert_eq!(sysex[BANK_SYSEX_SIZE - 1], 0xf7);
        let sum = sysex[6..BANK_SYSEX_SIZE - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum & 0x7f, 0, "checksum makes the data sum to zero");

        let names = bank_patch_names(&sysex);
        assert_eq!(names.len(), VOICES_PER_BANK);
        assert_eq!(names[0], "BRASS  1");
        assert_eq!(names[1], "INIT VOICE");

        assert!(bank_voices(&sysex[..4000]).is_err());
        let mut wrong_header = sysex.clone();
        wrong_header[3] = 0x00;
        assert!(bank_voices(&wrong_header).is_err());
    }
}
