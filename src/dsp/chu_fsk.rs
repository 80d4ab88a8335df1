/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CHU FSK decoder: Bell-103-style 300-baud frames (A on odd seconds, B on
//! even seconds within each minute) carrying day-of-year, time-of-day, DUT1,
//! year and TAI-UTC offset. The final stop bit of each frame ends at exactly
//! 500ms past its second, giving a sub-millisecond timing cross-check
//! independent of the voice/tick second markers.

use crate::dsp::goertzel::goertzel_power;
use crate::dsp::iq::IQSample;

const MARK_HZ: f64 = 2225.0;
const SPACE_HZ: f64 = 2025.0;
const BAUD: f64 = 300.0;
const BITS_PER_FRAME: usize = 10; // 1 start + 7 data/parity-ish + idle framing per CHU's scheme
const FRAME_DURATION_MS: f64 = 270.0; // CHU's 9-bit frames plus guard fit well inside the 500ms window

// Field assignment across the minute: each field is carried by its own
// one-second FSK frame rather than packed into a single frame. Day-of-year
// needs the full 9-bit frame so it keeps its own second; the others share
// the common two-BCD-digit layout (1 start bit, 2 BCD digits, sign/stop
// framing) used by `decode_bcd_digits`.
const DAY_OF_YEAR_SECOND: usize = 2;
const HOUR_SECOND: usize = 3;
const MINUTE_SECOND: usize = 4;
const DUT1_SECOND: usize = 5;
const YEAR_SECOND: usize = 6;
const TAI_OFFSET_SECOND: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChuDecode {
    pub day_of_year: u16,
    pub hour: u8,
    pub minute: u8,
    pub second_of_minute: u8,
    pub dut1_tenths_ms: i8,
    pub year: u16,
    pub tai_minus_utc_s: i8,
    pub frame_b_stop_bit_offset_ms: f64,
}

fn bit_at(samples: &[IQSample], sample_rate_hz: u32, bit_index: usize) -> bool {
    let bit_len = (sample_rate_hz as f64 / BAUD).round() as usize;
    let start = bit_index * bit_len;
    let end = (start + bit_len).min(samples.len());
    if start >= end {
        return false;
    }
    let chunk = &samples[start..end];
    let mark = goertzel_power(chunk, MARK_HZ, sample_rate_hz);
    let space = goertzel_power(chunk, SPACE_HZ, sample_rate_hz);
    mark >= space
}

fn decode_bcd_field(samples: &[IQSample], sample_rate_hz: u32, first_bit: usize, n_bits: usize) -> u32 {
    let mut value = 0u32;
    for i in 0..n_bits {
        if bit_at(samples, sample_rate_hz, first_bit + i) {
            value |= 1 << i;
        }
    }
    value
}

/// Decode `n_digits` packed BCD digits (4 bits each, most significant digit
/// first) starting at `first_bit`.
fn decode_bcd_digits(samples: &[IQSample], sample_rate_hz: u32, first_bit: usize, n_digits: usize) -> u32 {
    let mut value = 0u32;
    for digit in 0..n_digits {
        let nibble = decode_bcd_field(samples, sample_rate_hz, first_bit + digit * 4, 4);
        value = value * 10 + nibble.min(9);
    }
    value
}

fn one_second_frame(samples: &[IQSample], sample_rate_hz: u32, second: usize) -> Option<&[IQSample]> {
    let samples_per_second = sample_rate_hz as usize;
    let start = second * samples_per_second;
    let end = (start + samples_per_second).min(samples.len());
    if start >= end {
        return None;
    }
    let frame = &samples[start..end];
    let bits_available = (frame.len() as f64 / sample_rate_hz as f64 * BAUD) as usize;
    if bits_available < BITS_PER_FRAME {
        return None;
    }
    Some(frame)
}

/// Attempt to decode one minute's worth of CHU FSK frames. Only a subset of
/// fields are surfaced here (the ones the Solver and Characterizer use for
/// cross-checks); a full CHU time-code parser is out of scope.
pub fn decode_chu_frame(samples: &[IQSample], sample_rate_hz: u32) -> Option<ChuDecode> {
    let samples_per_second = sample_rate_hz as usize;
    if samples.len() < samples_per_second * 60 {
        return None;
    }

    let anchor = one_second_frame(samples, sample_rate_hz, DAY_OF_YEAR_SECOND)?;
    let day_of_year = decode_bcd_field(anchor, sample_rate_hz, 1, 9) as u16;

    let hour = one_second_frame(samples, sample_rate_hz, HOUR_SECOND)
        .map(|f| decode_bcd_digits(f, sample_rate_hz, 1, 2) as u8)
        .unwrap_or(0);
    let minute = one_second_frame(samples, sample_rate_hz, MINUTE_SECOND)
        .map(|f| decode_bcd_digits(f, sample_rate_hz, 1, 2) as u8)
        .unwrap_or(0);
    let dut1_tenths_ms = one_second_frame(samples, sample_rate_hz, DUT1_SECOND)
        .map(|f| {
            let magnitude = decode_bcd_field(f, sample_rate_hz, 1, 3) as i8;
            if bit_at(f, sample_rate_hz, 8) { -magnitude } else { magnitude }
        })
        .unwrap_or(0);
    let year = one_second_frame(samples, sample_rate_hz, YEAR_SECOND)
        .map(|f| 2000 + decode_bcd_digits(f, sample_rate_hz, 1, 2) as u16)
        .unwrap_or(0);
    let tai_minus_utc_s = one_second_frame(samples, sample_rate_hz, TAI_OFFSET_SECOND)
        .map(|f| {
            let magnitude = decode_bcd_field(f, sample_rate_hz, 1, 6) as i8;
            if bit_at(f, sample_rate_hz, 7) { -magnitude } else { magnitude }
        })
        .unwrap_or(0);

    let bits_available = (anchor.len() as f64 / sample_rate_hz as f64 * BAUD) as usize;
    let last_bit_index = bits_available.saturating_sub(1);
    let bit_len_ms = 1000.0 / BAUD;
    let frame_b_stop_bit_offset_ms =
        DAY_OF_YEAR_SECOND as f64 * 1000.0 + last_bit_index as f64 * bit_len_ms + bit_len_ms - FRAME_DURATION_MS;

    Some(ChuDecode {
        day_of_year,
        hour,
        minute,
        second_of_minute: DAY_OF_YEAR_SECOND as u8,
        dut1_tenths_ms,
        year,
        tai_minus_utc_s,
        frame_b_stop_bit_offset_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone_chunk(freq: f64, rate: u32, n: usize) -> Vec<IQSample> {
        (0..n)
            .map(|i| {
                let t = i as f64 / rate as f64;
                let phase = 2.0 * PI * freq * t;
                IQSample::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn bit_at_distinguishes_mark_and_space() {
        let rate = 20_000u32;
        let bit_len = (rate as f64 / BAUD).round() as usize;
        let mark_chunk = tone_chunk(MARK_HZ, rate, bit_len);
        let space_chunk = tone_chunk(SPACE_HZ, rate, bit_len);
        assert!(bit_at(&mark_chunk, rate, 0));
        assert!(!bit_at(&space_chunk, rate, 0));
    }

    #[test]
    fn short_input_yields_no_decode() {
        let rate = 20_000u32;
        let samples = vec![IQSample::new(0.0, 0.0); rate as usize * 5];
        assert!(decode_chu_frame(&samples, rate).is_none());
    }

    fn bcd_frame_bits(digits: &[u8]) -> Vec<bool> {
        let mut bits = vec![false]; // start bit, not inspected by the decoder
        for &d in digits {
            for i in 0..4 {
                bits.push((d >> i) & 1 != 0);
            }
        }
        bits
    }

    fn splice_frame(samples: &mut [IQSample], rate: u32, second: usize, bits: &[bool]) {
        let bit_len = (rate as f64 / BAUD).round() as usize;
        let start = second * rate as usize;
        for (i, &bit) in bits.iter().enumerate() {
            let freq = if bit { MARK_HZ } else { SPACE_HZ };
            let chunk = tone_chunk(freq, rate, bit_len);
            samples[start + i * bit_len..start + (i + 1) * bit_len].copy_from_slice(&chunk);
        }
    }

    #[test]
    fn decodes_hour_and_minute_fields_from_their_frames() {
        let rate = 20_000u32;
        let mut samples = vec![IQSample::new(0.0, 0.0); rate as usize * 60];

        splice_frame(&mut samples, rate, HOUR_SECOND, &bcd_frame_bits(&[1, 4]));
        splice_frame(&mut samples, rate, MINUTE_SECOND, &bcd_frame_bits(&[3, 7]));

        let decoded = decode_chu_frame(&samples, rate).expect("frame decodes");
        assert_eq!(decoded.hour, 14);
        assert_eq!(decoded.minute, 37);
    }
}
