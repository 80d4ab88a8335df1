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

//! Sample type shared by every stage downstream of the receiver.

use num_complex::Complex32;

/// 32-bit-float complex baseband sample. Nominally unit magnitude; callers
/// that read from a wire encoding whose dynamic range exceeds that must
/// rescale before handing samples to the DSP stages.
pub type IQSample = Complex32;

/// RTP payload types this crate understands, as announced by the upstream
/// SDR daemon (SPEC_FULL.md section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqEncoding {
    /// Interleaved 16-bit signed linear PCM, network byte order.
    Pcm16,
    /// Interleaved 32-bit IEEE 754 float, little-endian.
    Float32,
}

/// Dynamic RTP payload type assigned to each encoding by the upstream SDR
/// daemon (SPEC_FULL.md section 6: "encoding announced via RTP payload
/// type"). Fixed by convention with that daemon rather than negotiated.
pub const PAYLOAD_TYPE_FLOAT32: u8 = 96;
pub const PAYLOAD_TYPE_PCM16: u8 = 97;

impl IqEncoding {
    pub fn from_payload_type(payload_type: u8) -> Option<Self> {
        match payload_type {
            PAYLOAD_TYPE_FLOAT32 => Some(IqEncoding::Float32),
            PAYLOAD_TYPE_PCM16 => Some(IqEncoding::Pcm16),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqEncoding::Pcm16 => 4,
            IqEncoding::Float32 => 8,
        }
    }

    /// Decode a payload of interleaved I/Q pairs into samples, scaling PCM16
    /// into the nominal unit-magnitude range.
    pub fn decode(self, payload: &[u8]) -> Vec<IQSample> {
        let stride = self.bytes_per_sample();
        let n = payload.len() / stride;
        let mut out = Vec::with_capacity(n);
        for chunk in payload.chunks_exact(stride) {
            let sample = match self {
                IqEncoding::Pcm16 => {
                    let i = i16::from_be_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32;
                    let q = i16::from_be_bytes([chunk[2], chunk[3]]) as f32 / i16::MAX as f32;
                    IQSample::new(i, q)
                }
                IqEncoding::Float32 => {
                    let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    IQSample::new(i, q)
                }
            };
            out.push(sample);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_decode_rescales_to_unit_magnitude() {
        let payload = i16::MAX.to_be_bytes();
        let mut bytes = payload.to_vec();
        bytes.extend_from_slice(&0i16.to_be_bytes());
        let samples = IqEncoding::Pcm16.decode(&bytes);
        assert_eq!(samples.len(), 1);
        assert!((samples[0].re - 1.0).abs() < 1e-6);
        assert!((samples[0].im - 0.0).abs() < 1e-6);
    }

    #[test]
    fn float32_decode_round_trips() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.5f32).to_le_bytes());
        let samples = IqEncoding::Float32.decode(&bytes);
        assert_eq!(samples, vec![IQSample::new(0.25, -0.5)]);
    }
}
