//! Hard-decision Viterbi decoder for the K = 7, rate-1/2 mother code
//! (generators 133, 171 octal). Bits are carried one per byte.

const STATES: usize = 64;
const G0: u32 = 0o133;
const G1: u32 = 0o171;

fn parity(v: u32) -> u8 {
    (v.count_ones() & 1) as u8
}

/// Output pair for input `bit` entering encoder `state`.
fn branch(state: usize, bit: u8) -> (u8, u8) {
    let reg = (u32::from(bit) << 6) | state as u32;
    (parity(reg & G0), parity(reg & G1))
}

fn next_state(state: usize, bit: u8) -> usize {
    ((usize::from(bit) << 6) | state) >> 1
}

/// Encode `bits` from the zero state, two output bits per input bit.
pub fn encode(bits: &[u8]) -> Vec<u8> {
    let mut state = 0;
    let mut out = Vec::with_capacity(bits.len() * 2);
    for &b in bits {
        let b = u8::from(b != 0);
        let (a, c) = branch(state, b);
        out.extend([a, c]);
        state = next_state(state, b);
    }
    out
}

/// Decode up to `data_bits` bits from `coded` into `out`, returning the
/// number written. Stops early when `coded` or `out` runs short.
pub fn decode(data_bits: usize, coded: &[u8], out: &mut [u8]) -> usize {
    let n = data_bits.min(coded.len() / 2).min(out.len());
    if n == 0 {
        return 0;
    }

    let mut metrics = [u32::MAX / 2; STATES];
    metrics[0] = 0;
    let mut decisions = vec![[0u8; STATES]; n];

    for (t, pair) in coded.chunks_exact(2).take(n).enumerate() {
        let rx = (u8::from(pair[0] != 0), u8::from(pair[1] != 0));
        let mut next = [u32::MAX; STATES];
        for ns in 0..STATES {
            let bit = (ns >> 5) as u8;
            for x in 0..2u8 {
                let prev = ((ns & 0x1f) << 1) | usize::from(x);
                let (a, c) = branch(prev, bit);
                let cost = metrics[prev] + u32::from(a ^ rx.0) + u32::from(c ^ rx.1);
                if cost < next[ns] {
                    next[ns] = cost;
                    decisions[t][ns] = x;
                }
            }
        }
        metrics = next;
    }

    let mut state = (0..STATES).min_by_key(|&s| metrics[s]).unwrap_or(0);
    for t in (0..n).rev() {
        out[t] = (state >> 5) as u8;
        state = ((state & 0x1f) << 1) | usize::from(decisions[t][state]);
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Vec<u8> {
        (0..96u32).map(|i| ((i * 7 + i / 3) % 2) as u8).collect()
    }

    #[test]
    fn test_clean_channel_round_trip() {
        let bits = message();
        let coded = encode(&bits);
        assert_eq!(coded.len(), 192);
        let mut out = vec![0u8; 96];
        assert_eq!(decode(96, &coded, &mut out), 96);
        assert_eq!(out, bits);
    }

    #[test]
    fn test_corrects_isolated_errors() {
        let bits = message();
        let mut coded = encode(&bits);
        coded[10] ^= 1;
        coded[80] ^= 1;
        coded[150] ^= 1;
        let mut out = vec![0u8; 96];
        decode(96, &coded, &mut out);
        assert_eq!(out, bits);
    }

    #[test]
    fn test_short_output_limits_decode() {
        let coded = encode(&message());
        let mut out = vec![0xAAu8; 10];
        assert_eq!(decode(96, &coded, &mut out), 10);
        assert!(out.iter().all(|&b| b <= 1));
        assert_eq!(decode(96, &[], &mut out), 0);
    }
}
