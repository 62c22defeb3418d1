//! BEANS - an ANS based entropy coder for byte buffers.
//!
//! BEANS represents a whole message as one large integer, built up by a
//! range-variant ANS state machine over a 256-symbol alphabet with 10-bit
//! frequency precision. The state lives in a caller-owned array of 32-bit
//! words (see [`bignum`](crate::bignum)); encoding scans the input from the
//! last byte to the first and grows the state, decoding scans forward and
//! shrinks it back, reproducing the input byte for byte.
//!
//! The coder runs in one of two modes:
//!
//! - **External table.** The caller supplies symbol counts. The same counts,
//!   normalized identically, must be supplied for decoding.
//! - **Self-describing.** Counts are derived from the data. The normalized
//!   table is transmitted in front of the code words as 256 single-byte
//!   values `freq[i] % 256` plus a *thresholds* word recording the symbol
//!   indices where the cumulative frequency first reaches 256, 512, 768 and
//!   1024; the byte values are themselves BEANS coded against a fixed prior
//!   that favors small values. The word count of that table, minus one, is
//!   packed into the low 6 bits of its first code word.
//!
//! Frequencies that are powers of two are coded with bit shifts instead of
//! general division and multiplication.

use crate::bignum::{long_add, long_div, long_mul, long_shl, long_shr};

use core::fmt::{self, Display};

/// Size of the coder's alphabet.
pub const NUM_SYMBOLS: usize = 256;

const FREQ_BITS: u32 = 10;

/// Normalized frequencies sum to this value exactly.
pub const FREQ_TOTAL: u32 = 1 << FREQ_BITS;

/// Total code words described by a length info value returned by
/// [`compress`].
#[inline(always)]
pub const fn code_len(info: u32) -> usize {
    (info & 0x1ff_ffff) as usize
}

/// Frequency table words (thresholds word included) described by a length
/// info value returned by [`compress`].
#[inline(always)]
pub const fn ft_len(info: u32) -> usize {
    (info >> 25) as usize
}

/// Prior frequencies used to code the squashed frequency table itself.
/// Normalized tables are dominated by small counts, so small byte values
/// get wide slots.
#[rustfmt::skip]
static FT_FREQS: [u32; NUM_SYMBOLS] = [
    512, 128, 64, 32, 16, 8, 4, 4, 4, 2, 2, 2, 2, 2, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// Errors that may occur while expanding a BEANS code stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InflateError {
    /// The embedded frequency table does not describe a valid cumulative
    /// distribution.
    InvalidFrequencyTable,

    /// The code array holds fewer words than its headers claim.
    NotEnoughCodeWords,
}

impl Display for InflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InflateError::InvalidFrequencyTable => {
                f.write_str("Code words describe an invalid frequency table")
            }
            InflateError::NotEnoughCodeWords => {
                f.write_str("Code array holds fewer words than its headers claim")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InflateError {}

/// Scales symbol counts so that they add up to exactly [`FREQ_TOTAL`].
///
/// Every symbol with a nonzero raw count keeps a normalized count of at
/// least 1; any rounding slack is absorbed by the symbol with the largest
/// raw count. The function is idempotent: feeding its output back in
/// (or any table already summing to [`FREQ_TOTAL`]) leaves it unchanged.
/// An all-zero table stays all-zero.
pub fn normalize_frequencies(freq: &[u32; NUM_SYMBOLS], norm: &mut [u32; NUM_SYMBOLS]) {
    let mut nz: u32 = 0;
    let mut top = 0usize;
    let mut max: u32 = 0;
    let mut total: u64 = 0;
    for i in 0..NUM_SYMBOLS {
        norm[i] = freq[i];
        if freq[i] != 0 {
            if freq[i] > max {
                max = freq[i];
                top = i;
            }
            total += u64::from(freq[i]);
            nz += 1;
        }
    }

    if total == 0 || total == u64::from(FREQ_TOTAL) {
        return;
    }

    const SHIFT: u32 = 31 - FREQ_BITS;
    const HALF: u64 = 1 << (SHIFT - 1);
    let mut t = u64::from(FREQ_TOTAL) << SHIFT;
    if total > u64::from(FREQ_TOTAL) {
        // Reserve headroom for the clamped-to-1 symbols when scaling down.
        t -= u64::from(nz) << (SHIFT - 2);
    }
    let r = t / total;

    let mut sum: u32 = 0;
    for value in norm.iter_mut() {
        if *value != 0 {
            let scaled = ((u64::from(*value) * r + HALF) >> SHIFT) as u32;
            *value = if scaled > 0 { scaled } else { 1 };
            sum += *value;
        }
    }
    if sum != FREQ_TOTAL {
        norm[top] = norm[top].wrapping_add(FREQ_TOTAL.wrapping_sub(sum));
    }
}

fn cumulative(freq: &[u32; NUM_SYMBOLS], cumulf: &mut [u32; NUM_SYMBOLS + 1]) {
    let mut s: u32 = 0;
    for i in 0..NUM_SYMBOLS {
        cumulf[i] = s;
        s += freq[i];
    }
    cumulf[NUM_SYMBOLS] = FREQ_TOTAL;
}

/// Compresses a byte buffer into an array of 32-bit code words.
///
/// When `counts` is given the same table must be passed to [`inflate`];
/// otherwise the counts are derived from the data and stored in compressed
/// form in front of the code words.
///
/// Returns a length info value (split it with [`code_len`] and [`ft_len`]),
/// or 0 on error: empty input, `result` too small, or a byte of the input
/// not covered by the supplied counts.
pub fn compress(bytes: &[u8], result: &mut [u32], counts: Option<&[u32; NUM_SYMBOLS]>) -> u32 {
    if bytes.is_empty() || result.is_empty() {
        return 0;
    }

    let size = result.len();
    let mut freq = [0u32; NUM_SYMBOLS];
    let mut cumulf = [0u32; NUM_SYMBOLS + 1];
    let mut n = 0usize;

    match counts {
        Some(counts) => {
            normalize_frequencies(counts, &mut freq);
            cumulative(&freq, &mut cumulf);
        }
        None => {
            let mut hist = [0u32; NUM_SYMBOLS];
            for &b in bytes {
                hist[b as usize] += 1;
            }
            normalize_frequencies(&hist, &mut freq);

            let mut squashed = [0u8; NUM_SYMBOLS];
            let mut thresholds: u32 = 0;
            let mut is_set = 0;
            let mut s: u32 = 0;
            for i in 0..NUM_SYMBOLS {
                squashed[i] = freq[i] as u8;
                cumulf[i] = s;
                s += freq[i];

                if is_set < 1 && s >= 256 {
                    thresholds |= (i as u32) << 24;
                    is_set = 1;
                }
                if is_set < 2 && s >= 512 {
                    thresholds |= (i as u32) << 16;
                    is_set = 2;
                }
                if is_set < 3 && s >= 768 {
                    thresholds |= (i as u32) << 8;
                    is_set = 3;
                }
                if is_set < 4 && s >= 1024 {
                    thresholds |= i as u32;
                    is_set = 4;
                }
            }
            cumulf[NUM_SYMBOLS] = FREQ_TOTAL;

            result[0] = thresholds;
            let inner = compress(&squashed, &mut result[1..], Some(&FT_FREQS));
            if inner == 0 {
                return 0;
            }
            let mut ft_words = code_len(inner);
            if 1 + ft_words >= size {
                return 0;
            }
            ft_words = long_shl(6, &mut result[1..], ft_words);
            if ft_words > 64 {
                return 0;
            }
            result[1] |= ft_words as u32 - 1;
            n = 1 + ft_words;
        }
    }

    if n >= size {
        return 0;
    }
    let state = &mut result[n..];

    let mut p = bytes.len() - 1;
    let last = bytes[p] as usize;
    if cumulf[last + 1] == cumulf[last] {
        return 0;
    }
    state[0] = cumulf[last];
    let mut nseg = 1usize;

    while p > 0 {
        p -= 1;
        let b = bytes[p] as usize;
        let f = cumulf[b + 1] - cumulf[b];
        if f == 0 {
            return 0;
        }

        let (ns, rest) = if f.is_power_of_two() && f != 1 {
            long_shr(f.trailing_zeros(), state, nseg)
        } else {
            long_div(f, state, nseg)
        };
        nseg = ns;

        if nseg + 1 >= state.len() {
            return 0;
        }
        nseg = long_shl(FREQ_BITS, state, nseg);
        if nseg == 0 {
            state[0] = 0;
            nseg = 1;
        }
        state[0] |= cumulf[b] + rest;
    }

    ((n + nseg) as u32) | ((n as u32) << 25)
}

/// Rebuilds the cumulative table from a squashed frequency table and its
/// thresholds word. The stored byte values lost every multiple of 256; the
/// quadrant boundaries recorded in `thresholds` put them back. A threshold
/// equal to the previous one marks an empty quadrant (a single symbol
/// spanning the boundary), in which case the running sum has already moved
/// past it and no correction applies.
fn restore_cumulative(
    thresholds: u32,
    freq: &[u8; NUM_SYMBOLS],
    cumulf: &mut [u32; NUM_SYMBOLS + 1],
) -> Result<(), InflateError> {
    let t1 = 1 + (thresholds >> 24) as usize;
    let t2 = 1 + ((thresholds >> 16) & 0xff) as usize;
    let t3 = 1 + ((thresholds >> 8) & 0xff) as usize;
    let t4 = 1 + (thresholds & 0xff) as usize;
    if t1 > t2 || t2 > t3 || t3 > t4 {
        return Err(InflateError::InvalidFrequencyTable);
    }

    let mut s: u32 = 0;
    for i in 0..t1 {
        cumulf[i] = s;
        s += u32::from(freq[i]);
    }
    if s < 256 {
        s += 256;
    }
    for i in t1..t2 {
        cumulf[i] = s;
        s += u32::from(freq[i]);
    }
    if s < 512 {
        s += 256;
    }
    for i in t2..t3 {
        cumulf[i] = s;
        s += u32::from(freq[i]);
    }
    if s < 768 {
        s += 256;
    }
    for i in t3..t4 {
        cumulf[i] = s;
        s += u32::from(freq[i]);
    }
    for i in t4..=NUM_SYMBOLS {
        cumulf[i] = FREQ_TOTAL;
    }
    Ok(())
}

/// Expands compressed data from an array of code words into `bytes`,
/// consuming the state destructively: one shot only.
///
/// `nseg` is the live word count of `code`; `counts` must be the table the
/// data was compressed with, or `None` when it was compressed in
/// self-describing mode.
pub fn inflate(
    bytes: &mut [u8],
    code: &mut [u32],
    mut nseg: usize,
    counts: Option<&[u32; NUM_SYMBOLS]>,
) -> Result<(), InflateError> {
    if nseg > code.len() {
        return Err(InflateError::NotEnoughCodeWords);
    }

    let mut cumulf = [0u32; NUM_SYMBOLS + 1];
    let mut n = 0usize;

    match counts {
        Some(counts) => {
            let mut freq = [0u32; NUM_SYMBOLS];
            normalize_frequencies(counts, &mut freq);
            cumulative(&freq, &mut cumulf);
        }
        None => {
            if nseg < 2 {
                return Err(InflateError::NotEnoughCodeWords);
            }
            let thresholds = code[0];
            let m = 1 + (code[1] & 63) as usize;
            if 1 + m > nseg {
                return Err(InflateError::NotEnoughCodeWords);
            }
            let (inner, _) = long_shr(6, &mut code[1..1 + m], m);
            let mut squashed = [0u8; NUM_SYMBOLS];
            inflate(&mut squashed, &mut code[1..1 + m], inner, Some(&FT_FREQS))?;
            restore_cumulative(thresholds, &squashed, &mut cumulf)?;
            n = 1 + m;
            nseg -= n;
        }
    }

    // Inverse table: every slot of [0, FREQ_TOTAL) maps back to its symbol.
    let mut syms = [0u8; FREQ_TOTAL as usize];
    for b in 0..NUM_SYMBOLS {
        let start = cumulf[b] as usize;
        let end = cumulf[b + 1] as usize;
        if start > end || end > FREQ_TOTAL as usize {
            return Err(InflateError::InvalidFrequencyTable);
        }
        for slot in syms[start..end].iter_mut() {
            *slot = b as u8;
        }
    }

    let state = &mut code[n..];
    let len = bytes.len();
    for i in 0..len {
        let (ns, rest) = long_shr(FREQ_BITS, state, nseg);
        nseg = ns;
        let b = syms[rest as usize] as usize;
        bytes[i] = b as u8;

        if i + 1 < len {
            let f = cumulf[b + 1] - cumulf[b];
            nseg = if f.is_power_of_two() && f != 1 {
                long_shl(f.trailing_zeros(), state, nseg)
            } else {
                long_mul(f, state, nseg)
            };
            nseg = long_add(rest - cumulf[b], state, nseg);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};

    fn round_trip_self_describing(data: &[u8]) {
        let mut code = [0u32; 2048];
        let info = compress(data, &mut code, None);
        assert_ne!(info, 0, "compression failed for {} bytes", data.len());
        let nseg = code_len(info);
        assert!(ft_len(info) <= nseg);

        let mut out = vec![0u8; data.len()];
        inflate(&mut out, &mut code, nseg, None).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn normalized_frequencies_sum_to_total() {
        let mut raw = [0u32; NUM_SYMBOLS];
        raw[b'a' as usize] = 140;
        raw[b'b' as usize] = 3;
        raw[b'z' as usize] = 77;
        raw[0] = 9000;

        let mut norm = [0u32; NUM_SYMBOLS];
        normalize_frequencies(&raw, &mut norm);
        assert_eq!(norm.iter().sum::<u32>(), FREQ_TOTAL);
        for i in 0..NUM_SYMBOLS {
            assert_eq!(raw[i] == 0, norm[i] == 0);
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut raw = [0u32; NUM_SYMBOLS];
        for (i, value) in raw.iter_mut().enumerate() {
            *value = (i as u32 * 31) % 900 + 1;
        }

        let mut once = [0u32; NUM_SYMBOLS];
        let mut twice = [0u32; NUM_SYMBOLS];
        normalize_frequencies(&raw, &mut once);
        normalize_frequencies(&once, &mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalization_keeps_rare_symbols() {
        // A count of one next to a count of a million: both survive, the
        // large symbol absorbs the rounding slack.
        let mut raw = [0u32; NUM_SYMBOLS];
        raw[7] = 1;
        raw[200] = 1_000_000;

        let mut norm = [0u32; NUM_SYMBOLS];
        normalize_frequencies(&raw, &mut norm);
        assert!(norm[7] >= 1);
        assert!(norm[200] >= 1);
        assert_eq!(norm.iter().sum::<u32>(), FREQ_TOTAL);
        assert_eq!(norm[7] + norm[200], FREQ_TOTAL);
    }

    #[test]
    fn normalization_leaves_zero_table_alone() {
        let raw = [0u32; NUM_SYMBOLS];
        let mut norm = [7u32; NUM_SYMBOLS];
        normalize_frequencies(&raw, &mut norm);
        assert_eq!(norm, [0u32; NUM_SYMBOLS]);
    }

    #[test]
    fn external_table_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut counts = [0u32; NUM_SYMBOLS];
        for &b in data.iter() {
            counts[b as usize] += 1;
        }

        let mut code = [0u32; 256];
        let info = compress(data, &mut code, Some(&counts));
        assert_ne!(info, 0);
        assert_eq!(ft_len(info), 0);

        let mut out = [0u8; 43];
        inflate(&mut out, &mut code, code_len(info), Some(&counts)).unwrap();
        assert_eq!(&out, data);
    }

    #[test]
    fn external_table_must_cover_all_symbols() {
        let mut counts = [0u32; NUM_SYMBOLS];
        counts[b'a' as usize] = 10;
        let mut code = [0u32; 64];
        assert_eq!(compress(b"ab", &mut code, Some(&counts)), 0);
    }

    #[test]
    fn self_describing_round_trip_text() {
        round_trip_self_describing(b"abracadabra, abracadabra, abracadabra!");
    }

    #[test]
    fn self_describing_round_trip_single_byte() {
        round_trip_self_describing(b"S");
    }

    #[test]
    fn self_describing_round_trip_uniform_buffer() {
        round_trip_self_describing(&[0x5a; 4096]);
    }

    #[test]
    fn self_describing_round_trip_random_block() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xbea2c0de);
        let mut data = [0u8; 4096];
        rng.fill(&mut data[..]);
        round_trip_self_describing(&data);
    }

    #[test]
    fn self_describing_round_trip_skewed_block() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut data = [0u8; 4096];
        for b in data.iter_mut() {
            *b = if rng.gen_ratio(9, 10) {
                0
            } else {
                rng.gen_range(0..8)
            };
        }
        round_trip_self_describing(&data);
    }

    #[test]
    fn fat_symbol_spans_quadrants() {
        // One symbol takes more than half the total, so consecutive
        // thresholds record the same index and the decoder must treat the
        // quadrants between them as empty.
        let mut data = vec![b'x'; 4000];
        data.extend_from_slice(b"abcdef");

        let mut hist = [0u32; NUM_SYMBOLS];
        for &b in data.iter() {
            hist[b as usize] += 1;
        }
        let mut norm = [0u32; NUM_SYMBOLS];
        normalize_frequencies(&hist, &mut norm);
        assert!(norm[b'x' as usize] > 512);

        round_trip_self_describing(&data);
    }

    #[test]
    fn compress_reports_small_output_buffer() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut data = [0u8; 1024];
        rng.fill(&mut data[..]);

        let mut code = [0u32; 8];
        assert_eq!(compress(&data, &mut code, None), 0);
    }

    #[test]
    fn compress_rejects_empty_input() {
        let mut code = [0u32; 8];
        assert_eq!(compress(&[], &mut code, None), 0);
    }

    #[test]
    fn inflate_rejects_truncated_code() {
        let mut out = [0u8; 16];
        let mut code = [0u32; 1];
        assert_eq!(
            inflate(&mut out, &mut code, 1, None),
            Err(InflateError::NotEnoughCodeWords)
        );
    }

    #[test]
    fn inflate_rejects_overstated_table_length() {
        let mut out = [0u8; 16];
        // Second word claims a 64-word frequency table in a 2-word array.
        let mut code = [0u32, 63];
        assert_eq!(
            inflate(&mut out, &mut code, 2, None),
            Err(InflateError::NotEnoughCodeWords)
        );
    }

    #[test]
    fn length_info_splits_into_fields() {
        let info = (5u32 << 25) | 1234;
        assert_eq!(code_len(info), 1234);
        assert_eq!(ft_len(info), 5);
    }
}
