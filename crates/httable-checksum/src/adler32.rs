//! Adler-32: two running sums modulo the largest prime below 65536,
//! processed in batches sized so the accumulators cannot overflow a
//! `u32` before a reduction.

const MOD_ADLER: u32 = 65521;

/// Largest number of bytes that can be folded into `sum1` between
/// reductions without `sum2` overflowing a `u32` accumulator.
const BATCH: usize = 5552;

pub fn adler32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 1;
    let mut sum2: u32 = 0;

    for chunk in data.chunks(BATCH) {
        for &byte in chunk {
            sum1 += byte as u32;
            sum2 += sum1;
        }
        sum1 %= MOD_ADLER;
        sum2 %= MOD_ADLER;
    }

    (sum2 << 16) | sum1
}
