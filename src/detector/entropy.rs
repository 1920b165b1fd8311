//! Randomness statistics for encryption detection
//!
//! Ciphertext is indistinguishable from uniformly random bytes. Plain
//! documents, source and most media are not: their byte histogram is
//! lopsided and neighbouring bytes are correlated.
//!
//! The verdict combines two cheap single-pass statistics:
//! - Pearson chi-square of the byte histogram against a uniform one
//! - Lag-1 serial correlation, which catches uniform but sequential data
//!
//! Shannon entropy is reported alongside for operators.

/// Samples shorter than this carry too little evidence for a verdict
pub const MIN_SAMPLE_LEN: usize = 64;

/// Upper 0.1% tail of chi-square with 255 degrees of freedom
pub const CHI_SQUARE_LIMIT: f64 = 330.5;

/// Allowed serial correlation, in standard deviations of a random sample
pub const SERIAL_CORRELATION_SIGMAS: f64 = 4.0;

/// Byte frequency table
#[inline]
fn histogram(data: &[u8]) -> [u64; 256] {
    let mut frequency = [0u64; 256];
    for &byte in data {
        frequency[byte as usize] += 1;
    }
    frequency
}

/// Calculate Shannon entropy of data
///
/// Returns a value between 0.0 (all same bytes) and 8.0 (perfectly random)
#[inline]
pub fn calculate(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in &histogram(data) {
        if count > 0 {
            let probability = count as f64 / len;
            entropy -= probability * probability.log2();
        }
    }

    entropy
}

/// Pearson chi-square statistic of the byte histogram.
///
/// Around 255 for random data, grows quickly as the distribution skews.
pub fn chi_square(data: &[u8]) -> f64 {
    if data.is_empty() {
        return f64::INFINITY;
    }

    let expected = data.len() as f64 / 256.0;
    histogram(data)
        .iter()
        .map(|&count| {
            let diff = count as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

/// Cyclic lag-1 serial correlation coefficient.
///
/// Near 0.0 for random data; 1.0 is returned for constant input where the
/// coefficient is undefined.
pub fn serial_correlation(data: &[u8]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 1.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut sum_lag = 0.0;
    for (i, &byte) in data.iter().enumerate() {
        let x = byte as f64;
        let next = data[(i + 1) % n] as f64;
        sum += x;
        sum_sq += x * x;
        sum_lag += x * next;
    }

    let n = n as f64;
    let denominator = n * sum_sq - sum * sum;
    if denominator == 0.0 {
        return 1.0;
    }
    (n * sum_lag - sum * sum) / denominator
}

/// Check whether a byte slice looks like ciphertext
pub fn is_random(data: &[u8]) -> bool {
    if data.len() < MIN_SAMPLE_LEN {
        return false;
    }

    if chi_square(data) > CHI_SQUARE_LIMIT {
        return false;
    }

    let sigma = 1.0 / (data.len() as f64).sqrt();
    serial_correlation(data).abs() <= SERIAL_CORRELATION_SIGMAS * sigma
}

/// Entropy classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyClass {
    /// Very low entropy (repetitive data)
    VeryLow,
    /// Low entropy (text, source code)
    Low,
    /// Medium entropy (binary, some compression)
    Medium,
    /// High entropy (compressed, encrypted)
    High,
    /// Very high entropy (strongly encrypted, random)
    VeryHigh,
}

/// Classify entropy level
pub fn classify(entropy: f64) -> EntropyClass {
    match entropy {
        e if e < 2.0 => EntropyClass::VeryLow,
        e if e < 5.0 => EntropyClass::Low,
        e if e < 7.0 => EntropyClass::Medium,
        e if e < 7.8 => EntropyClass::High,
        _ => EntropyClass::VeryHigh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_entropy_empty() {
        assert_eq!(calculate(&[]), 0.0);
    }

    #[test]
    fn test_entropy_uniform() {
        let data = vec![0u8; 1000];
        assert_eq!(calculate(&data), 0.0);
    }

    #[test]
    fn test_entropy_two_values() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 2) as u8).collect();
        let entropy = calculate(&data);
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_entropy_text() {
        let text = b"Hello, World! This is a test of entropy calculation.";
        let entropy = calculate(text);
        assert!(entropy > 3.0 && entropy < 5.0);
    }

    #[test]
    fn test_chi_square_flat_histogram() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        assert_eq!(chi_square(&data), 0.0);
    }

    #[test]
    fn test_serial_correlation_constant() {
        assert_eq!(serial_correlation(&[7u8; 100]), 1.0);
    }

    #[test]
    fn test_random_bytes_are_random() {
        assert!(is_random(&random_bytes(1 << 20, 7)));
        assert!(is_random(&random_bytes(4096, 11)));
    }

    #[test]
    fn test_zeros_are_not_random() {
        assert!(!is_random(&vec![0u8; 1 << 20]));
    }

    #[test]
    fn test_empty_and_short_are_not_random() {
        assert!(!is_random(&[]));
        assert!(!is_random(&random_bytes(MIN_SAMPLE_LEN - 1, 3)));
    }

    #[test]
    fn test_counter_is_not_random() {
        // Perfectly flat histogram, but every byte predicts the next
        let data: Vec<u8> = (0..65536).map(|i| (i % 256) as u8).collect();
        assert!(!is_random(&data));
    }

    #[test]
    fn test_text_is_not_random() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(200);
        assert!(!is_random(text.as_bytes()));
    }

    #[test]
    fn test_deterministic() {
        let data = random_bytes(8192, 42);
        assert_eq!(is_random(&data), is_random(&data));
        assert_eq!(chi_square(&data), chi_square(&data));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(1.0), EntropyClass::VeryLow);
        assert_eq!(classify(4.0), EntropyClass::Low);
        assert_eq!(classify(6.5), EntropyClass::Medium);
        assert_eq!(classify(7.5), EntropyClass::High);
        assert_eq!(classify(7.95), EntropyClass::VeryHigh);
    }
}
