/// CNPJ normalization and check-digit validation
///
/// A CNPJ is the 14-digit Brazilian business registration number. The last two
/// digits are check digits computed from the first twelve with a weighted sum
/// modulo 11.
use std::fmt;

/// Number of digits in a CNPJ.
pub const CNPJ_LEN: usize = 14;

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Normalized CNPJ, used as the cache key.
///
/// Holds only ASCII digits. A value produced by [`normalize`] is at least 14
/// digits long but is not necessarily valid; see [`Cnpj::is_valid`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cnpj(String);

impl Cnpj {
    /// Returns the digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks length, repeated digits and both check digits.
    pub fn is_valid(&self) -> bool {
        validate(self)
    }

    /// Masked representation (`11.222.333/0001-81`) for log lines.
    ///
    /// Falls back to the raw digits when the length is not 14.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        if d.len() != CNPJ_LEN {
            return d.clone();
        }
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalizes a raw cell value.
///
/// Strips every non-digit character and left-pads with zeros to 14 digits.
/// Returns `None` when no digit remains (blank cells, `"nan"`, stray text).
///
/// Spreadsheet exports often drop leading zeros (`191` for
/// `00.000.000/0001-91`), which the padding restores.
pub fn normalize(raw: &str) -> Option<Cnpj> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(Cnpj(format!("{:0>width$}", digits, width = CNPJ_LEN)))
}

/// Validates a normalized CNPJ.
pub fn validate(cnpj: &Cnpj) -> bool {
    let digits = cnpj.as_str().as_bytes();
    if digits.len() != CNPJ_LEN || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let expected = match check_digits(&cnpj.as_str()[..12]) {
        Some(dv) => dv,
        None => return false,
    };
    digits[12] - b'0' == expected[0] && digits[13] - b'0' == expected[1]
}

/// Computes the two check digits for a 12-digit base.
///
/// Returns `None` if `base` is not exactly twelve ASCII digits.
pub fn check_digits(base: &str) -> Option<[u8; 2]> {
    if base.len() != 12 || !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut digits: Vec<u32> = base.bytes().map(|b| u32::from(b - b'0')).collect();

    let first = check_digit(&digits, &FIRST_WEIGHTS);
    digits.push(u32::from(first));
    let second = check_digit(&digits, &SECOND_WEIGHTS);

    Some([first, second])
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u8 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        // 11 - remainder is in 2..=9 here
        (11 - remainder) as u8
    }
}
