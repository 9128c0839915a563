//! Aesthetic scoring of gift serial numbers.
//!
//! Collectors pay a premium for low, solid, laddered or otherwise patterned
//! serials; the score feeds the valuator's number signal and is cached on the
//! gift record.

/// Result of rating one serial number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    /// 0-100.
    pub score: f64,
    pub description: &'static str,
    /// Whether the number has any collectible value at all.
    pub is_unique: bool,
}

/// Numbers valued for cultural rather than structural reasons. Most of these
/// are shadowed by the structural rules above them (777 rates as a solid);
/// the list only catches the leftovers.
const MEME_NUMBERS: &[i64] = &[67, 52, 69, 420, 666, 777, 1337, 1488, 228];

/// Rate the aesthetic value of a serial number.
///
/// Rules are checked in a fixed order and the first match wins; the order is
/// part of the contract.
pub fn rate(num: i64) -> Rating {
    let digits = num.to_string();
    let len = digits.len();

    if (1..=9).contains(&num) {
        return unique(100.0, "Single Digit");
    }
    if len >= 2 && is_solid(&digits) {
        return unique(100.0, "Solid");
    }
    if (10..=99).contains(&num) {
        return unique(90.0, "Double Digit");
    }
    if is_ladder(&digits) {
        return unique(85.0, "Ladder");
    }
    let zeros = trailing_zeros(&digits);
    if zeros >= 3 && is_solid(&digits[..len - zeros]) {
        let score = (50.0 + zeros as f64 * 10.0).min(95.0);
        return unique(score, "Round");
    }
    if (100..=999).contains(&num) {
        return unique(75.0, "Triple Digit");
    }
    if is_repeater(&digits) {
        return unique(70.0, "Repeater");
    }
    if is_palindrome(&digits) {
        return unique(65.0, "Palindrome");
    }
    let b = digits.as_bytes();
    if len == 4 && b[0] == b[3] && b[1] == b[2] {
        return unique(40.0, "Sandwich");
    }
    if len >= 5 && is_solid(&digits[len - 3..]) {
        return unique(25.0, "Lucky Suffix");
    }
    if MEME_NUMBERS.contains(&num) {
        return unique(100.0, "Meme");
    }

    Rating {
        score: 0.0,
        description: "Random",
        is_unique: false,
    }
}

fn unique(score: f64, description: &'static str) -> Rating {
    Rating {
        score,
        description,
        is_unique: true,
    }
}

fn is_solid(s: &str) -> bool {
    let b = s.as_bytes();
    match b.first() {
        Some(&first) => b.iter().all(|&c| c == first),
        None => false,
    }
}

/// Strictly ascending or descending run of digits with step one, e.g. 12345
/// or 54321. Two digits do not make a ladder.
fn is_ladder(s: &str) -> bool {
    if s.len() < 3 {
        return false;
    }
    let digits: Vec<i16> = s.bytes().map(|b| b as i16 - '0' as i16).collect();
    let ascending = digits.windows(2).all(|w| w[1] == w[0] + 1);
    let descending = digits.windows(2).all(|w| w[1] == w[0] - 1);
    ascending || descending
}

fn is_palindrome(s: &str) -> bool {
    let b = s.as_bytes();
    (0..b.len() / 2).all(|i| b[i] == b[b.len() - 1 - i])
}

/// XYXY-style repetition: equal halves (1212) or equal thirds (121212).
fn is_repeater(s: &str) -> bool {
    let n = s.len();
    if n % 2 == 0 {
        let half = n / 2;
        if s[..half] == s[half..] {
            return true;
        }
    }
    if n % 3 == 0 {
        let third = n / 3;
        if s[..third] == s[third..2 * third] && s[..third] == s[2 * third..] {
            return true;
        }
    }
    false
}

fn trailing_zeros(s: &str) -> usize {
    s.bytes().rev().take_while(|&b| b == b'0').count()
}
