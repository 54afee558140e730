//! Numeral strings over arbitrary symbol alphabets.
//!
//! An alphabet assigns every symbol the digit value of its position, so the
//! alphabet `!@#$%^&*()` reads `@$#` as 132. The radix is the alphabet length.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use thiserror::Error;

use common::FpeError;

/// Symbols of the standard alphabet used when FF1 is keyed with a bare radix.
const STANDARD_SYMBOLS: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Errors from alphabet conversions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlphabetError {
    /// The alphabet has no symbols.
    #[error("alphabet cannot be empty")]
    Empty,

    /// The alphabet has a single symbol, so no positional value exists.
    #[error("alphabet needs at least two symbols")]
    TooFewSymbols,

    /// A standard alphabet was requested for an unsupported radix.
    #[error("radix {0} out of range for the standard alphabet")]
    RadixOutOfRange(u32),

    /// The symbol is not part of the alphabet.
    #[error("input character {0:?} not found in alphabet")]
    InvalidCharacter(char),
}

impl From<AlphabetError> for FpeError {
    fn from(e: AlphabetError) -> Self {
        match e {
            AlphabetError::InvalidCharacter(c) => FpeError::InvalidCharacter(c),
            other => FpeError::InvalidAlphabet(other.to_string()),
        }
    }
}

/// An ordered set of symbols defining a positional numeral system.
///
/// Symbol lookup returns the first position of a symbol; uniqueness is not
/// enforced here (see [`Alphabet::has_duplicates`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
    index: HashMap<char, u32>,
}

impl Alphabet {
    /// Build an alphabet from the characters of `symbols`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`AlphabetError::Empty`] if `symbols` has no characters and
    /// [`AlphabetError::TooFewSymbols`] if it has only one.
    pub fn new(symbols: &str) -> Result<Self, AlphabetError> {
        let symbols: Vec<char> = symbols.chars().collect();
        match symbols.len() {
            0 => return Err(AlphabetError::Empty),
            1 => return Err(AlphabetError::TooFewSymbols),
            _ => {}
        }
        let mut index = HashMap::with_capacity(symbols.len());
        for (pos, ch) in symbols.iter().enumerate() {
            index.entry(*ch).or_insert(pos as u32);
        }
        Ok(Self { symbols, index })
    }

    /// The `0-9a-z` alphabet truncated to `radix` symbols.
    ///
    /// # Errors
    ///
    /// Returns [`AlphabetError::RadixOutOfRange`] unless `2 <= radix <= 36`.
    pub fn standard(radix: u32) -> Result<Self, AlphabetError> {
        if !(2..=36).contains(&radix) {
            return Err(AlphabetError::RadixOutOfRange(radix));
        }
        Self::new(&STANDARD_SYMBOLS[..radix as usize])
    }

    /// Number of symbols, i.e. the base of the numeral system.
    pub fn radix(&self) -> u32 {
        self.symbols.len() as u32
    }

    /// The zero symbol, used for left padding.
    pub fn first(&self) -> char {
        self.symbols[0]
    }

    /// Symbol for digit value `digit`, if in range.
    pub fn symbol(&self, digit: u32) -> Option<char> {
        self.symbols.get(digit as usize).copied()
    }

    /// Digit value of `ch`, if it belongs to the alphabet.
    pub fn digit(&self, ch: char) -> Option<u32> {
        self.index.get(&ch).copied()
    }

    /// Returns `true` if `ch` belongs to the alphabet.
    pub fn contains(&self, ch: char) -> bool {
        self.index.contains_key(&ch)
    }

    /// Returns `true` if any symbol appears more than once.
    pub fn has_duplicates(&self) -> bool {
        self.index.len() != self.symbols.len()
    }

    /// Interpret `numeral` as a base-`radix` integer, most-significant first.
    ///
    /// # Errors
    ///
    /// Returns [`AlphabetError::InvalidCharacter`] naming the first symbol not
    /// found in the alphabet.
    pub fn to_integer(&self, numeral: &str) -> Result<BigUint, AlphabetError> {
        let digits: Vec<char> = numeral.chars().collect();
        self.digits_to_integer(&digits)
    }

    /// Same as [`Alphabet::to_integer`] over an already-split symbol slice.
    pub fn digits_to_integer(&self, numeral: &[char]) -> Result<BigUint, AlphabetError> {
        let radix = self.radix();
        let mut value = BigUint::zero();
        for &ch in numeral {
            let digit = self.digit(ch).ok_or(AlphabetError::InvalidCharacter(ch))?;
            value = value * radix + digit;
        }
        Ok(value)
    }

    /// Render `value` with the minimal number of symbols. Zero renders as the
    /// single first symbol.
    pub fn to_numeral(&self, value: &BigUint) -> String {
        self.to_digits(value).into_iter().collect()
    }

    /// Render `value` left-padded with the first symbol to at least `len`
    /// symbols. Values needing more than `len` symbols are not truncated.
    pub fn to_numeral_padded(&self, value: &BigUint, len: usize) -> String {
        self.to_digits_padded(value, len).into_iter().collect()
    }

    pub(crate) fn to_digits(&self, value: &BigUint) -> Vec<char> {
        let radix = BigUint::from(self.radix());
        let mut out = Vec::new();
        let mut quotient = value.clone();
        while !quotient.is_zero() {
            let (q, r) = quotient.div_rem(&radix);
            // r < radix, which always fits in u32
            let digit = r.to_u32().unwrap_or_default();
            out.push(self.symbols[digit as usize]);
            quotient = q;
        }
        if out.is_empty() {
            out.push(self.first());
        }
        out.reverse();
        out
    }

    pub(crate) fn to_digits_padded(&self, value: &BigUint, len: usize) -> Vec<char> {
        let digits = self.to_digits(value);
        if digits.len() >= len {
            return digits;
        }
        let mut padded = vec![self.first(); len - digits.len()];
        padded.extend(digits);
        padded
    }
}
