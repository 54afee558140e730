//! FF1 format-preserving encryption (NIST SP 800-38G) over AES.
//!
//! A [`Ff1`] context is keyed once with raw key bytes, a default tweak and an
//! alphabet, then encrypts numeral strings into numeral strings of the same
//! length over the same alphabet.
//!
//! The AES key schedule is immutable after construction and the CBC-MAC
//! chaining value lives on the stack of each call, so one context can serve
//! any number of concurrent callers.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use num_bigint::BigUint;
use thiserror::Error;

use common::FpeError;

use super::alphabet::{Alphabet, AlphabetError};

/// Number of Feistel rounds.
pub const ROUNDS: usize = 10;

/// Largest supported numeral string length.
pub const TEXT_MAX: u64 = 1 << 32;

/// Largest radix representable in the 3-byte radix field of the round header.
pub const RADIX_MAX: u32 = 1 << 16;

const BLOCK_LEN: usize = 16;

/// Errors produced by the FF1 layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ff1Error {
    /// Key must be 16, 24 or 32 bytes.
    #[error("key size error: {0} bytes")]
    InvalidKeySize(usize),

    /// Radix outside `[2, 65536]`.
    #[error("radix {0} out of range")]
    RadixOutOfRange(u32),

    /// The minimum text length derived from the radix is out of range.
    #[error("minimum text length {0} out of range")]
    MinLengthOutOfRange(usize),

    /// The numeral string length is outside `[txtmin, txtmax]`.
    #[error("invalid input length {len}: expected between {min} and {max}")]
    InvalidInputLength { len: usize, min: usize, max: u64 },

    /// The tweak length is outside the configured bounds.
    #[error("invalid tweak length {len}: expected between {min} and {max}")]
    InvalidTweakLength { len: usize, min: usize, max: usize },

    /// The numeral string contains a symbol outside the cipher's alphabet.
    #[error("input character {0:?} not found in alphabet")]
    InvalidCharacter(char),

    #[error(transparent)]
    Alphabet(#[from] AlphabetError),
}

impl From<Ff1Error> for FpeError {
    fn from(e: Ff1Error) -> Self {
        match e {
            Ff1Error::InvalidKeySize(_) => FpeError::InvalidKeyMaterial(e.to_string()),
            Ff1Error::RadixOutOfRange(_) => FpeError::InvalidAlphabet(e.to_string()),
            Ff1Error::MinLengthOutOfRange(min) => FpeError::InvalidLength {
                len: min,
                min: 2,
                max: TEXT_MAX as usize,
            },
            Ff1Error::InvalidInputLength { len, min, max } => FpeError::InvalidLength {
                len,
                min,
                max: usize::try_from(max).unwrap_or(usize::MAX),
            },
            Ff1Error::InvalidTweakLength { len, min, max } => {
                FpeError::InvalidTweakLength { len, min, max }
            }
            Ff1Error::InvalidCharacter(c) => FpeError::InvalidCharacter(c),
            Ff1Error::Alphabet(a) => a.into(),
        }
    }
}

/// Inclusive tweak length bounds. A `max` of 0 leaves the upper end open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TweakBounds {
    pub min: usize,
    pub max: usize,
}

impl TweakBounds {
    fn check(&self, len: usize) -> Result<(), Ff1Error> {
        if len < self.min || (self.max > 0 && len > self.max) {
            return Err(Ff1Error::InvalidTweakLength {
                len,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// The fixed 16-byte `P` block prefixed to every round function input.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct RoundHeader {
    version: u8,
    method: u8,
    addition: u8,
    radix: [u8; 3],
    rounds: u8,
    split: u8,
    text_len: [u8; 4],
    tweak_len: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RoundHeader>() == RoundHeader::SIZE);

impl RoundHeader {
    const SIZE: usize = BLOCK_LEN;

    fn new(radix: u32, split: usize, text_len: usize, tweak_len: usize) -> Self {
        let [_, r0, r1, r2] = radix.to_be_bytes();
        Self {
            version: 1,
            method: 2,
            addition: 1,
            radix: [r0, r1, r2],
            rounds: ROUNDS as u8,
            // u mod 256
            split: split as u8,
            text_len: (text_len as u32).to_be_bytes(),
            tweak_len: (tweak_len as u32).to_be_bytes(),
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let [r0, r1, r2] = self.radix;
        let [n0, n1, n2, n3] = self.text_len;
        let [t0, t1, t2, t3] = self.tweak_len;
        [
            self.version,
            self.method,
            self.addition,
            r0,
            r1,
            r2,
            self.rounds,
            self.split,
            n0,
            n1,
            n2,
            n3,
            t0,
            t1,
            t2,
            t3,
        ]
    }
}

/// AES block primitive selected by key size.
enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, Ff1Error> {
        let invalid = |_| Ff1Error::InvalidKeySize(key.len());
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            n => Err(Ff1Error::InvalidKeySize(n)),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    /// AES-CBC-MAC with a zero IV; `input` must be a whole number of blocks.
    fn cbc_mac(&self, input: &[u8]) -> [u8; BLOCK_LEN] {
        let mut y = [0u8; BLOCK_LEN];
        for chunk in input.chunks_exact(BLOCK_LEN) {
            y.iter_mut().zip(chunk).for_each(|(acc, b)| *acc ^= b);
            self.encrypt_block(&mut y);
        }
        y
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Aes128(_) => "AES-128",
            Self::Aes192(_) => "AES-192",
            Self::Aes256(_) => "AES-256",
        }
    }
}

/// A keyed FF1 context.
pub struct Ff1 {
    cipher: BlockCipher,
    alphabet: Alphabet,
    tweak: Vec<u8>,
    bounds: TweakBounds,
    txtmin: usize,
}

impl std::fmt::Debug for Ff1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Ff1")
            .field("cipher", &self.cipher.name())
            .field("radix", &self.alphabet.radix())
            .field("txtmin", &self.txtmin)
            .finish_non_exhaustive()
    }
}

impl Ff1 {
    /// Key a context over the standard `0-9a-z` alphabet of `radix` symbols.
    ///
    /// # Errors
    ///
    /// See [`Ff1::with_alphabet`]; additionally fails if `radix` is not in
    /// `2..=36`.
    pub fn new(key: &[u8], tweak: &[u8], bounds: TweakBounds, radix: u32) -> Result<Self, Ff1Error> {
        Self::with_alphabet(key, tweak, bounds, Alphabet::standard(radix)?)
    }

    /// Key a context over a custom alphabet; its length is the radix.
    ///
    /// # Errors
    ///
    /// Returns [`Ff1Error::InvalidKeySize`] unless the key is 16, 24 or 32
    /// bytes, [`Ff1Error::RadixOutOfRange`] / [`Ff1Error::MinLengthOutOfRange`]
    /// for unusable alphabets, and [`Ff1Error::InvalidTweakLength`] if the
    /// default tweak violates `bounds`.
    pub fn with_alphabet(
        key: &[u8],
        tweak: &[u8],
        bounds: TweakBounds,
        alphabet: Alphabet,
    ) -> Result<Self, Ff1Error> {
        let cipher = BlockCipher::new(key)?;

        let radix = alphabet.radix();
        if !(2..=RADIX_MAX).contains(&radix) {
            return Err(Ff1Error::RadixOutOfRange(radix));
        }

        // radix^txtmin >= 1_000_000
        let txtmin = (6.0 / f64::from(radix).log10()).ceil() as usize;
        if txtmin < 2 || txtmin as u64 > TEXT_MAX {
            return Err(Ff1Error::MinLengthOutOfRange(txtmin));
        }

        if bounds.max > 0 && bounds.min > bounds.max {
            return Err(Ff1Error::InvalidTweakLength {
                len: tweak.len(),
                min: bounds.min,
                max: bounds.max,
            });
        }
        bounds.check(tweak.len())?;

        Ok(Self {
            cipher,
            alphabet,
            tweak: tweak.to_vec(),
            bounds,
            txtmin,
        })
    }

    /// The alphabet numeral strings are expressed in.
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn radix(&self) -> u32 {
        self.alphabet.radix()
    }

    /// Shortest numeral string this context accepts.
    pub fn min_len(&self) -> usize {
        self.txtmin
    }

    /// Encrypt `x` under the default tweak.
    pub fn encrypt(&self, x: &str) -> Result<String, Ff1Error> {
        self.run(x, &self.tweak, true)
    }

    /// Decrypt `x` under the default tweak.
    pub fn decrypt(&self, x: &str) -> Result<String, Ff1Error> {
        self.run(x, &self.tweak, false)
    }

    /// Encrypt `x` under an explicit tweak.
    pub fn encrypt_with_tweak(&self, x: &str, tweak: &[u8]) -> Result<String, Ff1Error> {
        self.run(x, tweak, true)
    }

    /// Decrypt `x` under an explicit tweak.
    pub fn decrypt_with_tweak(&self, x: &str, tweak: &[u8]) -> Result<String, Ff1Error> {
        self.run(x, tweak, false)
    }

    /// `b = ceil(ceil(v * log2(radix)) / 8)`
    fn num_bytes(&self, v: usize) -> usize {
        let bits = (f64::from(self.radix()).ln() / 2f64.ln() * v as f64).ceil() as usize;
        (bits + 7) / 8
    }

    fn run(&self, x: &str, tweak: &[u8], encrypt: bool) -> Result<String, Ff1Error> {
        let x: Vec<char> = x.chars().collect();
        let n = x.len();
        if n < self.txtmin || n as u64 > TEXT_MAX {
            return Err(Ff1Error::InvalidInputLength {
                len: n,
                min: self.txtmin,
                max: TEXT_MAX,
            });
        }
        self.bounds.check(tweak.len())?;
        if let Some(&bad) = x.iter().find(|c| !self.alphabet.contains(**c)) {
            return Err(Ff1Error::InvalidCharacter(bad));
        }

        let u = n / 2;
        let v = n - u;
        let (mut a, mut b) = if encrypt {
            (x[..u].to_vec(), x[u..].to_vec())
        } else {
            (x[u..].to_vec(), x[..u].to_vec())
        };

        let b_len = self.num_bytes(v);
        let d = 4 * b_len.div_ceil(4) + 4;
        let blocks = d.div_ceil(BLOCK_LEN);

        // P || Q, where Q = tweak || 0* || round || NUM(B)
        let q_len = (tweak.len() + b_len + 1).div_ceil(BLOCK_LEN) * BLOCK_LEN;
        let mut pq = vec![0u8; RoundHeader::SIZE + q_len];
        pq[..RoundHeader::SIZE]
            .copy_from_slice(&RoundHeader::new(self.radix(), u, n, tweak.len()).to_bytes());
        pq[RoundHeader::SIZE..RoundHeader::SIZE + tweak.len()].copy_from_slice(tweak);
        let round_pos = pq.len() - b_len - 1;

        let radix = BigUint::from(self.radix());
        let modulus_u = radix.pow(u as u32);
        let modulus_v = radix.pow(v as u32);

        let mut r = vec![0u8; blocks * BLOCK_LEN];
        for i in 0..ROUNDS {
            let (m, modulus) = if (i + usize::from(encrypt)) % 2 == 1 {
                (u, &modulus_u)
            } else {
                (v, &modulus_v)
            };

            pq[round_pos] = (if encrypt { i } else { ROUNDS - 1 - i }) as u8;
            let num_b = self.alphabet.digits_to_integer(&b)?.to_bytes_be();
            let tail = &mut pq[round_pos + 1..];
            tail.fill(0);
            if num_b.len() <= b_len {
                tail[b_len - num_b.len()..].copy_from_slice(&num_b);
            } else {
                tail.copy_from_slice(&num_b[num_b.len() - b_len..]);
            }

            let mac = self.cipher.cbc_mac(&pq);
            r[..BLOCK_LEN].copy_from_slice(&mac);
            for j in 1..blocks {
                let mut block = [0u8; BLOCK_LEN];
                block[12..].copy_from_slice(&(j as u32).to_be_bytes());
                block.iter_mut().zip(&mac).for_each(|(x, m)| *x ^= m);
                self.cipher.encrypt_block(&mut block);
                r[j * BLOCK_LEN..(j + 1) * BLOCK_LEN].copy_from_slice(&block);
            }

            let y = BigUint::from_bytes_be(&r[..d]) % modulus;
            let num_a = self.alphabet.digits_to_integer(&a)?;
            let c = if encrypt {
                (num_a + y) % modulus
            } else {
                (num_a + modulus - y) % modulus
            };

            let c = self.alphabet.to_digits_padded(&c, m);
            a = std::mem::replace(&mut b, c);
        }

        let out = if encrypt {
            a.into_iter().chain(b)
        } else {
            b.into_iter().chain(a)
        };
        Ok(out.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_128: &str = "2B7E151628AED2A6ABF7158809CF4F3C";
    const KEY_192: &str = "2B7E151628AED2A6ABF7158809CF4F3CEF4359D8D580AA4F";
    const KEY_256: &str = "2B7E151628AED2A6ABF7158809CF4F3CEF4359D8D580AA4F7F036D6F04FC6A94";
    const TWEAK_10: &str = "39383736353433323130";
    const TWEAK_11: &str = "3737373770717273373737";

    fn ctx(key: &str, tweak: &str, radix: u32) -> Ff1 {
        let key = hex::decode(key).unwrap();
        let tweak = hex::decode(tweak).unwrap();
        Ff1::new(&key, &tweak, TweakBounds::default(), radix).unwrap()
    }

    fn check(key: &str, tweak: &str, radix: u32, pt: &str, ct: &str) {
        let ff1 = ctx(key, tweak, radix);
        assert_eq!(ff1.encrypt(pt).unwrap(), ct);
        assert_eq!(ff1.decrypt(ct).unwrap(), pt);
    }

    #[test]
    fn nist_sample_1() {
        check(KEY_128, "", 10, "0123456789", "2433477484");
    }

    #[test]
    fn nist_sample_2() {
        check(KEY_128, TWEAK_10, 10, "0123456789", "6124200773");
    }

    #[test]
    fn nist_sample_3() {
        check(KEY_128, TWEAK_11, 36, "0123456789abcdefghi", "a9tv40mll9kdu509eum");
    }

    #[test]
    fn nist_sample_4() {
        check(KEY_192, "", 10, "0123456789", "2830668132");
    }

    #[test]
    fn nist_sample_7() {
        check(KEY_256, "", 10, "0123456789", "6657667009");
    }

    #[test]
    fn nist_sample_8() {
        check(KEY_256, TWEAK_10, 10, "0123456789", "1001623463");
    }

    #[test]
    fn encryption_is_deterministic() {
        let first = ctx(KEY_128, TWEAK_10, 10).encrypt("0123456789").unwrap();
        let second = ctx(KEY_128, TWEAK_10, 10).encrypt("0123456789").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_tweak_changes_output() {
        let ff1 = ctx(KEY_128, "", 10);
        let tweak = hex::decode(TWEAK_10).unwrap();
        let ct = ff1.encrypt_with_tweak("0123456789", &tweak).unwrap();
        assert_eq!(ct, "6124200773");
        assert_eq!(ff1.decrypt_with_tweak(&ct, &tweak).unwrap(), "0123456789");
    }

    #[test]
    fn custom_alphabet_round_trip() {
        let key = hex::decode(KEY_256).unwrap();
        let alphabet = Alphabet::new("!@#$%^&*()").unwrap();
        let ff1 = Ff1::with_alphabet(&key, b"tweak", TweakBounds::default(), alphabet).unwrap();
        let ct = ff1.encrypt("@$#!@$#!").unwrap();
        assert_eq!(ct.chars().count(), 8);
        assert!(ct.chars().all(|c| "!@#$%^&*()".contains(c)));
        assert_eq!(ff1.decrypt(&ct).unwrap(), "@$#!@$#!");
    }

    #[test]
    fn custom_alphabet_matches_standard_digits() {
        let key = hex::decode(KEY_128).unwrap();
        let alphabet = Alphabet::new("0123456789").unwrap();
        let ff1 = Ff1::with_alphabet(&key, &[], TweakBounds::default(), alphabet).unwrap();
        assert_eq!(ff1.encrypt("0123456789").unwrap(), "2433477484");
    }

    #[test]
    fn odd_length_round_trip() {
        let ff1 = ctx(KEY_128, TWEAK_11, 36);
        for pt in ["abcdefg", "0000000000000", "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"] {
            let ct = ff1.encrypt(pt).unwrap();
            assert_eq!(ct.len(), pt.len());
            assert_eq!(ff1.decrypt(&ct).unwrap(), pt);
        }
    }

    #[test]
    fn rejects_bad_key_size() {
        let err = Ff1::new(&[0u8; 20], &[], TweakBounds::default(), 10).unwrap_err();
        assert_eq!(err, Ff1Error::InvalidKeySize(20));
    }

    #[test]
    fn min_length_follows_radix() {
        assert_eq!(ctx(KEY_128, "", 10).min_len(), 6);
        assert_eq!(ctx(KEY_128, "", 36).min_len(), 4);
        assert_eq!(ctx(KEY_128, "", 2).min_len(), 20);
    }

    #[test]
    fn short_input_rejected() {
        let err = ctx(KEY_128, "", 10).encrypt("12345").unwrap_err();
        assert!(matches!(err, Ff1Error::InvalidInputLength { len: 5, min: 6, .. }));
    }

    #[test]
    fn foreign_symbol_rejected() {
        let err = ctx(KEY_128, "", 10).encrypt("01234x6789").unwrap_err();
        assert_eq!(err, Ff1Error::InvalidCharacter('x'));
    }

    #[test]
    fn tweak_bounds_enforced() {
        let key = hex::decode(KEY_128).unwrap();
        let bounds = TweakBounds { min: 2, max: 4 };
        assert!(matches!(
            Ff1::new(&key, &[1], bounds, 10).unwrap_err(),
            Ff1Error::InvalidTweakLength { len: 1, .. }
        ));
        let ff1 = Ff1::new(&key, &[1, 2], bounds, 10).unwrap();
        assert!(matches!(
            ff1.encrypt_with_tweak("0123456789", &[0u8; 5]).unwrap_err(),
            Ff1Error::InvalidTweakLength { len: 5, .. }
        ));
    }

    #[test]
    fn round_header_layout() {
        let bytes = RoundHeader::new(10, 5, 10, 0).to_bytes();
        assert_eq!(bytes, [1, 2, 1, 0, 0, 10, 10, 5, 0, 0, 0, 10, 0, 0, 0, 0]);
        let bytes = RoundHeader::new(0x01_02_03, 1, 0x0A0B0C0D, 0x11223344).to_bytes();
        assert_eq!(&bytes[3..6], &[1, 2, 3]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[12..16], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn debug_hides_key() {
        let dbg = format!("{:?}", ctx(KEY_128, "", 10));
        assert!(dbg.contains("AES-128"));
        assert!(!dbg.to_lowercase().contains("2b7e"));
    }
}
