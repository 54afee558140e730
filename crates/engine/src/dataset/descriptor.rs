//! [`DatasetDescriptor`]: the validated form of a dataset definition.
//!
//! Built once from a [`DatasetPayload`]; every invariant the codec relies on
//! is checked here so a descriptor that exists is usable.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

use common::protocol::{DatasetPayload, RuleKind, RulePayload};
use common::FpeError;

use crate::crypto::{Alphabet, TweakBounds};

/// One step of the processing order derived from the dataset rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStep {
    /// Keep the first N characters verbatim.
    Prefix(usize),
    /// Keep the last N characters verbatim.
    Suffix(usize),
    /// Separate passthrough characters from the characters to encrypt.
    Passthrough,
}

/// A normalized dataset definition.
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    name: String,
    input: Alphabet,
    output: Alphabet,
    passthrough: HashSet<char>,
    steps: Vec<RuleStep>,
    min_input_length: usize,
    max_input_length: usize,
    msb_encoding_bits: u32,
    tweak: Vec<u8>,
    tweak_bounds: TweakBounds,
}

impl DatasetDescriptor {
    /// Normalize and validate a raw dataset definition.
    ///
    /// Rules are ordered by ascending priority; a passthrough step is appended
    /// when no passthrough rule is present.
    ///
    /// # Errors
    ///
    /// Returns [`FpeError::InvalidDataset`] describing the first violated
    /// invariant.
    pub fn from_payload(payload: &DatasetPayload) -> Result<Self, FpeError> {
        let name = payload.name.clone();
        let invalid = |reason: String| FpeError::invalid_dataset(&name, reason);

        if name.is_empty() {
            return Err(invalid("dataset name must not be empty".into()));
        }

        let input = unique_alphabet(&payload.input_character_set)
            .map_err(|e| invalid(format!("input character set: {e}")))?;
        let output = unique_alphabet(&payload.output_character_set)
            .map_err(|e| invalid(format!("output character set: {e}")))?;
        if output.radix() < input.radix() {
            return Err(invalid(format!(
                "output radix {} is smaller than input radix {}",
                output.radix(),
                input.radix()
            )));
        }

        if payload.min_input_length > payload.max_input_length {
            return Err(invalid(format!(
                "min_input_length {} exceeds max_input_length {}",
                payload.min_input_length, payload.max_input_length
            )));
        }

        let (steps, passthrough_rule) = order_rules(&payload.passthrough_rules).map_err(invalid)?;
        let passthrough: HashSet<char> = passthrough_rule
            .as_deref()
            .unwrap_or(&payload.passthrough)
            .chars()
            .collect();
        if let Some(c) = passthrough.iter().find(|c| output.contains(**c)) {
            return Err(invalid(format!(
                "passthrough character {c:?} is also an output symbol"
            )));
        }

        let tweak = BASE64
            .decode(payload.tweak.as_bytes())
            .map_err(|e| invalid(format!("tweak is not valid base64: {e}")))?;
        let tweak_bounds = TweakBounds {
            min: payload.tweak_min_len.unwrap_or(0),
            max: payload.tweak_max_len.unwrap_or(0),
        };

        if payload.msb_encoding_bits >= u32::BITS {
            return Err(invalid(format!(
                "msb_encoding_bits {} out of range",
                payload.msb_encoding_bits
            )));
        }

        let descriptor = Self {
            name: name.clone(),
            input,
            output,
            passthrough,
            steps,
            min_input_length: payload.min_input_length,
            max_input_length: payload.max_input_length,
            msb_encoding_bits: payload.msb_encoding_bits,
            tweak,
            tweak_bounds,
        };

        // The ratio in^n / out^(n-1) shrinks as n grows, so the shortest
        // accepted input has the largest leading digit.
        let widest = descriptor.max_first_digit(descriptor.min_input_length.max(1));
        if u64::from(widest) >= 1u64 << descriptor.msb_encoding_bits {
            return Err(invalid(format!(
                "leading output digit can reach {widest}, which does not fit in {} bits",
                descriptor.msb_encoding_bits
            )));
        }

        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alphabet of plaintext symbols; also the FF1 alphabet.
    pub fn input(&self) -> &Alphabet {
        &self.input
    }

    /// Alphabet of ciphertext symbols.
    pub fn output(&self) -> &Alphabet {
        &self.output
    }

    pub fn is_passthrough(&self, c: char) -> bool {
        self.passthrough.contains(&c)
    }

    /// Processing order. Always contains exactly one [`RuleStep::Passthrough`].
    pub fn steps(&self) -> &[RuleStep] {
        &self.steps
    }

    pub fn prefix_length(&self) -> usize {
        self.steps
            .iter()
            .find_map(|s| match s {
                RuleStep::Prefix(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn suffix_length(&self) -> usize {
        self.steps
            .iter()
            .find_map(|s| match s {
                RuleStep::Suffix(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// `true` if a prefix or suffix rule keeps part of the input in clear.
    pub fn partial_encryption(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, RuleStep::Prefix(_) | RuleStep::Suffix(_)))
    }

    pub fn min_input_length(&self) -> usize {
        self.min_input_length
    }

    pub fn max_input_length(&self) -> usize {
        self.max_input_length
    }

    /// Low bits of the first output digit that carry data.
    pub fn msb_encoding_bits(&self) -> u32 {
        self.msb_encoding_bits
    }

    /// Default tweak bytes.
    pub fn tweak(&self) -> &[u8] {
        &self.tweak
    }

    pub fn tweak_bounds(&self) -> TweakBounds {
        self.tweak_bounds
    }

    /// Largest leading digit an `n`-symbol input can produce once re-encoded
    /// into the output alphabet: `floor((in^n - 1) / out^(n-1))`.
    pub fn max_first_digit(&self, n: usize) -> u32 {
        if n == 0 {
            return 0;
        }
        let Ok(exp) = u32::try_from(n - 1) else {
            return 0;
        };
        let in_radix = BigUint::from(self.input.radix());
        let out_radix = BigUint::from(self.output.radix());
        let top = in_radix.pow(exp + 1) - BigUint::one();
        (top / out_radix.pow(exp))
            .to_u32()
            .unwrap_or(u32::MAX)
    }
}

fn unique_alphabet(symbols: &str) -> Result<Alphabet, String> {
    let alphabet = Alphabet::new(symbols).map_err(|e| e.to_string())?;
    if alphabet.has_duplicates() {
        return Err("contains duplicate symbols".into());
    }
    Ok(alphabet)
}

/// Sort rules by priority and turn them into steps. Returns the passthrough
/// rule's character set, if one is present.
fn order_rules(rules: &[RulePayload]) -> Result<(Vec<RuleStep>, Option<String>), String> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.kind) {
            return Err(format!("more than one {:?} rule", rule.kind).to_lowercase());
        }
    }

    let mut sorted: Vec<&RulePayload> = rules.iter().collect();
    sorted.sort_by_key(|r| r.priority);

    let mut steps = Vec::with_capacity(3);
    let mut passthrough = None;
    for rule in sorted {
        match rule.kind {
            RuleKind::Prefix => steps.push(RuleStep::Prefix(rule_length(rule)?)),
            RuleKind::Suffix => steps.push(RuleStep::Suffix(rule_length(rule)?)),
            RuleKind::Passthrough => {
                let set = rule
                    .value
                    .as_str()
                    .ok_or_else(|| "passthrough rule value must be a string".to_owned())?;
                passthrough = Some(set.to_owned());
                steps.push(RuleStep::Passthrough);
            }
        }
    }
    if passthrough.is_none() {
        steps.push(RuleStep::Passthrough);
    }
    Ok((steps, passthrough))
}

/// Prefix/suffix lengths arrive as JSON numbers or numeric strings.
fn rule_length(rule: &RulePayload) -> Result<usize, String> {
    let parsed = match &rule.value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        format!(
            "{} rule value {} is not a non-negative integer",
            format!("{:?}", rule.kind).to_lowercase(),
            rule.value
        )
    })
}
