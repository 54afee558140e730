//! Splitting a value into the part to encrypt and the parts kept in clear.
//!
//! A [`Layout`] is produced by walking the dataset's [`RuleStep`]s in order:
//!
//! - a prefix or suffix step taken before the passthrough step peels raw
//!   characters off the text;
//! - the passthrough step separates passthrough characters (kept as literal
//!   template slots) from the characters to encrypt;
//! - a prefix or suffix step taken after the passthrough step counts only
//!   characters to encrypt, and passthrough characters it crosses travel with
//!   the peeled part.
//!
//! The same walk runs on plaintext and ciphertext, so both sides agree on
//! which positions carry cipher symbols.

use std::collections::VecDeque;

use crate::dataset::{DatasetDescriptor, RuleStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Cipher,
    Literal(char),
}

/// A value split into clear prefix, template, clear suffix, and the symbols
/// to transform.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Layout {
    prefix: Vec<char>,
    suffix: Vec<char>,
    template: VecDeque<Slot>,
    trimmed: VecDeque<char>,
}

impl Layout {
    pub(crate) fn split(dataset: &DatasetDescriptor, text: &str) -> Self {
        let mut raw: Vec<char> = text.chars().collect();
        let mut layout = Self::default();
        let mut separated = false;

        for step in dataset.steps() {
            match *step {
                RuleStep::Prefix(n) if !separated => {
                    let n = n.min(raw.len());
                    layout.prefix = raw.drain(..n).collect();
                }
                RuleStep::Suffix(n) if !separated => {
                    let at = raw.len().saturating_sub(n);
                    layout.suffix = raw.split_off(at);
                }
                RuleStep::Prefix(n) => layout.prefix = layout.peel_front(n),
                RuleStep::Suffix(n) => layout.suffix = layout.peel_back(n),
                RuleStep::Passthrough => {
                    separated = true;
                    for c in raw.drain(..) {
                        if dataset.is_passthrough(c) {
                            layout.template.push_back(Slot::Literal(c));
                        } else {
                            layout.template.push_back(Slot::Cipher);
                            layout.trimmed.push_back(c);
                        }
                    }
                }
            }
        }
        layout
    }

    /// The symbols to transform, in order.
    pub(crate) fn trimmed(&self) -> Vec<char> {
        self.trimmed.iter().copied().collect()
    }

    /// Rebuild the full value with `symbols` in the cipher slots.
    ///
    /// `symbols` must hold exactly one symbol per trimmed character.
    pub(crate) fn assemble(self, symbols: &[char]) -> String {
        debug_assert_eq!(symbols.len(), self.trimmed.len());
        let mut symbols = symbols.iter().copied();
        let mut out = String::with_capacity(self.prefix.len() + self.template.len() + self.suffix.len());
        out.extend(self.prefix);
        for slot in self.template {
            match slot {
                Slot::Literal(c) => out.push(c),
                Slot::Cipher => out.extend(symbols.next()),
            }
        }
        out.extend(self.suffix);
        out
    }

    fn peel_front(&mut self, n: usize) -> Vec<char> {
        let mut peeled = Vec::new();
        let mut taken = 0;
        while taken < n {
            match self.template.pop_front() {
                Some(Slot::Literal(c)) => peeled.push(c),
                Some(Slot::Cipher) => {
                    peeled.extend(self.trimmed.pop_front());
                    taken += 1;
                }
                None => break,
            }
        }
        peeled
    }

    fn peel_back(&mut self, n: usize) -> Vec<char> {
        let mut peeled = Vec::new();
        let mut taken = 0;
        while taken < n {
            match self.template.pop_back() {
                Some(Slot::Literal(c)) => peeled.push(c),
                Some(Slot::Cipher) => {
                    peeled.extend(self.trimmed.pop_back());
                    taken += 1;
                }
                None => break,
            }
        }
        peeled.reverse();
        peeled
    }
}
