//! Transcript -> symbol id sequences.

use std::collections::HashMap;

use rand::Rng;

use crate::config::{ARPABET_PHONES, SYMBOL_SETS};
use crate::error::{DataError, Result};

/// Turns a transcript into integer symbol ids.
pub trait TextEncoder: Send + Sync {
    /// Runs the configured cleaners, then symbolizes.
    fn encode(&self, text: &str) -> Result<Vec<i64>>;
    /// Symbolizes text that has already been cleaned (e.g. phonemized transcripts).
    fn encode_cleaned(&self, text: &str) -> Result<Vec<i64>>;
}

/// Places `token` between every pair of items and at both ends: `n` items become `2n + 1`.
pub fn intersperse(sequence: &[i64], token: i64) -> Vec<i64> {
    let mut out = vec![token; sequence.len() * 2 + 1];
    for (i, &id) in sequence.iter().enumerate() {
        out[i * 2 + 1] = id;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleaner {
    Basic,
    English,
}

impl Cleaner {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "basic_cleaners" => Ok(Cleaner::Basic),
            "english_cleaners" => Ok(Cleaner::English),
            other => Err(DataError::UnknownCleaner(other.to_string())),
        }
    }

    fn apply(self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let folded = match self {
            Cleaner::Basic => lowered,
            Cleaner::English => lowered
                .chars()
                .map(|c| match c {
                    '‘' | '’' => '\'',
                    '“' | '”' => '"',
                    '–' | '—' => '-',
                    c => c,
                })
                .collect(),
        };
        collapse_whitespace(&folded)
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Symbolizer backed by one of the static symbol sets.
///
/// Text inside curly braces is read as space-separated ARPAbet phones, e.g. `{HH AH0 L OW1}`.
/// With a pronunciation dictionary, each plain word is swapped for its ARPAbet spelling with
/// probability `p_arpabet`.
pub struct SymbolEncoder {
    cleaners: Vec<Cleaner>,
    symbol_to_id: HashMap<String, i64>,
    p_arpabet: f64,
    dictionary: HashMap<String, Vec<String>>,
}

impl SymbolEncoder {
    pub fn new(symbol_set: &str, cleaners: &[String], p_arpabet: f64) -> Result<Self> {
        let spec = SYMBOL_SETS
            .get(symbol_set)
            .ok_or_else(|| DataError::UnknownSymbolSet(symbol_set.to_string()))?;
        let cleaners = cleaners.iter().map(|name| Cleaner::from_name(name)).collect::<Result<Vec<_>>>()?;

        let mut symbols: Vec<String> = vec![spec.pad.to_string()];
        symbols.extend(spec.special.chars().map(String::from));
        symbols.extend(spec.punctuation.chars().map(String::from));
        symbols.extend(spec.letters.chars().map(String::from));
        if spec.arpabet {
            symbols.extend(ARPABET_PHONES.iter().map(|p| format!("@{p}")));
        }
        // First occurrence wins when a set lists a character twice.
        let mut symbol_to_id = HashMap::with_capacity(symbols.len());
        for (id, symbol) in symbols.into_iter().enumerate() {
            symbol_to_id.entry(symbol).or_insert(id as i64);
        }

        Ok(Self {
            cleaners,
            symbol_to_id,
            p_arpabet,
            dictionary: HashMap::new(),
        })
    }

    /// Words are looked up lowercased; phones are plain CMU phones (`"HH"`, `"AH0"`).
    pub fn with_dictionary(mut self, dictionary: HashMap<String, Vec<String>>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn num_symbols(&self) -> usize {
        self.symbol_to_id.len()
    }

    pub fn symbol_id(&self, symbol: &str) -> Option<i64> {
        self.symbol_to_id.get(symbol).copied()
    }

    fn clean(&self, text: &str) -> String {
        self.cleaners.iter().fold(text.to_string(), |acc, cleaner| cleaner.apply(&acc))
    }

    fn push_chars(&self, text: &str, out: &mut Vec<i64>) {
        for c in text.chars() {
            if c == '_' || c == '~' {
                continue;
            }
            let mut buf = [0u8; 4];
            if let Some(&id) = self.symbol_to_id.get(&*c.encode_utf8(&mut buf)) {
                out.push(id);
            }
        }
    }

    fn push_arpabet(&self, phones: &str, out: &mut Vec<i64>) {
        for phone in phones.split_whitespace() {
            if let Some(&id) = self.symbol_to_id.get(&format!("@{phone}")) {
                out.push(id);
            }
        }
    }

    fn push_words(&self, text: &str, out: &mut Vec<i64>) {
        if self.dictionary.is_empty() || self.p_arpabet <= 0.0 {
            self.push_chars(text, out);
            return;
        }
        let mut rng = rand::rng();
        for (i, word) in text.split(' ').enumerate() {
            if i > 0 {
                self.push_chars(" ", out);
            }
            let key = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'').to_lowercase();
            match self.dictionary.get(&key) {
                Some(phones) if !key.is_empty() && rng.random::<f64>() < self.p_arpabet => {
                    let (head, tail) = split_around(word, &key);
                    self.push_chars(head, out);
                    self.push_arpabet(&phones.join(" "), out);
                    self.push_chars(tail, out);
                }
                _ => self.push_chars(word, out),
            }
        }
    }

    fn symbolize(&self, text: &str, cleaned: bool) -> Vec<i64> {
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            self.push_segment(&rest[..open], cleaned, &mut out);
            self.push_arpabet(&rest[open + 1..close], &mut out);
            rest = &rest[close + 1..];
        }
        self.push_segment(rest, cleaned, &mut out);
        out
    }

    fn push_segment(&self, segment: &str, cleaned: bool, out: &mut Vec<i64>) {
        if segment.is_empty() {
            return;
        }
        if cleaned {
            self.push_chars(segment, out);
        } else {
            self.push_words(&self.clean(segment), out);
        }
    }
}

// Splits `word` into the punctuation before and after its case-insensitive core `key`.
fn split_around<'a>(word: &'a str, key: &str) -> (&'a str, &'a str) {
    match word.to_lowercase().find(key) {
        Some(start) if word.is_char_boundary(start) && word.is_char_boundary(start + key.len()) => {
            (&word[..start], &word[start + key.len()..])
        }
        _ => ("", ""),
    }
}

impl TextEncoder for SymbolEncoder {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        Ok(self.symbolize(text, false))
    }

    fn encode_cleaned(&self, text: &str) -> Result<Vec<i64>> {
        Ok(self.symbolize(text, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> SymbolEncoder {
        SymbolEncoder::new("nvidia_taco2", &["english_cleaners".to_string()], 0.0).unwrap()
    }

    #[test]
    fn intersperse_surrounds_every_symbol() {
        assert_eq!(intersperse(&[5, 6, 7], 0), vec![0, 5, 0, 6, 0, 7, 0]);
        assert_eq!(intersperse(&[], 9), vec![9]);
    }

    #[test]
    fn english_cleaners_lowercase_and_collapse_whitespace() {
        let enc = encoder();
        let ids = enc.encode("Hi   There").unwrap();
        let expected: Vec<i64> = "hi there".chars().map(|c| enc.symbol_id(&c.to_string()).unwrap()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn curly_braces_are_arpabet() {
        let enc = encoder();
        let ids = enc.encode("a {HH AH0} b").unwrap();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[2], enc.symbol_id("@HH").unwrap());
        assert_eq!(ids[3], enc.symbol_id("@AH0").unwrap());
    }

    #[test]
    fn dictionary_swaps_every_word_at_probability_one() {
        let dict = HashMap::from([("cat".to_string(), vec!["K".to_string(), "AE1".to_string(), "T".to_string()])]);
        let enc = SymbolEncoder::new("nvidia_taco2", &["english_cleaners".to_string()], 1.0)
            .unwrap()
            .with_dictionary(dict);
        let ids = enc.encode("Cat.").unwrap();
        assert_eq!(
            ids,
            vec![
                enc.symbol_id("@K").unwrap(),
                enc.symbol_id("@AE1").unwrap(),
                enc.symbol_id("@T").unwrap(),
                enc.symbol_id(".").unwrap(),
            ]
        );
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(matches!(SymbolEncoder::new("klingon", &[], 0.0), Err(DataError::UnknownSymbolSet(_))));
        assert!(matches!(
            SymbolEncoder::new("ipa", &["shouting_cleaners".to_string()], 0.0),
            Err(DataError::UnknownCleaner(_))
        ));
    }
}
