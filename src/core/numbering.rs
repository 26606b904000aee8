use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ComprobanteError;
use super::types::Letter;

/// Width of the point-of-sale segment.
pub const POINT_OF_SALE_WIDTH: usize = 5;
/// Width of the sequence segment.
pub const SEQUENCE_WIDTH: usize = 8;
/// Largest number representable in the sequence segment.
pub const MAX_SEQUENCE: u64 = 99_999_999;

/// Parsed numbering method: `prefix-docType-letter-pointOfSale(5)-sequence(8)`.
///
/// The sequence segment is either eight digits (`00000007`) or an eight-character
/// placeholder (`########`, optionally led by a dot as in `.########`).
///
/// ```
/// use comprobantes::core::*;
///
/// let method: NumberingMethod = "FE-FAC-A-00003-00000007".parse().unwrap();
/// assert_eq!(method.point_of_sale(), "00003");
/// assert_eq!(method.letter(), Letter::A);
/// assert_eq!(method.format_number(8).unwrap(), "FE-FAC-A-00003-00000008");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingMethod {
    prefix: String,
    doc_type: String,
    letter: Letter,
    point_of_sale: String,
    sequence: Option<u64>,
}

impl NumberingMethod {
    /// Parse a numbering method. Fails with [`ComprobanteError::Format`] on any
    /// malformed segment, without touching anything external.
    pub fn parse(input: &str) -> Result<Self, ComprobanteError> {
        let input = input.trim();
        let segments: Vec<&str> = input.split('-').collect();
        let &[prefix, doc_type, letter, point_of_sale, sequence] = segments.as_slice() else {
            return Err(ComprobanteError::Format(format!(
                "numbering method '{input}' must have 5 segments \
                 (prefix-docType-letter-pointOfSale-sequence), found {}",
                segments.len()
            )));
        };

        if prefix.is_empty() || doc_type.is_empty() {
            return Err(ComprobanteError::Format(format!(
                "numbering method '{input}' has an empty prefix or document type"
            )));
        }

        let letter = Letter::from_code(letter).ok_or_else(|| {
            ComprobanteError::Format(format!(
                "numbering method '{input}': unknown letter '{letter}'"
            ))
        })?;

        if point_of_sale.len() != POINT_OF_SALE_WIDTH
            || !point_of_sale.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ComprobanteError::Format(format!(
                "numbering method '{input}': point of sale must be {POINT_OF_SALE_WIDTH} digits"
            )));
        }

        let sequence_digits = sequence.strip_prefix('.').unwrap_or(sequence);
        let sequence = if sequence_digits.len() != SEQUENCE_WIDTH {
            return Err(ComprobanteError::Format(format!(
                "numbering method '{input}': sequence must be {SEQUENCE_WIDTH} characters"
            )));
        } else if sequence_digits.chars().all(|c| c == '#') {
            None
        } else if sequence_digits.chars().all(|c| c.is_ascii_digit()) {
            sequence_digits.parse::<u64>().ok()
        } else {
            return Err(ComprobanteError::Format(format!(
                "numbering method '{input}': sequence must be digits or '#' placeholders"
            )));
        };

        Ok(Self {
            prefix: prefix.to_string(),
            doc_type: doc_type.to_string(),
            letter,
            point_of_sale: point_of_sale.to_string(),
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Document-type segment (e.g. "FAC").
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn letter(&self) -> Letter {
        self.letter
    }

    /// Five-digit point of sale; also the sequence book key.
    pub fn point_of_sale(&self) -> &str {
        &self.point_of_sale
    }

    /// Sequence embedded in the method string, if it carried digits.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Render the fiscal number for `number` under this method.
    pub fn format_number(&self, number: u64) -> Result<String, ComprobanteError> {
        if number == 0 || number > MAX_SEQUENCE {
            return Err(ComprobanteError::Format(format!(
                "sequence number {number} outside 1..={MAX_SEQUENCE}"
            )));
        }
        Ok(format!(
            "{}-{}-{}-{}-{:0>width$}",
            self.prefix,
            self.doc_type,
            self.letter.code(),
            self.point_of_sale,
            number,
            width = SEQUENCE_WIDTH
        ))
    }
}

impl FromStr for NumberingMethod {
    type Err = ComprobanteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NumberingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-",
            self.prefix,
            self.doc_type,
            self.letter.code(),
            self.point_of_sale
        )?;
        match self.sequence {
            Some(n) => write!(f, "{:0>width$}", n, width = SEQUENCE_WIDTH),
            None => write!(f, "{}", "#".repeat(SEQUENCE_WIDTH)),
        }
    }
}

/// Numeric suffix of a confirmed identity (`...-00000008` → 8).
pub fn sequence_suffix(identity: &str) -> Option<u64> {
    let tail = identity.trim().rsplit('-').next()?;
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

/// Sequence book ("Talonario"): last issued number per point of sale and letter.
///
/// `last_used` only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBook {
    /// ERP record name.
    pub name: String,
    pub point_of_sale: String,
    pub letter: Letter,
    pub last_used: u64,
    /// Upstream modification stamp, used for optimistic concurrency.
    pub modified: Option<String>,
}

impl SequenceBook {
    /// Number the next confirmation would receive. Does not reserve it.
    pub fn next(&self) -> u64 {
        self.last_used + 1
    }

    /// Move `last_used` to `number`. Rejects any backward or sideways move.
    pub fn advance_to(&mut self, number: u64) -> Result<(), ComprobanteError> {
        if number <= self.last_used {
            return Err(ComprobanteError::Conflict(format!(
                "sequence book {} is at {}, refusing to move to {number}",
                self.name, self.last_used
            )));
        }
        self.last_used = number;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_method() {
        let m = NumberingMethod::parse("FE-FAC-A-00003-00000007").unwrap();
        assert_eq!(m.prefix(), "FE");
        assert_eq!(m.doc_type(), "FAC");
        assert_eq!(m.letter(), Letter::A);
        assert_eq!(m.point_of_sale(), "00003");
        assert_eq!(m.sequence(), Some(7));
    }

    #[test]
    fn parses_placeholder_sequence() {
        let m = NumberingMethod::parse("FE-NCC-B-00001-.########").unwrap();
        assert_eq!(m.sequence(), None);
        assert_eq!(m.to_string(), "FE-NCC-B-00001-########");
    }

    #[test]
    fn rejects_short_segment_count() {
        let err = NumberingMethod::parse("FE-FAC-A-00003").unwrap_err();
        assert!(matches!(err, ComprobanteError::Format(_)));
    }

    #[test]
    fn rejects_bad_point_of_sale() {
        assert!(NumberingMethod::parse("FE-FAC-A-0003-00000007").is_err());
        assert!(NumberingMethod::parse("FE-FAC-A-0000X-00000007").is_err());
    }

    #[test]
    fn rejects_unknown_letter() {
        assert!(NumberingMethod::parse("FE-FAC-Z-00003-00000007").is_err());
    }

    #[test]
    fn format_pads_sequence() {
        let m = NumberingMethod::parse("FE-FAC-A-00003-00000007").unwrap();
        assert_eq!(m.format_number(8).unwrap(), "FE-FAC-A-00003-00000008");
        assert!(m.format_number(0).is_err());
        assert!(m.format_number(MAX_SEQUENCE + 1).is_err());
    }

    #[test]
    fn suffix_of_identity() {
        assert_eq!(sequence_suffix("FE-FAC-A-00003-00000008"), Some(8));
        assert_eq!(sequence_suffix("ACC-SINV-2024"), Some(2024));
        assert_eq!(sequence_suffix("SINV-X"), None);
        assert_eq!(sequence_suffix(""), None);
    }

    #[test]
    fn book_never_moves_backward() {
        let mut book = SequenceBook {
            name: "TAL-00003-A".into(),
            point_of_sale: "00003".into(),
            letter: Letter::A,
            last_used: 7,
            modified: None,
        };
        assert_eq!(book.next(), 8);
        book.advance_to(8).unwrap();
        assert_eq!(book.next(), 9);
        assert!(book.advance_to(8).is_err());
        assert!(book.advance_to(3).is_err());
        assert_eq!(book.last_used, 8);
    }
}
