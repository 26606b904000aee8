use std::collections::HashMap;

use rust_decimal::Decimal;

use super::error::{ComprobanteError, ValidationError};
use super::types::*;

/// Reject lines that repeat an item with divergent upstream links.
///
/// Duplicate rows of the same item are allowed only when they carry identical
/// upstream links (same document and same row), or none at all.
pub fn check_duplicate_items<'a, I>(lines: I) -> Result<(), ComprobanteError>
where
    I: IntoIterator<Item = (&'a str, Option<&'a UpstreamLink>)>,
{
    let mut seen: HashMap<&'a str, Option<&'a UpstreamLink>> = HashMap::new();
    for (key, link) in lines {
        match seen.get(key) {
            Some(first) if *first != link => {
                return Err(ComprobanteError::Conflict(format!(
                    "item '{key}' appears on several lines with different upstream links"
                )));
            }
            Some(_) => {}
            None => {
                seen.insert(key, link);
            }
        }
    }
    Ok(())
}

/// Duplicate check over raw request lines. Lines without any key are skipped
/// here and reported by [`validate_raw_lines`].
pub fn check_raw_conflicts(lines: &[RawLine]) -> Result<(), ComprobanteError> {
    check_duplicate_items(
        lines
            .iter()
            .filter_map(|l| l.item_key().map(|k| (k, l.upstream.as_ref()))),
    )
}

/// Duplicate check over normalized lines.
pub fn check_line_conflicts(lines: &[LineItem]) -> Result<(), ComprobanteError> {
    check_duplicate_items(
        lines
            .iter()
            .map(|l| (l.item_code.as_str(), l.upstream.as_ref())),
    )
}

/// Validate raw request lines. Returns all findings (not just the first).
pub fn validate_raw_lines(lines: &[RawLine]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if lines.is_empty() {
        errors.push(ValidationError::new(
            "lines",
            "at least one line item is required",
        ));
    }

    for (i, line) in lines.iter().enumerate() {
        let path = format!("lines.{i}");
        if line.item_key().is_none() {
            errors.push(ValidationError::new(
                &path,
                "either an item code or a description is required",
            ));
        }
        validate_amounts(&path, line.quantity, line.rate, line.tax_rate, &mut errors);
        if let Some(link) = &line.upstream {
            if link.parent.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{path}.upstream"),
                    "upstream link must name its parent document",
                ));
            }
        }
    }

    errors
}

/// Validate a normalized document before it is sent upstream.
pub fn validate_document(doc: &Document) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if doc.party.trim().is_empty() {
        errors.push(ValidationError::new(
            doc.direction.party_field(),
            "party must not be empty",
        ));
    }
    if doc.company.trim().is_empty() {
        errors.push(ValidationError::new("company", "company must not be empty"));
    }
    if doc.lines.is_empty() {
        errors.push(ValidationError::new(
            "lines",
            "at least one line item is required",
        ));
    }

    for (i, line) in doc.lines.iter().enumerate() {
        let path = format!("lines.{i}");
        if line.item_code.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{path}.item_code"),
                "item code must not be empty",
            ));
        }
        validate_amounts(&path, line.quantity, line.rate, line.tax_rate, &mut errors);
        if line.is_stock_item && line.warehouse.is_none() {
            errors.push(ValidationError::new(
                format!("{path}.warehouse"),
                format!("stock item '{}' requires a warehouse", line.item_code),
            ));
        }
    }

    // Receipt-linked lines and a direct stock update cannot coexist upstream.
    let has_receipt_link = doc
        .lines
        .iter()
        .any(|l| matches!(&l.upstream, Some(link) if link.kind == LinkKind::Receipt));
    if doc.update_stock && has_receipt_link {
        errors.push(ValidationError::new(
            "update_stock",
            "cannot update stock directly while billing existing receipts",
        ));
    }

    errors
}

fn validate_amounts(
    path: &str,
    quantity: Decimal,
    rate: Decimal,
    tax_rate: Decimal,
    errors: &mut Vec<ValidationError>,
) {
    if quantity.is_zero() {
        errors.push(ValidationError::new(
            format!("{path}.quantity"),
            "quantity must not be zero",
        ));
    }
    if rate.is_sign_negative() && !rate.is_zero() {
        errors.push(ValidationError::new(
            format!("{path}.rate"),
            "rate must not be negative",
        ));
    }
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        errors.push(ValidationError::new(
            format!("{path}.tax_rate"),
            "tax rate must be between 0 and 100",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(code: &str, link: Option<UpstreamLink>) -> RawLine {
        RawLine {
            item_code: Some(code.into()),
            description: None,
            quantity: dec!(1),
            rate: dec!(10),
            tax_rate: dec!(21),
            warehouse: None,
            upstream: link,
        }
    }

    #[test]
    fn duplicate_with_divergent_links_conflicts() {
        let lines = vec![
            raw("X", Some(UpstreamLink::receipt("PR-1", None))),
            raw("X", Some(UpstreamLink::receipt("PR-2", None))),
        ];
        assert!(matches!(
            check_raw_conflicts(&lines),
            Err(ComprobanteError::Conflict(_))
        ));
    }

    #[test]
    fn duplicate_with_identical_links_allowed() {
        let link = UpstreamLink::receipt("PR-1", Some("row-1".into()));
        let lines = vec![raw("X", Some(link.clone())), raw("X", Some(link))];
        assert!(check_raw_conflicts(&lines).is_ok());
    }

    #[test]
    fn duplicate_rows_of_same_receipt_allowed() {
        let lines = vec![
            raw("X", Some(UpstreamLink::receipt("PR-1", Some("row-1".into())))),
            raw("X", Some(UpstreamLink::receipt("PR-1", Some("row-2".into())))),
        ];
        assert!(check_raw_conflicts(&lines).is_ok());
    }

    #[test]
    fn linked_and_unlinked_duplicate_conflicts() {
        let lines = vec![
            raw("X", Some(UpstreamLink::receipt("PR-1", None))),
            raw("X", None),
        ];
        assert!(check_raw_conflicts(&lines).is_err());
    }

    #[test]
    fn zero_quantity_and_missing_key_reported() {
        let mut line = raw("X", None);
        line.item_code = None;
        line.quantity = dec!(0);
        let errors = validate_raw_lines(&[line]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "lines.0");
        assert_eq!(errors[1].field, "lines.0.quantity");
    }

    #[test]
    fn empty_request_reported() {
        let errors = validate_raw_lines(&[]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "lines");
    }
}
