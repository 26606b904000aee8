//! Sequence books and confirmed-number allocation.

use serde_json::{Value, json};

use crate::core::wire::str_field;
use crate::core::*;
use crate::erp::{ErpClient, ListQuery};

/// Doctype of the sequence books.
pub const BOOK_DOCTYPE: &str = "Talonario";
pub const BOOK_POINT_OF_SALE_FIELD: &str = "punto_de_venta";
pub const BOOK_LETTER_FIELD: &str = "letra";
pub const BOOK_LAST_USED_FIELD: &str = "ultimo_numero_utilizado";

/// Commit attempts before giving up on repeated concurrent modification.
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Result of [`NumberAllocator::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// `last_used` moved from `previous` to `number`.
    Committed { book: String, previous: u64, number: u64 },
    /// The book was already at or past `number`; nothing written.
    Stale { book: String, last_used: u64, number: u64 },
    /// No book exists for the point of sale and letter.
    NoBook { number: u64 },
}

/// Maps numbering methods to sequence books and advances them.
pub struct NumberAllocator<'a> {
    client: &'a dyn ErpClient,
}

impl<'a> NumberAllocator<'a> {
    pub fn new(client: &'a dyn ErpClient) -> Self {
        Self { client }
    }

    /// Configuration key holding the numbering method of `kind`.
    pub fn field_for(kind: DocumentKind) -> &'static str {
        match kind {
            DocumentKind::Invoice => "invoice_numbering",
            DocumentKind::CreditNote => "credit_note_numbering",
            DocumentKind::DebitNote => "debit_note_numbering",
        }
    }

    pub async fn find_book(
        &self,
        point_of_sale: &str,
        letter: Letter,
    ) -> Result<Option<SequenceBook>, ExternalError> {
        let query = ListQuery::new()
            .eq(BOOK_POINT_OF_SALE_FIELD, point_of_sale)
            .eq(BOOK_LETTER_FIELD, letter.code())
            .fields(&[
                "name",
                BOOK_POINT_OF_SALE_FIELD,
                BOOK_LETTER_FIELD,
                BOOK_LAST_USED_FIELD,
                "modified",
            ])
            .limit(1);
        let rows = self.client.list(BOOK_DOCTYPE, &query).await?;
        Ok(rows.first().and_then(|row| book_from_row(row, letter)))
    }

    /// Number the next confirmation under this book would carry.
    ///
    /// Read-only. An unknown or unreadable book yields 1, which can produce
    /// duplicates if the book does exist.
    pub async fn next_number(&self, point_of_sale: &str, letter: Letter) -> u64 {
        match self.find_book(point_of_sale, letter).await {
            Ok(Some(book)) => book.next(),
            Ok(None) => {
                tracing::warn!(
                    point_of_sale,
                    letter = letter.code(),
                    "no sequence book found, numbering from 1"
                );
                1
            }
            Err(e) => {
                tracing::warn!(
                    point_of_sale,
                    letter = letter.code(),
                    error = %e,
                    "sequence book lookup failed, numbering from 1"
                );
                1
            }
        }
    }

    /// Record `confirmed_identity`'s numeric suffix as the book's last used
    /// number.
    ///
    /// The write carries the book's `modified` stamp; if the book changed in
    /// between, it is re-read and the commit retried. The book never moves
    /// backward.
    pub async fn commit(
        &self,
        method: &NumberingMethod,
        confirmed_identity: &str,
    ) -> Result<CommitOutcome, ComprobanteError> {
        let number = sequence_suffix(confirmed_identity).ok_or_else(|| {
            ComprobanteError::Format(format!(
                "confirmed identity '{confirmed_identity}' has no numeric suffix"
            ))
        })?;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let Some(mut book) = self
                .find_book(method.point_of_sale(), method.letter())
                .await?
            else {
                tracing::warn!(
                    point_of_sale = method.point_of_sale(),
                    letter = method.letter().code(),
                    number,
                    "no sequence book to commit to"
                );
                return Ok(CommitOutcome::NoBook { number });
            };

            let previous = book.last_used;
            if book.advance_to(number).is_err() {
                tracing::warn!(
                    book = %book.name,
                    last_used = previous,
                    number,
                    "sequence book already past confirmed number"
                );
                return Ok(CommitOutcome::Stale {
                    book: book.name,
                    last_used: previous,
                    number,
                });
            }

            let mut fields = json!({ BOOK_LAST_USED_FIELD: number });
            if let Some(modified) = &book.modified {
                fields["modified"] = json!(modified);
            }
            match self.client.update(BOOK_DOCTYPE, &book.name, fields).await {
                Ok(_) => {
                    tracing::info!(book = %book.name, previous, number, "sequence committed");
                    return Ok(CommitOutcome::Committed {
                        book: book.name,
                        previous,
                        number,
                    });
                }
                Err(e) if e.is_timestamp_mismatch() => {
                    tracing::debug!(book = %book.name, attempt, "sequence book modified concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ComprobanteError::Conflict(format!(
            "sequence book {}/{} kept changing, gave up after {MAX_COMMIT_ATTEMPTS} attempts",
            method.point_of_sale(),
            method.letter().code()
        )))
    }
}

fn book_from_row(row: &Value, letter: Letter) -> Option<SequenceBook> {
    let obj = row.as_object()?;
    let last_used = match obj.get(BOOK_LAST_USED_FIELD) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(0);
    Some(SequenceBook {
        name: str_field(obj, "name")?,
        point_of_sale: str_field(obj, BOOK_POINT_OF_SALE_FIELD).unwrap_or_default(),
        letter: str_field(obj, BOOK_LETTER_FIELD)
            .and_then(|l| Letter::from_code(&l))
            .unwrap_or(letter),
        last_used,
        modified: str_field(obj, "modified"),
    })
}
