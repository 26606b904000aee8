//! Numbering methods and sequence books.

mod common;

use comprobantes::core::*;
use comprobantes::lifecycle::*;
use proptest::prelude::*;
use serde_json::json;

use common::*;

// --- Allocator ---

#[tokio::test]
async fn next_number_follows_book() {
    let erp = seeded();
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse("FE-FAC-A-00003-00000007").unwrap();

    let next = allocator
        .next_number(method.point_of_sale(), method.letter())
        .await;
    assert_eq!(next, 8);

    let outcome = allocator
        .commit(&method, &method.format_number(next).unwrap())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommitOutcome::Committed {
            book: "TAL-00003-A".into(),
            previous: 7,
            number: 8,
        }
    );
    assert_eq!(book_last_used(&erp, "00003", "A"), Some(8));
    assert_eq!(allocator.next_number("00003", Letter::A).await, 9);
}

#[tokio::test]
async fn next_number_is_read_only() {
    let erp = seeded();
    let allocator = NumberAllocator::new(&*erp);
    assert_eq!(allocator.next_number("00003", Letter::A).await, 8);
    assert_eq!(allocator.next_number("00003", Letter::A).await, 8);
    assert!(erp.calls_of(Op::Update, BOOK_DOCTYPE).is_empty());
}

#[tokio::test]
async fn missing_book_numbers_from_one() {
    let erp = seeded();
    let allocator = NumberAllocator::new(&*erp);
    assert_eq!(allocator.next_number("00009", Letter::B).await, 1);

    let method = NumberingMethod::parse("FE-FAC-B-00009-########").unwrap();
    let outcome = allocator
        .commit(&method, "FE-FAC-B-00009-00000001")
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::NoBook { number: 1 });
}

#[tokio::test]
async fn unreadable_book_numbers_from_one() {
    let erp = seeded();
    erp.fail(
        Op::List,
        BOOK_DOCTYPE,
        None,
        1,
        ExternalError::new(503, None, "Service Unavailable"),
    );
    let allocator = NumberAllocator::new(&*erp);
    assert_eq!(allocator.next_number("00003", Letter::A).await, 1);
}

#[tokio::test]
async fn commit_never_moves_backward() {
    let erp = seeded();
    erp.touch(BOOK_DOCTYPE, "TAL-00003-A", json!({ BOOK_LAST_USED_FIELD: 12 }));
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse(INVOICE_METHOD).unwrap();

    let outcome = allocator
        .commit(&method, "FE-FAC-A-00003-00000008")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommitOutcome::Stale {
            book: "TAL-00003-A".into(),
            last_used: 12,
            number: 8,
        }
    );
    assert_eq!(book_last_used(&erp, "00003", "A"), Some(12));
}

#[tokio::test]
async fn commit_retries_after_concurrent_modification() {
    let erp = seeded();
    erp.fail(
        Op::Update,
        BOOK_DOCTYPE,
        Some("TAL-00003-A"),
        1,
        ExternalError::new(417, Some("TimestampMismatchError"), "Document has been modified after you have opened it"),
    );
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse(INVOICE_METHOD).unwrap();

    let outcome = allocator
        .commit(&method, "FE-FAC-A-00003-00000008")
        .await
        .unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed { number: 8, .. }));
    assert_eq!(erp.calls_of(Op::Update, BOOK_DOCTYPE).len(), 2);
    assert_eq!(book_last_used(&erp, "00003", "A"), Some(8));
}

#[tokio::test]
async fn commit_sends_modified_stamp() {
    let erp = seeded();
    let stamp = erp.doc(BOOK_DOCTYPE, "TAL-00003-A").unwrap()["modified"].clone();
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse(INVOICE_METHOD).unwrap();
    allocator
        .commit(&method, "FE-FAC-A-00003-00000008")
        .await
        .unwrap();

    let updates = erp.calls_of(Op::Update, BOOK_DOCTYPE);
    let body = updates[0].body.as_ref().unwrap();
    assert_eq!(body["modified"], stamp);
    assert_eq!(body[BOOK_LAST_USED_FIELD], json!(8));
}

#[tokio::test]
async fn commit_gives_up_after_repeated_conflicts() {
    let erp = seeded();
    erp.fail(
        Op::Update,
        BOOK_DOCTYPE,
        None,
        MAX_COMMIT_ATTEMPTS,
        ExternalError::new(417, Some("TimestampMismatchError"), "modified"),
    );
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse(INVOICE_METHOD).unwrap();

    let err = allocator
        .commit(&method, "FE-FAC-A-00003-00000008")
        .await
        .unwrap_err();
    assert!(matches!(err, ComprobanteError::Conflict(_)));
    assert_eq!(book_last_used(&erp, "00003", "A"), Some(7));
}

#[tokio::test]
async fn commit_rejects_identity_without_suffix() {
    let erp = seeded();
    let allocator = NumberAllocator::new(&*erp);
    let method = NumberingMethod::parse(INVOICE_METHOD).unwrap();
    let err = allocator.commit(&method, "SINV-ABC").await.unwrap_err();
    assert!(matches!(err, ComprobanteError::Format(_)));
    assert_eq!(erp.call_count(), 0);
}

// --- Method parsing ---

#[test]
fn placeholder_sequences_accepted() {
    for raw in ["FE-FAC-A-00003-########", "FE-NCC-B-00001-.########"] {
        let method = NumberingMethod::parse(raw).unwrap();
        assert_eq!(method.sequence(), None);
    }
}

#[test]
fn malformed_methods_rejected() {
    for raw in [
        "",
        "FE-FAC-A",
        "FE-FAC-A-00003",
        "FE-FAC-A-0003-00000001",
        "FE-FAC-Z-00003-00000001",
        "FE-FAC-A-00003-0000001",
        "FE-FAC-A-00003-0000000X",
        "FE-FAC-A-00003-00000001-EXTRA",
    ] {
        assert!(
            matches!(NumberingMethod::parse(raw), Err(ComprobanteError::Format(_))),
            "{raw:?} should be rejected"
        );
    }
}

proptest! {
    #[test]
    fn format_then_suffix_recovers_number(number in 1u64..=MAX_SEQUENCE, pos in 1u32..99_999) {
        let method = NumberingMethod::parse(&format!("FE-FAC-B-{pos:05}-########")).unwrap();
        let fiscal = method.format_number(number).unwrap();
        prop_assert_eq!(sequence_suffix(&fiscal), Some(number));
        prop_assert_eq!(fiscal.len(), "FE-FAC-B-00000-00000000".len());
    }

    #[test]
    fn fewer_than_five_segments_always_rejected(parts in proptest::collection::vec("[A-Z0-9]{1,6}", 0..5)) {
        let raw = parts.join("-");
        prop_assert!(matches!(NumberingMethod::parse(&raw), Err(ComprobanteError::Format(_))));
    }

    #[test]
    fn book_only_moves_forward(last_used in 0u64..1_000, number in 0u64..1_000) {
        let mut book = SequenceBook {
            name: "TAL".into(),
            point_of_sale: "00001".into(),
            letter: Letter::A,
            last_used,
            modified: None,
        };
        let result = book.advance_to(number);
        if number > last_used {
            prop_assert!(result.is_ok());
            prop_assert_eq!(book.last_used, number);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(book.last_used, last_used);
        }
    }
}
