//! Failure classification from raw ERP error bodies.

mod common;

use std::sync::Arc;

use comprobantes::core::*;
use comprobantes::erp::ErpClient;
use comprobantes::lifecycle::*;
use rust_decimal_macros::dec;
use serde_json::json;

use common::*;

fn server_messages_body(exc_type: &str, message: &str) -> String {
    let inner = json!({ "message": message, "indicator": "red" }).to_string();
    json!({
        "exc_type": exc_type,
        "_server_messages": json!([inner]).to_string(),
    })
    .to_string()
}

fn context(erp: &Arc<FakeErp>) -> ErpContext {
    let client: Arc<dyn ErpClient> = erp.clone();
    ErpContext::new(client, settings())
}

fn draft() -> Document {
    DocumentBuilder::new(Direction::Sales, DocumentKind::Invoice, CUSTOMER, COMPANY)
        .update_stock(true)
        .add_line(
            LineItemBuilder::new("ART-1", dec!(12), dec!(10))
                .stock(MAIN_WAREHOUSE)
                .build(),
        )
        .build()
        .unwrap()
}

#[test]
fn shortage_read_from_server_messages() {
    let body = server_messages_body(
        "NegativeStockError",
        "<b>12.0</b> units of Item <a href=\"/app/item/ART-1\">ART-1: Tornillo</a> needed in Warehouse <b>Depósito - E</b> on 02-05-2024 to complete this transaction.",
    );
    let err = ExternalError::from_body(417, &body);
    assert_eq!(err.exc_type.as_deref(), Some("NegativeStockError"));
    assert_eq!(
        detect(&err),
        Detected::StockShortage {
            item_code: "ART-1".into(),
            warehouse: MAIN_WAREHOUSE.into(),
            required: dec!(12),
        }
    );
}

#[test]
fn spanish_shortage_recognized() {
    let err = ExternalError::new(
        417,
        Some("NegativeStockError"),
        "Se necesitan 4 unidades del producto ART-2: Tuerca en el almacén Sucursal - E para completar esta transacción.",
    );
    assert!(matches!(
        detect(&err),
        Detected::StockShortage { ref item_code, ref warehouse, .. }
            if item_code == "ART-2" && warehouse == SECOND_WAREHOUSE
    ));
}

#[test]
fn valuation_message_recognized() {
    let body = server_messages_body(
        "ValidationError",
        "Valuation Rate for the Item ART-3, is required to do accounting entries for Sales Invoice SINV-00004",
    );
    let err = ExternalError::from_body(417, &body);
    assert_eq!(
        detect(&err),
        Detected::MissingValuation {
            item_code: "ART-3".into()
        }
    );
}

#[test]
fn html_error_page_is_fatal() {
    let err = ExternalError::from_body(502, "<html><body><h1>502 Bad Gateway</h1></body></html>");
    assert_eq!(detect(&err), Detected::Unrecognized);
    assert_eq!(err.text(), "502 Bad Gateway");
}

#[tokio::test]
async fn shortage_splits_across_company_warehouses() {
    let erp = seeded();
    erp.seed("Warehouse", json!({"name": "Ajeno - X", "company": "Otra SA", "is_group": 0}));
    for (name, warehouse, qty) in [
        ("BIN-1", MAIN_WAREHOUSE, 2),
        ("BIN-2", SECOND_WAREHOUSE, 5),
        ("BIN-3", "Ajeno - X", 100),
    ] {
        erp.seed(
            "Bin",
            json!({"name": name, "item_code": "ART-1", "warehouse": warehouse, "actual_qty": qty}),
        );
    }
    let ctx = context(&erp);

    let failure = FailureClassifier::new(&ctx)
        .classify(shortage_error("12", "ART-1", MAIN_WAREHOUSE), &draft())
        .await;
    let FailureKind::StockShortage(shortage) = &failure else {
        panic!("expected a shortage, got {failure:?}");
    };
    assert_eq!(shortage.on_hand.len(), 2);
    assert_eq!(shortage.on_hand[0].warehouse, SECOND_WAREHOUSE);
    assert_eq!(
        shortage.plan,
        RemediationPlan::SplitAcross {
            allocations: vec![
                WarehouseStock {
                    warehouse: SECOND_WAREHOUSE.into(),
                    quantity: dec!(5)
                },
                WarehouseStock {
                    warehouse: MAIN_WAREHOUSE.into(),
                    quantity: dec!(2)
                },
            ],
            shortfall: dec!(5),
        }
    );
    assert!(failure.is_correctable());
    assert_eq!(failure.detail()["plan"]["action"], json!("split_across"));
}

#[tokio::test]
async fn failed_stock_lookup_still_correctable() {
    let erp = seeded();
    erp.fail(Op::List, "Bin", None, 1, ExternalError::transport("connection reset"));
    let ctx = context(&erp);

    let failure = FailureClassifier::new(&ctx)
        .classify(shortage_error("12", "ART-1", MAIN_WAREHOUSE), &draft())
        .await;
    let FailureKind::StockShortage(shortage) = failure else {
        panic!("expected a shortage");
    };
    assert!(shortage.on_hand.is_empty());
}

#[tokio::test]
async fn valuation_falls_back_to_global_history() {
    let erp = seeded();
    erp.seed(
        "Stock Ledger Entry",
        json!({"name": "SLE-9", "item_code": "ART-3", "company": "Otra SA", "is_cancelled": 0, "incoming_rate": 2.75}),
    );
    let ctx = context(&erp);

    let suggestion = FailureClassifier::new(&ctx)
        .suggest_valuation("ART-3", COMPANY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suggestion.rate, dec!(2.75));
    assert_eq!(suggestion.source, ValuationSource::GlobalHistory);
}

#[tokio::test]
async fn no_valuation_history_gives_no_suggestion() {
    let erp = seeded();
    let ctx = context(&erp);
    let suggestion = FailureClassifier::new(&ctx)
        .suggest_valuation("ART-3", COMPANY)
        .await
        .unwrap();
    assert!(suggestion.is_none());
}
