use crate::{
    config::Settings,
    database::connection::DbPool,
    models::audit::{AuditEvent, AuditEventType, NewAuditEvent},
    models::payment::{CreateOutOfBandPayment, Payment, PaymentError},
};
use actix_web::{HttpRequest, HttpResponse, Result, web};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Callback-Signature";
const MAX_BODY_BYTES: usize = 65_536;

/// The gateway retries until it sees this body; everything except a proven
/// signature failure gets it.
fn acknowledgement() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

/// HMAC-SHA256 over the raw body. The header may carry the digest hex- or
/// base64-encoded.
fn signature_is_valid(secret: &str, body: &[u8], header: &str) -> bool {
    let decoded = hex::decode(header.trim())
        .ok()
        .or_else(|| BASE64.decode(header.trim()).ok());
    let Some(signature) = decoded else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, PartialEq)]
struct CallbackData {
    merchant_request_id: Option<String>,
    checkout_request_id: Option<String>,
    result_code: i64,
    result_desc: String,
    amount: Option<Decimal>,
    receipt_number: Option<String>,
    phone_number: Option<String>,
    transaction_time: Option<DateTime<Utc>>,
}

fn parse_callback(body: &Value) -> Option<CallbackData> {
    let callback = body.get("Body")?.get("stkCallback")?;
    let result_code = callback.get("ResultCode")?.as_i64()?;

    let mut data = CallbackData {
        merchant_request_id: callback
            .get("MerchantRequestID")
            .and_then(|v| v.as_str())
            .map(String::from),
        checkout_request_id: callback
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .map(String::from),
        result_code,
        result_desc: callback
            .get("ResultDesc")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        amount: None,
        receipt_number: None,
        phone_number: None,
        transaction_time: None,
    };

    let items = callback
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(|i| i.as_array());

    if let Some(items) = items {
        for item in items {
            let Some(name) = item.get("Name").and_then(|n| n.as_str()) else {
                continue;
            };
            let value = item.get("Value");
            match name {
                "Amount" => data.amount = value.and_then(item_decimal),
                "MpesaReceiptNumber" => {
                    data.receipt_number = value.and_then(|v| v.as_str()).map(String::from)
                }
                "PhoneNumber" => data.phone_number = value.and_then(item_string),
                "TransactionDate" => {
                    data.transaction_time = value
                        .and_then(item_string)
                        .as_deref()
                        .and_then(parse_transaction_time)
                }
                _ => {}
            }
        }
    }

    Some(data)
}

fn item_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn item_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Gateway timestamps arrive as 14-digit `YYYYMMDDHHmmss` strings or numbers.
fn parse_transaction_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

pub async fn stk_callback(
    pool: web::Data<DbPool>,
    settings: web::Data<Settings>,
    req: HttpRequest,
    mut payload: web::Payload,
) -> Result<HttpResponse> {
    // The body is read once, raw: the signature covers these exact bytes.
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed reading callback body: {}", e);
                return Ok(acknowledgement());
            }
        };
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            warn!("Callback body exceeded {} bytes, discarding", MAX_BODY_BYTES);
            return Ok(acknowledgement());
        }
        body.extend_from_slice(&chunk);
    }

    // None: no secret provisioned, checking skipped (sandbox / local runs).
    let signature_valid = settings.mpesa.callback_secret.as_deref().map(|secret| {
        let header = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        signature_is_valid(secret, &body, header)
    });

    let parsed_body: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&body).into_owned() }));
    let data = parse_callback(&parsed_body);

    // Audited before anything acts on the payload, so the interaction is
    // reconstructable even if everything below fails.
    let mut event = NewAuditEvent::new(AuditEventType::PushCallback);
    event.signature_valid = signature_valid;
    if let Some(data) = &data {
        event.checkout_request_id = data.checkout_request_id.clone();
        event.receipt_number = data.receipt_number.clone();
        event.result_code = Some(data.result_code as i32);
        event.result_desc = Some(data.result_desc.clone());
        event.payload = json!({
            "amount": data.amount.map(|a| a.to_string()),
            "phone_number": data.phone_number,
            "body": parsed_body,
        });
    } else {
        event.payload = json!({ "body": parsed_body });
    }
    if let Err(e) = AuditEvent::record(&pool, event).await {
        error!("Failed to record callback audit event: {}", e);
    }

    if signature_valid == Some(false) {
        warn!("Rejected callback with invalid signature");
        return Ok(HttpResponse::Unauthorized()
            .json(json!({ "ResultCode": 1, "ResultDesc": "Invalid signature" })));
    }

    let Some(data) = data else {
        warn!("Received unparseable callback body");
        return Ok(acknowledgement());
    };
    let Some(checkout_id) = data.checkout_request_id.clone() else {
        warn!("Received callback without a checkout request id");
        return Ok(acknowledgement());
    };

    match process_callback(&pool, &data, &checkout_id).await {
        Ok(disposition) => {
            info!("Callback for {} processed: {:?}", checkout_id, disposition)
        }
        // Still acknowledged: a retry would hit the same error, and the audit
        // event already preserves the payload.
        Err(e) => error!("Callback processing failed for {}: {}", checkout_id, e),
    }

    Ok(acknowledgement())
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackDisposition {
    Completed,
    Failed,
    DuplicateReceipt,
    AlreadyFinal,
    OutOfBandLedgered,
    Unmatched,
}

async fn process_callback(
    pool: &DbPool,
    data: &CallbackData,
    checkout_id: &str,
) -> Result<CallbackDisposition, PaymentError> {
    let payment = match Payment::find_by_checkout_id(pool, checkout_id).await? {
        Some(payment) => payment,
        None => {
            // A callback for a push whose pending insert never landed. If the
            // payload proves money moved, ledger it directly; collisions mean
            // the ledger already knows and are swallowed.
            if data.result_code == 0 {
                if let (Some(receipt), Some(amount), Some(phone_number)) =
                    (&data.receipt_number, &data.amount, &data.phone_number)
                {
                    let inserted = Payment::insert_completed_out_of_band(
                        pool,
                        CreateOutOfBandPayment {
                            phone_number: phone_number.clone(),
                            amount: *amount,
                            checkout_request_id: checkout_id.to_string(),
                            merchant_request_id: data.merchant_request_id.clone(),
                            receipt_number: receipt.clone(),
                            result_desc: Some(data.result_desc.clone()),
                            verified_at: data.transaction_time.unwrap_or_else(Utc::now),
                        },
                    )
                    .await?;
                    return Ok(match inserted {
                        Some(_) => CallbackDisposition::OutOfBandLedgered,
                        None => CallbackDisposition::AlreadyFinal,
                    });
                }
            }
            return Ok(CallbackDisposition::Unmatched);
        }
    };

    // Terminal rows are never touched again; the callback was already
    // audit-logged above.
    if payment.status.is_terminal() {
        return Ok(CallbackDisposition::AlreadyFinal);
    }

    if data.result_code != 0 {
        Payment::fail(pool, payment.id, Some(&data.result_desc)).await?;
        return Ok(CallbackDisposition::Failed);
    }

    let Some(receipt) = &data.receipt_number else {
        // A success result without a receipt proves nothing; the money, if
        // real, can still come in through manual verification.
        Payment::fail(pool, payment.id, Some("Success callback without receipt")).await?;
        return Ok(CallbackDisposition::Failed);
    };

    // One receipt, one payment. A receipt already attached elsewhere marks
    // this delivery as a replay, and this payment must not complete under it.
    if let Some(existing) = Payment::find_by_receipt(pool, receipt).await? {
        if existing.id != payment.id {
            warn!(
                "Receipt {} already attached to payment {}, failing payment {}",
                receipt, existing.id, payment.id
            );
            let mut event = NewAuditEvent::new(AuditEventType::PushCallback);
            event.checkout_request_id = Some(checkout_id.to_string());
            event.receipt_number = Some(receipt.clone());
            event.result_desc = Some("Duplicate receipt code".to_string());
            event.payload = json!({
                "warning": "duplicate_receipt",
                "existing_payment_id": existing.id,
                "failed_payment_id": payment.id,
            });
            if let Err(e) = AuditEvent::record(pool, event).await {
                error!("Failed to record duplicate receipt event: {}", e);
            }

            Payment::fail(pool, payment.id, Some("Duplicate receipt code")).await?;
            return Ok(CallbackDisposition::DuplicateReceipt);
        }
    }

    let verified_at = data.transaction_time.unwrap_or_else(Utc::now);
    let updated =
        Payment::complete(pool, payment.id, receipt, Some(&data.result_desc), verified_at).await?;

    Ok(match updated {
        Some(_) => CallbackDisposition::Completed,
        // Another delivery won the pending -> terminal race.
        None => CallbackDisposition::AlreadyFinal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn success_body() -> Value {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 500.00 },
                            { "Name": "MpesaReceiptNumber", "Value": "QWE123ABC" },
                            { "Name": "TransactionDate", "Value": 20260805143000u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn parses_successful_callback_metadata() {
        let data = parse_callback(&success_body()).unwrap();
        assert_eq!(data.result_code, 0);
        assert_eq!(
            data.checkout_request_id.as_deref(),
            Some("ws_CO_191220191020363925")
        );
        assert_eq!(data.receipt_number.as_deref(), Some("QWE123ABC"));
        assert_eq!(data.amount, Some(Decimal::from_str("500.00").unwrap()));
        assert_eq!(data.phone_number.as_deref(), Some("254712345678"));

        let at = data.transaction_time.unwrap();
        assert_eq!(at.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-08-05T14:30:00");
    }

    #[test]
    fn parses_failed_callback_without_metadata() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let data = parse_callback(&body).unwrap();
        assert_eq!(data.result_code, 1032);
        assert_eq!(data.result_desc, "Request cancelled by user");
        assert_eq!(data.receipt_number, None);
        assert_eq!(data.amount, None);
    }

    #[test]
    fn rejects_bodies_without_callback_envelope() {
        assert!(parse_callback(&json!({})).is_none());
        assert!(parse_callback(&json!({ "Body": {} })).is_none());
        assert!(parse_callback(&json!({ "raw": "not json" })).is_none());
    }

    #[test]
    fn metadata_values_accept_numbers_and_strings() {
        assert_eq!(
            item_decimal(&json!("500.50")),
            Some(Decimal::from_str("500.50").unwrap())
        );
        assert_eq!(item_decimal(&json!(500)), Some(Decimal::from(500)));
        assert_eq!(item_decimal(&json!(null)), None);

        assert_eq!(item_string(&json!(254712345678u64)), Some("254712345678".to_string()));
        assert_eq!(item_string(&json!("0712345678")), Some("0712345678".to_string()));
    }

    #[test]
    fn transaction_time_parses_fourteen_digit_form() {
        let at = parse_transaction_time("20260805143000").unwrap();
        assert_eq!(at.format("%Y%m%d%H%M%S").to_string(), "20260805143000");
        assert!(parse_transaction_time("2026-08-05").is_none());
        assert!(parse_transaction_time("").is_none());
    }

    #[test]
    fn hex_and_base64_signatures_verify() {
        let secret = "shared-secret";
        let body = br#"{"Body":{"stkCallback":{"ResultCode":0}}}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();

        let hex_header = hex::encode(&digest);
        let base64_header = BASE64.encode(&digest);

        assert!(signature_is_valid(secret, body, &hex_header));
        assert!(signature_is_valid(secret, body, &base64_header));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails_verification() {
        let secret = "shared-secret";
        let body = br#"{"ResultCode":0}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let header = hex::encode(mac.finalize().into_bytes());

        assert!(!signature_is_valid(secret, br#"{"ResultCode":1}"#, &header));
        assert!(!signature_is_valid("other-secret", body, &header));
        assert!(!signature_is_valid(secret, body, "not a signature"));
        assert!(!signature_is_valid(secret, body, ""));
    }
}
