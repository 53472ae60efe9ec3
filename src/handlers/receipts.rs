use crate::{
    database::connection::DbPool,
    middleware::auth::AuthenticatedUser,
    models::audit::{AuditEvent, AuditEventType, NewAuditEvent},
    models::submission::{CreateSubmission, ReceiptSubmission, SubmissionError},
    requests::receipt::SubmitReceiptRequest,
    services::access,
    services::verification::{ReceiptVerifier, VerificationOutcome},
    utils::{helpers::ApiResponse, phone},
};
use actix_web::{HttpResponse, Result, web};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info};

/// Receipt codes are short alphanumeric strings; stored uppercased so lookups
/// are case-insensitive.
fn normalize_receipt(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    ((6..=20).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(code)
}

pub async fn submit_receipt(
    pool: web::Data<DbPool>,
    verifier: web::Data<ReceiptVerifier>,
    request: web::Json<SubmitReceiptRequest>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !access::is_interactive(&user) {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
            "Account is not active".to_string(),
        )));
    }

    let phone_number = match phone::canonicalize(&request.phone) {
        Ok(p) => p,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())));
        }
    };

    if request.amount <= Decimal::ZERO {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Amount must be greater than zero".to_string(),
        )));
    }

    let Some(receipt_number) = normalize_receipt(&request.receipt_number) else {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Receipt code must be 6-20 letters and digits".to_string(),
        )));
    };

    let member_id = match request.on_behalf_of {
        Some(other) if other != user.user_id => {
            if !access::can_act_on_behalf(&user) {
                return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
                    "You cannot submit receipts for other members".to_string(),
                )));
            }
            other
        }
        _ => user.user_id,
    };

    info!(
        "Receipt {} submitted by {} for member {}",
        receipt_number, user.user_id, member_id
    );

    let create = CreateSubmission {
        submitted_by: user.user_id,
        member_id: Some(member_id),
        phone_number,
        amount: request.amount,
        receipt_number: receipt_number.clone(),
    };

    let submission = match ReceiptSubmission::create(&pool, create).await {
        Ok(submission) => submission,
        Err(SubmissionError::DuplicateReceipt { .. }) => {
            let existing = ReceiptSubmission::find_live_by_receipt(&pool, &receipt_number)
                .await
                .ok()
                .flatten();
            return Ok(match existing {
                Some(existing) => HttpResponse::Conflict().json(ApiResponse::conflict(
                    "This receipt has already been submitted".to_string(),
                    existing,
                )),
                None => HttpResponse::Conflict().json(ApiResponse::<()>::error(
                    "This receipt has already been submitted".to_string(),
                )),
            });
        }
        Err(e) => {
            error!("Failed to create receipt submission: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to record submission".to_string(),
                )),
            );
        }
    };

    // The claim itself is audited before any verification acts on it.
    let mut event = NewAuditEvent::new(AuditEventType::ManualConfirmation);
    event.receipt_number = Some(receipt_number.clone());
    event.payload = json!({
        "submission_id": submission.id,
        "amount": submission.amount.to_string(),
        "phone_number": submission.phone_number,
        "member_id": member_id,
        "submitted_by": user.user_id,
    });
    if let Err(e) = AuditEvent::record(&pool, event).await {
        error!("Failed to record manual confirmation event: {}", e);
    }

    match verifier.verify(&pool, submission).await {
        Ok(VerificationOutcome::Verified {
            submission, source, ..
        }) => {
            info!(
                "Receipt {} verified via {}",
                receipt_number,
                source.as_str()
            );
            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                submission,
                "Receipt verified, awaiting treasurer approval".to_string(),
            )))
        }
        Ok(VerificationOutcome::Rejected { submission }) => {
            info!("Receipt {} rejected: no evidence found", receipt_number);
            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                submission,
                "No matching transaction was found for this receipt".to_string(),
            )))
        }
        Err(e) => {
            error!("Receipt verification failed for {}: {}", receipt_number, e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Verification could not be completed".to_string(),
                )),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_codes_are_uppercased() {
        assert_eq!(normalize_receipt("qwe123abc"), Some("QWE123ABC".to_string()));
        assert_eq!(normalize_receipt(" ABC999 "), Some("ABC999".to_string()));
    }

    #[test]
    fn malformed_receipt_codes_are_rejected() {
        assert_eq!(normalize_receipt("abc"), None);
        assert_eq!(normalize_receipt("QWE 123"), None);
        assert_eq!(normalize_receipt("QWE-123-ABC"), None);
        assert_eq!(normalize_receipt(""), None);
        assert_eq!(normalize_receipt(&"X".repeat(21)), None);
    }
}
