use crate::{
    database::connection::DbPool,
    middleware::auth::AuthenticatedUser,
    models::approval::{ApprovalDecision, ApprovalOutcome},
    models::payment::{Payment, PaymentStatus},
    models::user::User,
    requests::approval::ApprovalRequest,
    services::access,
    services::email::EmailService,
    utils::helpers::ApiResponse,
};
use actix_web::{HttpResponse, Result, web};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub payment: Payment,
    pub decision: ApprovalDecision,
}

pub async fn decide(
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
    request: web::Json<ApprovalRequest>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !access::is_finance_official(&user) {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
            "Only finance officials can decide on payments".to_string(),
        )));
    }

    let payment_id = path.into_inner();
    info!(
        "Approval decision {:?} on payment {} by {}",
        request.decision, payment_id, user.user_id
    );

    let payment = match Payment::find_by_id(&pool, payment_id).await {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "Payment not found".to_string(),
            )));
        }
        Err(e) => {
            error!("Error loading payment {}: {}", payment_id, e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve payment".to_string(),
                )),
            );
        }
    };

    match ApprovalDecision::find_by_payment(&pool, payment_id).await {
        Ok(Some(existing)) => {
            return Ok(HttpResponse::Conflict().json(ApiResponse::conflict(
                "This payment has already been decided".to_string(),
                existing,
            )));
        }
        Ok(None) => {}
        Err(e) => {
            error!("Error checking prior decision for {}: {}", payment_id, e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to check prior decisions".to_string(),
                )),
            );
        }
    }

    if payment.status != PaymentStatus::AwaitingApproval {
        return Ok(HttpResponse::Conflict().json(ApiResponse::conflict(
            "Payment is not awaiting approval".to_string(),
            payment,
        )));
    }

    let approved = request.decision == ApprovalOutcome::Approved;

    // Conditional update: of two concurrent approvers, exactly one sees the
    // row transition; the loser gets a conflict and writes nothing.
    let updated = match Payment::finalize_approval(&pool, payment_id, approved).await {
        Ok(Some(updated)) => updated,
        Ok(None) => {
            warn!("Lost approval race on payment {}", payment_id);
            let current = Payment::find_by_id(&pool, payment_id).await.ok().flatten();
            return Ok(match current {
                Some(current) => HttpResponse::Conflict().json(ApiResponse::conflict(
                    "Payment was decided by someone else".to_string(),
                    current,
                )),
                None => HttpResponse::Conflict().json(ApiResponse::<()>::error(
                    "Payment was decided by someone else".to_string(),
                )),
            });
        }
        Err(e) => {
            error!("Error finalizing payment {}: {}", payment_id, e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to finalize payment".to_string(),
                )),
            );
        }
    };

    let decision = match ApprovalDecision::create(
        &pool,
        payment_id,
        user.user_id,
        request.decision,
        request.notes.clone(),
    )
    .await
    {
        Ok(Some(decision)) => decision,
        Ok(None) => {
            // The payment transition above is the gate, so a decision row can
            // only be missing-then-present if this exact call raced itself.
            warn!("Decision already recorded for payment {}", payment_id);
            return Ok(HttpResponse::Conflict().json(ApiResponse::<()>::error(
                "A decision was already recorded for this payment".to_string(),
            )));
        }
        Err(e) => {
            error!("Error recording decision for {}: {}", payment_id, e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Payment was finalized but the decision could not be recorded".to_string(),
                )),
            );
        }
    };

    info!(
        "Payment {} {} by {}",
        payment_id,
        if approved { "approved" } else { "rejected" },
        user.user_id
    );

    notify_member(&pool, &updated, approved, request.notes.clone());

    Ok(HttpResponse::Ok().json(ApiResponse::success(ApprovalResponse {
        payment: updated,
        decision,
    })))
}

/// Best-effort outcome email; the decision stands whether or not this lands.
fn notify_member(pool: &DbPool, payment: &Payment, approved: bool, notes: Option<String>) {
    let Some(member_id) = payment.member_id else {
        return;
    };
    let pool = pool.clone();
    let amount = payment.amount;
    let receipt_number = payment.receipt_number.clone();

    tokio::spawn(async move {
        let member = match User::find_by_id(&pool, member_id).await {
            Ok(Some(member)) => member,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not load member {} for notification: {}", member_id, e);
                return;
            }
        };

        let service = match EmailService::new() {
            Ok(service) => service,
            Err(e) => {
                warn!("Email service unavailable: {}", e);
                return;
            }
        };

        let template = service.approval_outcome_template(
            &member.fullname,
            &amount,
            receipt_number.as_deref(),
            approved,
            notes.as_deref(),
        );

        if let Err(e) = service.send_email(&member.email, Some(&member.fullname), template) {
            warn!("Failed to send approval notification to {}: {}", member.email, e);
        }
    });
}
