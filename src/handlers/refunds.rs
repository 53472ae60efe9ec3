use crate::{
    config::Settings,
    database::connection::DbPool,
    middleware::auth::AuthenticatedUser,
    models::contribution::Contribution,
    models::payment::Payment,
    models::refund::{CreateRefundRequest, RefundRequest},
    requests::refund::RefundRequestBody,
    services::access,
    utils::helpers::ApiResponse,
};
use actix_web::{HttpResponse, Result, web};
use rust_decimal::Decimal;
use tracing::{error, info};

pub async fn request_refund(
    pool: web::Data<DbPool>,
    settings: web::Data<Settings>,
    request: web::Json<RefundRequestBody>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !access::is_interactive(&user) {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
            "Account is not active".to_string(),
        )));
    }

    if request.amount <= Decimal::ZERO {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Amount must be greater than zero".to_string(),
        )));
    }

    let contribution = match Contribution::find_by_id(&pool, request.contribution_id).await {
        Ok(Some(contribution)) => contribution,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "Contribution not found".to_string(),
            )));
        }
        Err(e) => {
            error!("Error loading contribution: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve contribution".to_string(),
                )),
            );
        }
    };

    if !contribution.category.is_refundable() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
            "{} contributions are not refundable",
            contribution.title
        ))));
    }

    let payment = match Payment::find_completed_for_contribution(
        &pool,
        user.user_id,
        request.contribution_id,
    )
    .await
    {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "No settled payment found for this contribution".to_string(),
            )));
        }
        Err(e) => {
            error!("Error loading payment for refund: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve payment".to_string(),
                )),
            );
        }
    };

    if request.amount > payment.amount {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Requested amount exceeds the paid amount".to_string(),
        )));
    }

    match RefundRequest::find_active(&pool, user.user_id, request.contribution_id).await {
        Ok(Some(active)) => {
            return Ok(HttpResponse::Conflict().json(ApiResponse::conflict(
                "A refund request for this contribution is already in progress".to_string(),
                active,
            )));
        }
        Ok(None) => {}
        Err(e) => {
            error!("Error checking active refunds: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to check existing refund requests".to_string(),
                )),
            );
        }
    }

    let payout_amount = RefundRequest::compute_payout(
        request.amount,
        settings.payments.refund_payout_percent,
    );

    let create = CreateRefundRequest {
        payment_id: payment.id,
        contribution_id: request.contribution_id,
        member_id: user.user_id,
        original_amount: payment.amount,
        requested_amount: request.amount,
        payout_amount,
        reason: request.reason.clone(),
    };

    match RefundRequest::create(&pool, create).await {
        Ok(Some(refund)) => {
            info!(
                "Refund request {} created for member {} ({} of {})",
                refund.id, user.user_id, refund.payout_amount, refund.requested_amount
            );
            Ok(HttpResponse::Created().json(ApiResponse::success(refund)))
        }
        Ok(None) => {
            // Another request for the same slot won the insert race.
            let existing = RefundRequest::find_active(&pool, user.user_id, request.contribution_id)
                .await
                .ok()
                .flatten();
            Ok(match existing {
                Some(existing) => HttpResponse::Conflict().json(ApiResponse::conflict(
                    "A refund request for this contribution is already in progress".to_string(),
                    existing,
                )),
                None => HttpResponse::Conflict().json(ApiResponse::<()>::error(
                    "A refund request for this contribution is already in progress".to_string(),
                )),
            })
        }
        Err(e) => {
            error!("Failed to create refund request: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to create refund request".to_string(),
                )),
            )
        }
    }
}

pub async fn my_refunds(pool: web::Data<DbPool>, user: AuthenticatedUser) -> Result<HttpResponse> {
    match RefundRequest::find_by_member(&pool, user.user_id).await {
        Ok(refunds) => Ok(HttpResponse::Ok().json(ApiResponse::success(refunds))),
        Err(e) => {
            error!("Error getting member refunds: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve refund requests".to_string(),
                )),
            )
        }
    }
}

pub async fn pending_refunds(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !access::is_finance_official(&user) {
        return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
            "Only finance officials can view the pending queue".to_string(),
        )));
    }

    match RefundRequest::find_pending(&pool).await {
        Ok(refunds) => Ok(HttpResponse::Ok().json(ApiResponse::success(refunds))),
        Err(e) => {
            error!("Error getting pending refunds: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve refund requests".to_string(),
                )),
            )
        }
    }
}
