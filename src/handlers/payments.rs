use crate::{
    database::connection::DbPool,
    middleware::auth::AuthenticatedUser,
    models::audit::{AuditEvent, AuditEventType, NewAuditEvent},
    models::payment::{CreatePushPayment, Payment, PaymentError},
    requests::payment::StkPushRequest,
    services::access,
    services::mpesa::{GatewayError, MpesaGateway},
    utils::{helpers::ApiResponse, phone},
};
use actix_web::{HttpResponse, Result, web};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn initiate_push(
    pool: web::Data<DbPool>,
    gateway: web::Data<MpesaGateway>,
    request: web::Json<StkPushRequest>,
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

    let payer_id = match request.on_behalf_of {
        Some(other) if other != user.user_id => {
            if !access::can_act_on_behalf(&user) {
                return Ok(HttpResponse::Forbidden().json(ApiResponse::<()>::error(
                    "You cannot initiate payments for other members".to_string(),
                )));
            }
            other
        }
        _ => user.user_id,
    };

    info!(
        "Initiating push of {} to {} for member {}",
        request.amount, phone_number, payer_id
    );

    let reference = request
        .contribution_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "general".to_string());
    let description = request
        .description
        .clone()
        .unwrap_or_else(|| "Member contribution".to_string());

    let push = gateway
        .stk_push(&phone_number, &request.amount, &reference, &description)
        .await;

    // Logged whatever the gateway said; a failed initiation leaves its only
    // trace here.
    let mut event = NewAuditEvent::new(AuditEventType::PushRequest);
    event.payload = json!({
        "phone_number": phone_number,
        "amount": request.amount.to_string(),
        "reference": reference,
        "member_id": payer_id,
    });
    match &push {
        Ok(response) => {
            event.checkout_request_id = Some(response.checkout_request_id.clone());
            event.result_code = Some(0);
            event.result_desc = Some(response.response_description.clone());
        }
        Err(e) => {
            event.result_desc = Some(e.to_string());
        }
    }
    if let Err(e) = AuditEvent::record(&pool, event).await {
        error!("Failed to record push request event: {}", e);
    }

    let response = match push {
        Ok(response) => response,
        Err(GatewayError::Rejected(description)) => {
            warn!("Gateway rejected push for {}: {}", phone_number, description);
            return Ok(HttpResponse::BadGateway().json(ApiResponse::<()>::error(description)));
        }
        Err(e @ GatewayError::Unavailable { .. }) => {
            error!("Gateway unavailable: {}", e);
            return Ok(HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::error(
                "Payment gateway is currently unavailable, try again shortly".to_string(),
            )));
        }
        Err(e) => {
            error!("Push initiation failed: {}", e);
            return Ok(HttpResponse::BadGateway().json(ApiResponse::<()>::error(
                "Failed to reach the payment gateway".to_string(),
            )));
        }
    };

    let create = CreatePushPayment {
        member_id: Some(payer_id),
        contribution_id: request.contribution_id,
        phone_number,
        amount: request.amount,
        merchant_request_id: response.merchant_request_id.clone(),
        checkout_request_id: response.checkout_request_id.clone(),
    };

    match Payment::create_pending(&pool, create).await {
        Ok(payment) => Ok(HttpResponse::Created()
            .json(ApiResponse::success_with_message(payment, response.customer_message))),
        Err(e) => {
            error!("Failed to record pending payment: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Payment was initiated but could not be recorded".to_string(),
                )),
            )
        }
    }
}

pub async fn get_payment(
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let payment_id = path.into_inner();

    match Payment::find_by_id(&pool, payment_id).await {
        Ok(Some(payment)) => {
            if payment.member_id != Some(user.user_id) && !access::is_finance_official(&user) {
                return Ok(HttpResponse::Forbidden()
                    .json(ApiResponse::<()>::error("Access denied".to_string())));
            }
            Ok(HttpResponse::Ok().json(ApiResponse::success(payment)))
        }
        Ok(None) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "Payment not found".to_string(),
        ))),
        Err(PaymentError::Database(e)) => {
            error!("Database error getting payment: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve payment".to_string(),
                )),
            )
        }
        Err(e) => {
            error!("Error getting payment: {}", e);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

pub async fn my_payments(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    match Payment::find_by_member(&pool, user.user_id).await {
        Ok(payments) => Ok(HttpResponse::Ok().json(ApiResponse::success(payments))),
        Err(e) => {
            error!("Error getting member payments: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve payments".to_string(),
                )),
            )
        }
    }
}
