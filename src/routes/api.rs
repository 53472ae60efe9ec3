use actix_web::{HttpResponse, web};

use crate::handlers;

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(web::resource("/register").route(web::post().to(handlers::auth::register)))
            .service(web::resource("/login").route(web::post().to(handlers::auth::login))),
    )
    .service(
        web::scope("/payments")
            .service(
                web::resource("/push").route(web::post().to(handlers::payments::initiate_push)),
            )
            .service(web::resource("/mine").route(web::get().to(handlers::payments::my_payments)))
            .service(
                web::resource("/{id}/approval")
                    .route(web::post().to(handlers::approvals::decide)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(handlers::payments::get_payment))
                    .route(web::head().to(HttpResponse::MethodNotAllowed)),
            ),
    )
    .service(
        web::scope("/contributions")
            .service(
                web::resource("")
                    .route(web::post().to(handlers::contributions::create))
                    .route(web::get().to(handlers::contributions::all)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(handlers::contributions::get_contribution)),
            ),
    )
    .service(
        web::resource("/callbacks/stk").route(web::post().to(handlers::callbacks::stk_callback)),
    )
    .service(web::resource("/receipts").route(web::post().to(handlers::receipts::submit_receipt)))
    .service(
        web::scope("/refunds")
            .service(
                web::resource("/pending")
                    .route(web::get().to(handlers::refunds::pending_refunds)),
            )
            .service(
                web::resource("")
                    .route(web::post().to(handlers::refunds::request_refund))
                    .route(web::get().to(handlers::refunds::my_refunds)),
            ),
    );
}
