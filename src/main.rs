mod config;
mod database;
mod handlers;
mod middleware;
mod models;
mod requests;
mod routes;
mod services;
mod utils;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use services::mpesa::{MpesaGateway, ReceiptLookup, TokenCache};
use services::verification::ReceiptVerifier;
use std::sync::Arc;
use tracing::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = config::Settings::new()?;
    let pool = database::connection::init_pool(&settings.database.url).await?;
    sqlx::migrate!().run(&pool).await?;

    let gateway = Arc::new(MpesaGateway::new(
        settings.mpesa.clone(),
        TokenCache::default(),
    ));
    let lookup = settings
        .mpesa
        .lookup_enabled
        .then(|| gateway.clone() as Arc<dyn ReceiptLookup>);

    let pool_data = web::Data::new(pool);
    let gateway_data = web::Data::from(gateway);
    let verifier_data = web::Data::new(ReceiptVerifier::new(lookup));
    let settings_data = web::Data::new(settings.clone());

    let bind = (settings.server.host.clone(), settings.server.port);
    info!("Starting server on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(pool_data.clone())
            .app_data(gateway_data.clone())
            .app_data(verifier_data.clone())
            .app_data(settings_data.clone())
            .configure(routes::api::scoped_config)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
