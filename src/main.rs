use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    self, App, HttpServer,
    middleware::{Logger, from_fn},
    web,
};
use std::sync::{Arc, LazyLock};

use crate::{
    configs::{connect_database, connect_redis},
    middlewares::authentication,
    modules::{
        attachment::{AttachmentStorage, LocalAttachmentStorage, UploadConfig},
        conversation::{repository_pg::ConversationPgRepository, service::ServiceLimits},
        message::repository_pg::MessageRepositoryPg,
        push::RedisPushQueue,
        websocket::{
            events::EventPublisher,
            handler::{presence_handler, websocket_handler},
            presence::{PresenceService, PresenceTracker, RedisLastSeenStore},
            server::DeliveryRouter,
            session::ConversationSvc,
        },
    },
    utils::{Authenticator, JwtAuthenticator},
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
#[cfg(test)]
mod test;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    tracing::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check() -> &'static str {
    "Server is running"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_pool =
        connect_database().await.map_err(|_| std::io::Error::other("Database connection error"))?;

    let redis_pool = connect_redis().map_err(|_| std::io::Error::other("Redis connection error"))?;

    let router = DeliveryRouter::new().start();
    let publisher: Arc<dyn EventPublisher> = Arc::new(router.clone());

    let presence_service = Arc::new(PresenceService::new(
        Arc::new(PresenceTracker::new()),
        Arc::new(RedisLastSeenStore::new(redis_pool.clone())),
        publisher.clone(),
    ));

    let conversation_service = web::Data::new(ConversationSvc::with_dependencies(
        Arc::new(ConversationPgRepository::new(db_pool.clone())),
        Arc::new(MessageRepositoryPg::new(db_pool.clone())),
        presence_service.clone(),
        publisher,
        Arc::new(RedisPushQueue::new(redis_pool)),
        ServiceLimits {
            pending_batch: ENV.pending_delivery_batch,
            page_size: ENV.message_page_size,
        },
    ));
    let presence_service = web::Data::from(presence_service);

    let authenticator: Arc<dyn Authenticator> =
        Arc::new(JwtAuthenticator::new(ENV.jwt_secret.as_bytes()));

    let local_storage = LocalAttachmentStorage::new(UploadConfig::from_env(&ENV));
    let attachment_storage: Arc<dyn AttachmentStorage> = Arc::new(local_storage.clone());

    tracing::info!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&ENV.frontend_url)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(router.clone()))
            .app_data(conversation_service.clone())
            .app_data(presence_service.clone())
            .app_data(web::Data::new(authenticator.clone()))
            .app_data(web::Data::new(attachment_storage.clone()))
            .app_data(web::Data::new(local_storage.clone()))
            .service(health_check)
            .route("/ws", web::get().to(websocket_handler))
            .route("/uploads/{name}", web::get().to(modules::attachment::handle::serve_upload))
            .service(
                web::scope("/api")
                    .wrap(from_fn(authentication))
                    .configure(modules::conversation::route::configure)
                    .configure(modules::message::route::configure)
                    .route("/presence", web::get().to(presence_handler)),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(2)
    .run()
    .await
}
