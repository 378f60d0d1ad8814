//! Entry point for the appointment watcher.
//! Polls the scheduler for open slots, publishes the new ones to a queue,
//! sends the alerts found on that queue and exposes a manual trigger over HTTP.

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Context;
use appointment_cache::ConfiguredStoreProvider;
use appointment_cache::store::local_now;
use notification_services::{
    AlertProcessor, PgRecipientDirectory, QueuePublisher, SesEmailSender, SnsSmsSender, SqsQueue,
};
use postgres::database::create_connection_pool;
use ttp_scheduler::TtpSchedulerClient;

mod config;
mod handlers;
mod poll_cycle;
mod scheduler;

use config::AppConfig;
use poll_cycle::AppointmentPoller;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().context("Failed to read configuration")?;
    log::info!("Starting appointment watcher for locations {:?}", config.poller.location_ids);

    let queue = match &config.poller.queue_url {
        Some(url) => Some(Arc::new(SqsQueue::from_env(url.clone()).await)),
        None => None,
    };
    let publisher: Option<Arc<dyn QueuePublisher>> = match (&queue, config.poller.queue_enabled) {
        (Some(queue), true) => Some(queue.clone() as Arc<dyn QueuePublisher>),
        (None, true) => {
            log::warn!("QUEUE_ENABLED is set but QUEUE_URL is missing, new slots will not be published");
            None
        }
        (_, false) => None,
    };

    let source = TtpSchedulerClient::new(config.poller.source_url.clone())
        .context("Failed to build scheduler client")?;
    let poller = Arc::new(AppointmentPoller::new(
        Arc::new(source),
        Arc::new(ConfiguredStoreProvider::new(config.cache.clone())),
        publisher,
        config.poller.clone(),
        config.notifier.queue_max_bytes,
    ));

    tokio::spawn(scheduler::run_timer(
        poller.clone(),
        config.poller.poll_interval,
        config.poller.active_hours,
        config.poller.ignore_timer,
        local_now,
    ));

    match (&queue, &config.cache.sql.url) {
        (Some(queue), Some(database_url)) => {
            let pool = create_connection_pool(database_url, config.cache.sql.acquire_timeout)
                .await
                .context("Failed to connect to the recipient database")?;
            let processor = AlertProcessor::new(
                Arc::new(PgRecipientDirectory::new(pool)),
                Arc::new(SnsSmsSender::from_env().await),
                Arc::new(SesEmailSender::from_env(config.from_email.clone()).await),
                config.notifier.clone(),
            );
            tokio::spawn(scheduler::run_consumer(queue.clone(), Arc::new(processor)));
        }
        (Some(_), None) => {
            log::warn!("DATABASE_URL is not set, queued alerts will not be consumed");
        }
        (None, _) => log::info!("No queue configured, alert consumer not started"),
    }

    log::info!("Server will be available at: http://{}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(poller.clone()))
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("Failed to bind {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}
