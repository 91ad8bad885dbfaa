// src/main.rs

mod activity;
mod app_state;
mod auth;
mod calendar;
mod chat;
mod chat_server;
mod config;
mod customer;
mod dashboard_data;
mod error;
mod models;
mod notifier;
mod process;
mod settings;
mod store;
mod task;
mod technician;
mod ticket;
mod user_management;
mod web_socket_server;

use std::io;
use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};

use crate::activity::{get_unread_count, list_notifications, mark_all_read, mark_read};
use crate::app_state::AppState;
use crate::auth::{login, seed_admin, Authentication};
use crate::calendar::{create_event, delete_event, get_user_events};
use crate::chat::{
    delete_message, get_messages, get_unread_total, list_chats, mark_chat_read, send_message,
    start_chat,
};
use crate::chat_server::ChatServer;
use crate::config::{Config, StoreBackend};
use crate::customer::{
    create_customer, delete_customer, get_customer, list_customers, list_expiring, update_customer,
};
use crate::dashboard_data::get_dashboard_data;
use crate::process::{
    create_process, delete_process, get_process, list_processes, toggle_process_step,
    update_process,
};
use crate::settings::{get_settings, update_settings};
use crate::store::{ensure_indexes, MemoryStore, MongoStore, Store};
use crate::task::{
    create_task, delete_task, get_task, list_tasks, nudge_task, update_task, update_task_status,
};
use crate::technician::{
    create_technician, delete_technician, get_technician, list_technicians, update_technician,
};
use crate::ticket::TicketKind;
use crate::user_management::{create_user, get_user_by_id, list_users, search_users, update_user};
use crate::web_socket_server::ws_index;

fn startup_error(e: impl std::fmt::Display) -> io::Error {
    error!("Startup failed: {}", e);
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(startup_error)?;
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Mongo => Arc::new(
            MongoStore::init(&config.mongo_uri, &config.database_name)
                .await
                .map_err(startup_error)?,
        ),
        StoreBackend::Memory => {
            info!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    ensure_indexes(store.as_ref()).await.map_err(startup_error)?;

    // One hub per process; it is also the notifier every service pushes through.
    let chat_server = ChatServer::new(store.clone()).start();
    let state = AppState {
        store,
        notifier: Arc::new(chat_server.clone()),
        config: config.clone(),
    };
    seed_admin(&state).await.map_err(startup_error)?;

    info!("Server running at http://{}", config.bind_address);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    let jwt_secret = config.jwt_secret.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        let mut app = App::new()
            .wrap(Authentication::new(jwt_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(chat_server.clone()))
            .route("/login", web::post().to(login))
            // USERS
            .service(
                web::scope("/users")
                    .route("", web::get().to(list_users))
                    .route("", web::post().to(create_user))
                    .route("/search", web::get().to(search_users))
                    .route("/{id}", web::get().to(get_user_by_id))
                    .route("/{id}", web::put().to(update_user)),
            )
            // CUSTOMERS
            .service(
                web::scope("/customers")
                    .route("", web::get().to(list_customers))
                    .route("", web::post().to(create_customer))
                    .route("/expiring", web::get().to(list_expiring))
                    .route("/{id}", web::get().to(get_customer))
                    .route("/{id}", web::put().to(update_customer))
                    .route("/{id}", web::delete().to(delete_customer)),
            )
            // TASKS
            .service(
                web::scope("/tasks")
                    .route("", web::get().to(list_tasks))
                    .route("", web::post().to(create_task))
                    .route("/{id}", web::get().to(get_task))
                    .route("/{id}", web::put().to(update_task))
                    .route("/{id}", web::delete().to(delete_task))
                    .route("/{id}/status", web::patch().to(update_task_status))
                    .route("/{id}/nudge", web::post().to(nudge_task)),
            )
            // NOTIFICATIONS
            .service(
                web::scope("/notifications")
                    .route("/{user_id}", web::get().to(list_notifications))
                    .route("/{user_id}/unread-count", web::get().to(get_unread_count))
                    .route("/{user_id}/read-all", web::patch().to(mark_all_read))
                    .route("/{id}/read", web::patch().to(mark_read)),
            )
            // CHAT
            .service(
                web::scope("/chat")
                    .route("/list/{user_id}", web::get().to(list_chats))
                    .route("/start", web::post().to(start_chat))
                    .route("/unread/{user_id}", web::get().to(get_unread_total))
                    .route("/{chat_id}/messages", web::get().to(get_messages))
                    .route("/{chat_id}/messages", web::post().to(send_message))
                    .route("/{chat_id}/read", web::patch().to(mark_chat_read))
                    .route("/{chat_id}/messages/{message_id}", web::delete().to(delete_message)),
            )
            // TECHNICIANS
            .service(
                web::scope("/technicians")
                    .route("", web::get().to(list_technicians))
                    .route("", web::post().to(create_technician))
                    .route("/{id}", web::get().to(get_technician))
                    .route("/{id}", web::put().to(update_technician))
                    .route("/{id}", web::delete().to(delete_technician)),
            )
            // PROCESSES
            .service(
                web::scope("/processes")
                    .route("", web::get().to(list_processes))
                    .route("", web::post().to(create_process))
                    .route("/{id}", web::get().to(get_process))
                    .route("/{id}", web::put().to(update_process))
                    .route("/{id}", web::delete().to(delete_process))
                    .route("/{id}/steps/{index}", web::patch().to(toggle_process_step)),
            )
            // CALENDAR
            .service(
                web::scope("/calendar")
                    .route("", web::post().to(create_event))
                    .route("/events/{id}", web::delete().to(delete_event))
                    .route("/{user_id}", web::get().to(get_user_events)),
            )
            // SETTINGS & DASHBOARD
            .service(
                web::resource("/settings")
                    .route(web::get().to(get_settings))
                    .route(web::put().to(update_settings)),
            )
            .route("/dashboard", web::get().to(get_dashboard_data))
            // WEBSOCKET route for real-time
            .service(web::resource("/ws").route(web::get().to(ws_index)));

        // TICKETS: one scope per kind
        for kind in TicketKind::ALL {
            app = app.service(ticket::scope(kind));
        }
        app
    })
    .bind(config.bind_address)?
    .run()
    .await
}
