use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

mod websockets;

use crashguard::config::Config;
use crashguard::safety_flag::ReplicatedFlag;
use crashguard::session::{MonitorSession, SessionHandle};
use crashguard::sink::{AlertSink, PgAlertSink};
use crashguard::wake::CountingWakeLock;
use crate::websockets::ws_handler;

/// **Global Application State**
///
/// Shared by every connected client.
/// - `session`: the one monitoring session all sensor feeds and UI commands go to.
/// - `flag`: the replicated Safety-Flag; other contexts raise it through `/api/safe`.
/// - `sink`: where escalations go, and the history source when a database is configured.
pub struct AppState {
    pub session: SessionHandle,
    pub flag: Arc<ReplicatedFlag>,
    pub sink: AlertSink,
    pub config: Config,
}

/// **GET /api/state**
///
/// Snapshot of the escalation state machine.
async fn get_state(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.snapshot())
}

/// **POST /api/safe/{store}**
///
/// Raises one Safety-Flag store (`safe_primary` or `safe_mirror`), the way a
/// separate process would. The session sees it on its next tick.
async fn raise_safe_flag(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let store = path.into_inner();
    match data.flag.raise(&store) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e) => {
            error!("could not raise safety flag via {}: {}", store, e);
            HttpResponse::BadRequest().body(e.to_string())
        }
    }
}

/// **GET /api/history**
///
/// Last 20 episode outcomes, newest first.
async fn get_history(data: web::Data<AppState>) -> impl Responder {
    let Some(db) = data.sink.database() else {
        return HttpResponse::ServiceUnavailable().body("No database configured");
    };
    match db.history(20).await {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(e) => {
            error!("database error: {}", e);
            HttpResponse::InternalServerError().body("Error fetching logs")
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load environment variables from .env file
    dotenv().ok();
    env_logger::init();
    let config = Config::from_env()?;

    // 2. Escalation sink (Postgres when configured)
    let sink = match &config.database_url {
        Some(url) => AlertSink::Postgres(PgAlertSink::connect(url).await?),
        None => {
            info!("DATABASE_URL not set, escalations are logged only");
            AlertSink::Log
        }
    };

    // 3. Safety-Flag stores and the monitoring session
    let flag = Arc::new(ReplicatedFlag::primary_and_mirror(&config.flag_dir));
    let wake_lock = Arc::new(CountingWakeLock::default());
    let (session, task) =
        MonitorSession::new(&config, flag.clone(), sink.clone(), wake_lock).spawn();

    let bind = (config.bind_addr.clone(), config.port);
    let app_state = web::Data::new(AppState {
        session: session.clone(),
        flag,
        sink,
        config,
    });

    info!("🚀 SYSTEM HEALTH: Server started at http://{}:{}", bind.0, bind.1);

    // 4. Start the HTTP Server
    HttpServer::new(move || {
        let cors = actix_cors::Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(app_state.clone())
            .route("/api/state", web::get().to(get_state))
            .route("/api/safe/{store}", web::post().to(raise_safe_flag))
            .route("/api/history", web::get().to(get_history))
            .route("/ws", web::get().to(ws_handler))
    })
    .bind(bind)?
    .run()
    .await?;

    // 5. Stop monitoring so the session releases its wake resources
    session.stop().await?;
    task.await?;
    Ok(())
}
