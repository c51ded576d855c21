use crate::AppState;
use actix_web::{web, HttpRequest, Responder};
use actix_ws::Message;
use crashguard::model::{ClientCommand, SensorSample};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<impl Responder, actix_web::Error> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let mut rx = data.session.subscribe();
    let monitor = data.session.clone();
    let default_countdown = data.config.countdown.seconds();

    // Every connection feeds the one shared monitoring session
    actix_rt::spawn(async move {
        loop {
            tokio::select! {
                val = msg_stream.next() => {
                    match val {
                        Some(Ok(Message::Text(text))) => {
                            // 1. Try Command
                            let result = if let Ok(cmd) = serde_json::from_str::<ClientCommand>(&text) {
                                match cmd.action.as_str() {
                                    "USER_SAFE" | "CANCEL_ALERT" => {
                                        info!("user marked safe from UI");
                                        monitor.cancel().await
                                    }
                                    "START_COUNTDOWN" => {
                                        let seconds = cmd.duration.unwrap_or(i64::from(default_countdown));
                                        monitor.start_countdown(seconds).await
                                    }
                                    other => {
                                        warn!("unknown command: {}", other);
                                        Ok(())
                                    }
                                }
                            }
                            // 2. Try Sensor Data
                            else if let Ok(sample) = serde_json::from_str::<SensorSample>(&text) {
                                monitor.feed(sample).await
                            } else {
                                debug!("received unknown format: {}", text);
                                Ok(())
                            };

                            if let Err(e) = result {
                                let reply = serde_json::json!({ "type": "ERROR", "reason": e.to_string() });
                                let _ = session.text(reply.to_string()).await;
                            }
                        }
                        Some(Ok(Message::Ping(bytes))) => {
                            let _ = session.pong(&bytes).await;
                        }
                        Some(Ok(Message::Close(_))) => break,
                        None => break,
                        _ => {}
                    }
                }
                val = rx.recv() => {
                    match val {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("websocket observer lagged, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        let _ = session.close(None).await;
    });

    Ok(res)
}
