use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::database::Database;
use crate::db::models::{ChatSettings, ChatStatRow, SettingsChange};
use crate::styles::transform::escape_html;

/// Admin id recorded in the admin log for dashboard edits.
pub const DASHBOARD_ADMIN_ID: i64 = 0;
const STATS_ROW_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct DashboardState {
    pub db: Database,
    /// Required `token` value when set.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    pub chat_id: i64,
    #[serde(default)]
    pub welcome_message: String,
    /// Checkbox; present only when ticked.
    pub spam_filter: Option<String>,
    pub token: Option<String>,
}

impl DashboardState {
    fn authorize(&self, presented: Option<&str>) -> Result<(), StatusCode> {
        match self.token.as_deref() {
            Some(expected) if presented != Some(expected) => Err(StatusCode::UNAUTHORIZED),
            _ => Ok(()),
        }
    }

    fn token_query(&self) -> String {
        self.token
            .as_deref()
            .map(|token| {
                let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
                format!("?token={encoded}")
            })
            .unwrap_or_default()
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/settings", post(update_settings))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn index(State(state): State<DashboardState>, Query(query): Query<TokenQuery>) -> Response {
    if let Err(status) = state.authorize(query.token.as_deref()) {
        return status.into_response();
    }

    let stats = state.db.all_chat_stats(STATS_ROW_LIMIT).await;
    let settings = state.db.all_chat_settings().await;
    match (stats, settings) {
        (Ok(stats), Ok(settings)) => {
            Html(render_page(&stats, &settings, state.token.as_deref())).into_response()
        }
        (Err(err), _) | (_, Err(err)) => {
            error!("Dashboard query failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn update_settings(
    State(state): State<DashboardState>,
    Form(form): Form<SettingsForm>,
) -> Response {
    if let Err(status) = state.authorize(form.token.as_deref()) {
        return status.into_response();
    }

    let welcome = Some(form.welcome_message.trim().to_string()).filter(|text| !text.is_empty());
    let changes = [
        SettingsChange::WelcomeMessage(welcome),
        SettingsChange::SpamFilter(form.spam_filter.is_some()),
    ];
    match state
        .db
        .update_chat_settings(DASHBOARD_ADMIN_ID, form.chat_id, &changes)
        .await
    {
        Ok(_) => {
            info!("Dashboard updated settings for chat {}", form.chat_id);
            Redirect::to(&format!("/{}", state.token_query())).into_response()
        }
        Err(err) => {
            error!("Dashboard settings update failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn render_page(stats: &[ChatStatRow], settings: &[ChatSettings], token: Option<&str>) -> String {
    let mut html = String::from(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>TextStyler dashboard</title>\
         <style>body{font-family:sans-serif;margin:2em}table{border-collapse:collapse;margin-bottom:2em}\
         td,th{border:1px solid #ccc;padding:4px 8px}</style></head><body>",
    );

    html.push_str("<h1>Chat statistics</h1><table><tr><th>Chat</th><th>User</th><th>Name</th><th>Messages</th><th>Last seen</th></tr>");
    for row in stats {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            row.chat_id,
            row.user_id,
            escape_html(row.display_name.as_deref().unwrap_or("")),
            row.message_count,
            row.last_seen.format("%Y-%m-%d %H:%M")
        ));
    }
    html.push_str("</table>");

    let token_field = token
        .map(|token| {
            format!(
                "<input type=\"hidden\" name=\"token\" value=\"{}\">",
                escape_html(token)
            )
        })
        .unwrap_or_default();

    html.push_str("<h1>Chat settings</h1><table><tr><th>Chat</th><th>CAPTCHA</th><th>Mode</th><th>Welcome message</th><th>Spam filter</th><th></th></tr>");
    for chat in settings {
        html.push_str(&format!(
            "<tr><form method=\"post\" action=\"/settings\">\
             <td>{chat_id}<input type=\"hidden\" name=\"chat_id\" value=\"{chat_id}\">{token_field}</td>\
             <td>{captcha}</td><td>{mode}</td>\
             <td><input type=\"text\" name=\"welcome_message\" value=\"{welcome}\"></td>\
             <td><input type=\"checkbox\" name=\"spam_filter\"{checked}></td>\
             <td><button type=\"submit\">Save</button></td></form></tr>",
            chat_id = chat.chat_id,
            captcha = if chat.captcha_enabled { "on" } else { "off" },
            mode = chat.captcha_mode,
            welcome = escape_html(chat.welcome_message.as_deref().unwrap_or("")),
            checked = if chat.spam_filter { " checked" } else { "" },
        ));
    }
    html.push_str("</table>");

    html.push_str(&format!(
        "<h2>Add chat</h2><form method=\"post\" action=\"/settings\">{token_field}\
         Chat id <input type=\"number\" name=\"chat_id\" required> \
         Welcome <input type=\"text\" name=\"welcome_message\"> \
         Spam filter <input type=\"checkbox\" name=\"spam_filter\"> \
         <button type=\"submit\">Save</button></form></body></html>"
    ));
    html
}

pub async fn serve(db: Database, addr: SocketAddr, token: Option<String>) -> Result<()> {
    let app = router(DashboardState { db, token });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
