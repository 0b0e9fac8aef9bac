use once_cell::sync::OnceCell;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use std::path::Path;

use crate::file_things::data_path;

// The real user/session layer lives outside this service. These guards
// check bearer tokens provisioned per deployment: one for the management
// UI, one for privileged operations, one handed to the kiosk display.
static MANAGE_TOKEN: OnceCell<String> = OnceCell::new();
static ADMIN_TOKEN: OnceCell<String> = OnceCell::new();
static DISPLAY_TOKEN: OnceCell<String> = OnceCell::new();

fn generate_token(seed: &str) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(&now.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

fn load_or_create_token(dir: &Path, file_name: &str, env_var: &str) -> Result<String, String> {
    if let Ok(token) = std::env::var(env_var) {
        let trimmed = token.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    let path = dir.join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(token) => Ok(token.trim().to_string()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let token = generate_token(file_name);
            std::fs::write(&path, &token).map_err(|e| format!("{}", e))?;
            println!("Generated {} in {}", file_name, dir.display());
            Ok(token)
        }
        Err(err) => Err(format!("{}: {}", path.display(), err)),
    }
}

pub fn manage_token() -> Result<String, String> {
    MANAGE_TOKEN
        .get_or_try_init(|| load_or_create_token(&data_path()?, ".manage_token", "MANAGE_TOKEN"))
        .map(|t| t.clone())
}

pub fn admin_token() -> Result<String, String> {
    ADMIN_TOKEN
        .get_or_try_init(|| load_or_create_token(&data_path()?, ".admin_token", "ADMIN_TOKEN"))
        .map(|t| t.clone())
}

pub fn display_token() -> Result<String, String> {
    DISPLAY_TOKEN
        .get_or_try_init(|| load_or_create_token(&data_path()?, ".display_token", "DISPLAY_TOKEN"))
        .map(|t| t.clone())
}

pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn request_token<'r>(request: &'r Request<'_>) -> Option<&'r str> {
    if let Some(header) = request.headers().get_one("Authorization") {
        if let Some(token) = parse_bearer(header) {
            return Some(token);
        }
    }
    request.headers().get_one("X-Api-Token")
}

/// Any management credential: the regular token or the admin one.
pub struct ManagerUser;

/// Privileged operations only: backfill, backup control, token readout.
pub struct AdminUser;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ManagerUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let provided = match request_token(request) {
            Some(token) => token,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        let accepted = [manage_token(), admin_token()]
            .into_iter()
            .flatten()
            .any(|expected| expected == provided);
        if accepted {
            Outcome::Success(ManagerUser)
        } else {
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let provided = match request_token(request) {
            Some(token) => token,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };
        match admin_token() {
            Ok(expected) if expected == provided => Outcome::Success(AdminUser),
            Ok(_) => Outcome::Error((Status::Forbidden, ())),
            Err(_) => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}
