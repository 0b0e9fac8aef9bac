use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::serde::Serialize;

/// Everything a request handler or background job can fail with.
///
/// Validation and NotFound carry messages safe to show any caller.
/// Storage and collaborator failures keep their detail for the logs and are
/// replaced with a generic message on the wire.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("a backup or restore is already in progress")]
    AlreadyRunning,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{0} unavailable: {1}")]
    CollaboratorUnavailable(&'static str, String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::StorageUnavailable(format!("{}", err))
    }

    pub fn status(&self) -> Status {
        match self {
            Error::Validation(_) => Status::BadRequest,
            Error::NotFound(_) => Status::NotFound,
            Error::AlreadyRunning => Status::Conflict,
            Error::StorageUnavailable(_) => Status::InternalServerError,
            Error::CollaboratorUnavailable(_, _) => Status::BadGateway,
        }
    }

    /// The message sent over the wire. Internal failure detail stays out of
    /// responses and goes to the log instead.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(_) | Error::NotFound(_) | Error::AlreadyRunning => format!("{}", self),
            Error::StorageUnavailable(_) => "storage unavailable".to_string(),
            Error::CollaboratorUnavailable(name, _) => format!("{} unavailable", name),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r> rocket::response::Responder<'r, 'static> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        match self {
            Error::StorageUnavailable(_) | Error::CollaboratorUnavailable(_, _) => {
                eprintln!("Request {} failed: {}", req.uri(), self)
            }
            _ => {}
        }
        let body = Json(ErrorBody {
            error: self.public_message(),
        });
        (self.status(), body).respond_to(req)
    }
}
