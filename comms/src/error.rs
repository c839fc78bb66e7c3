use std::{error::Error, fmt, io};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures talking to the marketplace backends.
#[derive(Debug)]
pub enum CommsErr {
    Http(reqwest::Error),
    Status { code: u16, body: String },
    Decode(serde_json::Error),
    Io(io::Error),
    Closed,
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Http(e) => write!(f, "http error: {e}"),
            CommsErr::Status { code, body } => write!(f, "unexpected status {code}: {body}"),
            CommsErr::Decode(e) => write!(f, "malformed payload: {e}"),
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::Closed => write!(f, "channel closed"),
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Http(e) => Some(e),
            CommsErr::Decode(e) => Some(e),
            CommsErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CommsErr {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<serde_json::Error> for CommsErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value)
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Turns a non-success response into `CommsErr::Status`, keeping the body for the log.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(CommsErr::Status {
        code: status.as_u16(),
        body,
    })
}
