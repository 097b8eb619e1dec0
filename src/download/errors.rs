pub type Result<T> = std::result::Result<T, DownloadError>;

#[derive(Debug)]
pub enum DownloadError {
    /// A download session is one-shot; `start` was called on a session that
    /// already ran or was stopped.
    AlreadyStarted,
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "download session already started"),
        }
    }
}

impl std::error::Error for DownloadError {}
