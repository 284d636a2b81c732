use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream returned status {status}")]
    Upstream { status: u16 },

    #[error("session cookies rejected, reconfigure the account")]
    AuthExpired,

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::AuthExpired)
    }

    /// Anything the next scheduled tick may fix on its own.
    pub fn is_transient(&self) -> bool {
        !self.is_auth()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("account {account:?} is not ready: {reason}")]
    NotReady { account: String, reason: String },
}

impl SetupError {
    pub fn not_ready(account: &str, reason: impl ToString) -> Self {
        SetupError::NotReady {
            account: account.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(FetchError::AuthExpired.is_auth());
        assert!(!FetchError::AuthExpired.is_transient());
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Upstream { status: 502 }.is_transient());
        assert!(FetchError::Parse("bad".into()).is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn test_setup_error_message() {
        let err = SetupError::not_ready("alice", FetchError::AuthExpired);
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("rejected"));
    }
}
