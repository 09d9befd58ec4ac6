//! OAuth2 authentication for the Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;
use yup_oauth2::InstalledFlowReturnMethod;

use crate::error::{GmailError, Result};

/// Read access to messages and attachments
pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
/// Read/write access without permanent deletion
pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
/// Full mailbox access; `messages.delete` refuses anything less
pub const FULL_ACCESS_SCOPE: &str = "https://mail.google.com/";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// How to obtain a token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthOptions {
    /// Print the consent URL and read the code from stdin instead of
    /// opening a browser with a local redirect listener
    pub no_browser: bool,
    /// Request the full-access scope needed for deleting messages
    pub allow_delete: bool,
}

/// Scopes requested for a run
pub fn scopes_for(allow_delete: bool) -> Vec<&'static str> {
    let mut scopes = vec![READONLY_SCOPE, MODIFY_SCOPE];
    if allow_delete {
        scopes.push(FULL_ACCESS_SCOPE);
    }
    scopes
}

/// Initialize Gmail API hub with OAuth2 authentication
///
/// Tokens are persisted to `token_cache_path` and refreshed automatically.
/// The first run walks the user through the installed-app consent flow.
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
    options: &AuthOptions,
) -> Result<GmailHub> {
    if !credentials_path.exists() {
        return Err(GmailError::AuthError(format!(
            "Credentials file {:?} not found. Download an OAuth client (Desktop app) from the Google Cloud Console.",
            credentials_path
        )));
    }

    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e)))?;

    if let Some(parent) = token_cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let method = if options.no_browser {
        InstalledFlowReturnMethod::Interactive
    } else {
        InstalledFlowReturnMethod::HTTPRedirect
    };

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(secret, method)
        .persist_tokens_to_disk(token_cache_path)
        .build()
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Obtain the token up front so the consent prompt happens before any download output
    let scopes = scopes_for(options.allow_delete);
    auth.token(&scopes)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    // HTTP/1 only; google-gmail1 is more reliable over it
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Restrict the token cache to the owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    // Windows relies on the profile directory ACLs
    Ok(())
}
