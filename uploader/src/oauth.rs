//! OAuth 2.0 for the YouTube Data API.
//!
//! Covers the one-time installed-app authorization an operator runs to create
//! the credential file, and the unattended refresh the pipeline relies on
//! afterwards.

use crate::credentials::{Credential, TokenRefresher};
use async_trait::async_trait;
use eyre::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use jiff::{SignedDuration, Timestamp};
use oauth2::basic::{BasicClient, BasicTokenResponse, BasicTokenType};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::future::Future;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Used for both the initial code exchange and refreshes.
const TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v3/token";

pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

const OAUTH_DONE_HTML: &str = "<!doctype html><html><body>\
    <p>Authorization complete. You can close this window.</p>\
    </body></html>";

/// Token lifetime assumed when the provider does not say.
const DEFAULT_LIFETIME: SignedDuration = SignedDuration::from_secs(3600);

#[derive(Clone)]
pub struct OAuthManager {
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for OAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthManager")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuthManager {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn http_client() -> eyre::Result<oauth2::reqwest::Client> {
        oauth2::reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")
    }

    /// Runs the full installed-app flow: opens the user's browser on the
    /// consent page, receives the code on a loopback redirect, and exchanges it.
    pub async fn authenticate(&self) -> eyre::Result<Credential> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(AUTH_URL.to_string()).context("authorization URL")?)
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).context("token URL")?)
            .set_redirect_uri(redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // the flow runs exactly once, so the CSRF token is never re-used
            .authorize_url(move || csrf.clone())
            .add_scope(Scope::new(UPLOAD_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            tracing::warn!("could not open a browser ({}), open the URL above manually", e);
        }
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let token = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&Self::http_client()?)
            .await
            .context("exchange authorization code for access token")?;

        Ok(credential_from_response(&token, None))
    }
}

#[async_trait]
impl TokenRefresher for OAuthManager {
    async fn refresh(&self, credential: &Credential) -> eyre::Result<Option<Credential>> {
        let Some(refresh_token) = &credential.refresh_token else {
            return Ok(None);
        };

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(TokenUrl::new(TOKEN_URL.to_string()).context("token URL")?);

        match client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&Self::http_client()?)
            .await
        {
            Ok(token) => Ok(Some(credential_from_response(&token, Some(credential)))),
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }
}

/// Converts a token endpoint response into the persisted credential shape.
///
/// Fields the provider omitted on refresh (scope, refresh token) are carried
/// over from `previous`.
fn credential_from_response(token: &BasicTokenResponse, previous: Option<&Credential>) -> Credential {
    let lifetime = token
        .expires_in()
        .and_then(|d| SignedDuration::try_from(d).ok())
        .unwrap_or(DEFAULT_LIFETIME);
    let now = Timestamp::now();
    let expiry = now.checked_add(lifetime).unwrap_or(now);

    let scope = match token.scopes() {
        Some(scopes) => scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        None => previous
            .map(|p| p.scope.clone())
            .unwrap_or_else(|| UPLOAD_SCOPE.to_string()),
    };

    let token_type = match token.token_type() {
        BasicTokenType::Bearer => "Bearer".to_string(),
        BasicTokenType::Mac => "MAC".to_string(),
        BasicTokenType::Extension(other) => other.clone(),
    };

    Credential {
        access_token: token.access_token().secret().clone(),
        refresh_token: token
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        scope,
        token_type,
        expiry,
    }
}

/// Starts a one-shot HTTP server on a random loopback port that receives the
/// OAuth redirect, checks the CSRF state, and yields the authorization code.
async fn setup_redirect(
    csrf: CsrfToken,
) -> eyre::Result<(
    RedirectUrl,
    impl Future<Output = eyre::Result<AuthorizationCode>>,
)> {
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind to localhost")?;
    let addr = socket.local_addr().context("get local address")?;
    let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
        .context("construct redirect url")?;
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let r = async move {
            let (conn, _) = socket.accept().await.context("accept")?;
            let conn = hyper_util::rt::TokioIo::new(conn);
            let (got, mut gotten) = tokio::sync::mpsc::channel(1);
            let service = service_fn(move |req: Request<body::Incoming>| {
                let csrf = csrf.clone();
                let got = got.clone();
                async move {
                    let mut presented_state = None;
                    let mut presented_code = None;
                    for (k, v) in form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                    {
                        match &*k {
                            "state" => presented_state = Some(v),
                            "code" => presented_code = Some(v),
                            _ => {}
                        }
                    }
                    if presented_state.as_deref() != Some(csrf.secret().as_str()) {
                        return Err("invalid csrf token");
                    }
                    let Some(code) = presented_code else {
                        return Err("no authorization code found");
                    };
                    if got
                        .send(AuthorizationCode::new(code.into_owned()))
                        .await
                        .is_err()
                    {
                        return Err("authorization flow no longer waiting");
                    }
                    Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE_HTML)))
                }
            });
            let mut serve = std::pin::pin!(
                hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
            );

            tokio::select! {
                exit = &mut serve => {
                    if let Err(e) = exit {
                        Err(e).context("redirect server got bad request")
                    } else {
                        eyre::bail!("redirect server exit prematurely");
                    }
                }
                code = gotten.recv() => {
                    serve.as_mut().graceful_shutdown();
                    code.ok_or_else(|| eyre::eyre!("redirect handler dropped without a code"))
                }
            }
        };
        let _ = tx.send(r.await);
    });
    Ok((url, async move {
        rx.await.context("redirect future dropped prematurely")?
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::{AccessToken, EmptyExtraTokenFields};
    use std::time::Duration;

    fn response(refresh: Option<&str>, scopes: Option<Vec<&str>>) -> BasicTokenResponse {
        let mut token = BasicTokenResponse::new(
            AccessToken::new("access".into()),
            BasicTokenType::Bearer,
            EmptyExtraTokenFields {},
        );
        token.set_expires_in(Some(&Duration::from_secs(3599)));
        token.set_refresh_token(refresh.map(|r| RefreshToken::new(r.into())));
        token.set_scopes(scopes.map(|s| s.into_iter().map(|s| Scope::new(s.into())).collect()));
        token
    }

    #[test]
    fn fresh_authorization_response() {
        let c = credential_from_response(&response(Some("r1"), Some(vec![UPLOAD_SCOPE])), None);
        assert_eq!(c.access_token, "access");
        assert_eq!(c.refresh_token.as_deref(), Some("r1"));
        assert_eq!(c.scope, UPLOAD_SCOPE);
        assert_eq!(c.token_type, "Bearer");
        assert!(c.expiry > Timestamp::now());
    }

    #[test]
    fn refresh_response_keeps_previous_fields() {
        let previous = credential_from_response(
            &response(Some("r1"), Some(vec!["a", "b"])),
            None,
        );
        assert_eq!(previous.scope, "a b");
        let c = credential_from_response(&response(None, None), Some(&previous));
        assert_eq!(c.refresh_token.as_deref(), Some("r1"));
        assert_eq!(c.scope, "a b");
    }
}
