//! [`UploadPage`] backed by a WebDriver server (chromedriver or similar).

use super::{AuthState, PageError, PageLauncher, UploadPage};
use crate::job::{VideoMetadata, VideoType};
use crate::session::{Session, SessionCookie};
use async_trait::async_trait;
use fantoccini::cookies::Cookie;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use std::path::Path;
use std::time::Duration;

const SITE_ORIGIN: &str = "https://www.youtube.com";
const UPLOAD_URL: &str = "https://www.youtube.com/upload";
const LOGIN_HOST: &str = "accounts.google.com";

const FILE_INPUT: &str = "input[type='file']";
const TITLE_BOX: &str = "#title-textarea #textbox";
const DESCRIPTION_BOX: &str = "#description-textarea #textbox";
const NOT_MADE_FOR_KIDS: &str = "tp-yt-paper-radio-button[name='VIDEO_MADE_FOR_KIDS_NOT_MFK']";
const NEXT_BUTTON: &str = "#next-button";
const PUBLIC_RADIO: &str = "tp-yt-paper-radio-button[name='PUBLIC']";
const VIDEO_LINK: &str = "span.video-url-fadeable a";
const DONE_BUTTON: &str = "#done-button";
const PUBLISHED_DIALOG: &str = "ytcp-video-share-dialog, ytcp-uploads-still-processing-dialog";

/// Details, video elements and checks all sit between metadata and visibility.
const WIZARD_PAGES: usize = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn page_error(what: &str, err: CmdError) -> PageError {
    match err {
        CmdError::WaitTimeout => PageError::Timeout(what.to_string()),
        e if e.is_no_such_element() => PageError::ElementNotFound(what.to_string()),
        e => PageError::Navigation(format!("{what}: {e}")),
    }
}

/// Once Done has been clicked the video is live, so a missing confirmation
/// dialog must not turn into a failure that would get the job uploaded again.
fn published_after_done(remote_id: String, confirmation: Result<(), PageError>) -> String {
    if let Err(e) = confirmation {
        tracing::warn!(%remote_id, "publish confirmation did not show after Done: {}", e);
    }
    remote_id
}

/// Extracts the video id from the share link the upload dialog shows.
fn video_id_from_link(link: &str) -> Option<String> {
    let (_, rest) = link.trim().split_once("://")?;
    let (_, path_and_query) = rest.split_once('/')?;
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));
    let id = if path == "watch" {
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())?
    } else {
        path.trim_end_matches('/').rsplit('/').next()?.to_string()
    };
    (!id.is_empty()).then_some(id)
}

fn to_session_cookie(cookie: &Cookie<'_>) -> SessionCookie {
    SessionCookie {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie.domain().map(str::to_owned),
        path: cookie.path().map(str::to_owned),
        secure: cookie.secure(),
        http_only: cookie.http_only(),
    }
}

fn to_webdriver_cookie(cookie: &SessionCookie) -> Cookie<'static> {
    let mut c = Cookie::new(cookie.name.clone(), cookie.value.clone());
    if let Some(domain) = &cookie.domain {
        c.set_domain(domain.clone());
    }
    if let Some(path) = &cookie.path {
        c.set_path(path.clone());
    }
    if let Some(secure) = cookie.secure {
        c.set_secure(secure);
    }
    if let Some(http_only) = cookie.http_only {
        c.set_http_only(http_only);
    }
    c
}

/// Starts Chrome sessions on a WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    webdriver_url: String,
    headless: bool,
    step_timeout: Duration,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: impl Into<String>, headless: bool, step_timeout: Duration) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            headless,
            step_timeout,
        }
    }
}

#[async_trait]
impl PageLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn UploadPage>, PageError> {
        let mut args = vec!["--window-size=1280,900", "--lang=en-US"];
        if self.headless {
            args.extend(["--headless=new", "--disable-gpu"]);
        }
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": args }),
        );

        let mut builder = ClientBuilder::native();
        builder.capabilities(caps);
        let client = builder
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| PageError::Driver(format!("connect to {}: {e}", self.webdriver_url)))?;
        tracing::debug!(url = %self.webdriver_url, headless = self.headless, "started WebDriver session");

        Ok(Box::new(WebDriverPage {
            client,
            step_timeout: self.step_timeout,
            closed: false,
        }))
    }
}

struct WebDriverPage {
    client: Client,
    step_timeout: Duration,
    closed: bool,
}

impl WebDriverPage {
    async fn wait_for(&self, what: &str, selector: &str) -> Result<fantoccini::elements::Element, PageError> {
        self.client
            .wait()
            .at_most(self.step_timeout)
            .every(POLL_INTERVAL)
            .for_element(Locator::Css(selector))
            .await
            .map_err(|e| page_error(what, e))
    }

    async fn click(&self, what: &str, selector: &str) -> Result<(), PageError> {
        self.wait_for(what, selector)
            .await?
            .click()
            .await
            .map_err(|e| page_error(what, e))
    }

    async fn replace_text(&self, what: &str, selector: &str, text: &str) -> Result<(), PageError> {
        let field = self.wait_for(what, selector).await?;
        field.clear().await.map_err(|e| page_error(what, e))?;
        field.send_keys(text).await.map_err(|e| page_error(what, e))
    }
}

#[async_trait]
impl UploadPage for WebDriverPage {
    async fn restore_session(&mut self, session: &Session) -> Result<(), PageError> {
        // cookies can only be set for the origin currently loaded
        self.client
            .goto(SITE_ORIGIN)
            .await
            .map_err(|e| page_error("site origin", e))?;
        for cookie in &session.cookies {
            self.client
                .add_cookie(to_webdriver_cookie(cookie))
                .await
                .map_err(|e| page_error("restore cookie", e))?;
        }
        Ok(())
    }

    async fn open_upload_surface(&mut self) -> Result<(), PageError> {
        self.client
            .goto(UPLOAD_URL)
            .await
            .map_err(|e| page_error("upload page", e))
    }

    async fn detect_authentication(&mut self) -> Result<AuthState, PageError> {
        loop {
            let url = self
                .client
                .current_url()
                .await
                .map_err(|e| page_error("current url", e))?;
            if url.host_str() == Some(LOGIN_HOST) {
                return Ok(AuthState::LoginRequired);
            }
            match self.client.find(Locator::Css(FILE_INPUT)).await {
                Ok(_) => return Ok(AuthState::Authenticated),
                Err(e) if e.is_no_such_element() => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => return Err(page_error("upload form", e)),
            }
        }
    }

    async fn attach_media(&mut self, path: &Path) -> Result<(), PageError> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| PageError::Rejected(format!("media {}: {e}", path.display())))?;
        let input = self.wait_for("file picker", FILE_INPUT).await?;
        input
            .send_keys(&path.to_string_lossy())
            .await
            .map_err(|e| page_error("file picker", e))
    }

    async fn fill_metadata(
        &mut self,
        metadata: &VideoMetadata,
        video_type: VideoType,
    ) -> Result<(), PageError> {
        self.replace_text("title field", TITLE_BOX, metadata.title.trim())
            .await?;
        if !metadata.description.is_empty() {
            self.replace_text("description field", DESCRIPTION_BOX, &metadata.description)
                .await?;
        }
        self.click("audience setting", NOT_MADE_FOR_KIDS).await?;
        for _ in 0..WIZARD_PAGES {
            self.click("next button", NEXT_BUTTON).await?;
        }
        self.click("visibility setting", PUBLIC_RADIO).await?;
        tracing::debug!(%video_type, "filled upload form");
        Ok(())
    }

    async fn submit(&mut self) -> Result<String, PageError> {
        let link = self.wait_for("video link", VIDEO_LINK).await?;
        let href = link
            .attr("href")
            .await
            .map_err(|e| page_error("video link", e))?
            .ok_or_else(|| PageError::ElementNotFound("video link href".into()))?;
        let remote_id = video_id_from_link(&href)
            .ok_or_else(|| PageError::Navigation(format!("unrecognized video link {href}")))?;

        self.click("done button", DONE_BUTTON).await?;
        let confirmation = self
            .wait_for("publish confirmation", PUBLISHED_DIALOG)
            .await
            .map(drop);
        Ok(published_after_done(remote_id, confirmation))
    }

    async fn capture_session(&mut self) -> Result<Session, PageError> {
        let cookies = self
            .client
            .get_all_cookies()
            .await
            .map_err(|e| page_error("cookies", e))?;
        Ok(Session::new(cookies.iter().map(to_session_cookie).collect()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.client.clone().close().await {
            tracing::warn!("could not close WebDriver session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_ids_from_share_links() {
        assert_eq!(
            video_id_from_link("https://youtu.be/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_id_from_link("https://youtube.com/shorts/abc123DEF45").as_deref(),
            Some("abc123DEF45")
        );
        assert_eq!(
            video_id_from_link("https://www.youtube.com/watch?v=xyz&t=1").as_deref(),
            Some("xyz")
        );
        assert_eq!(video_id_from_link("https://youtu.be/"), None);
        assert_eq!(video_id_from_link(""), None);
    }

    #[test]
    fn cookies_survive_conversion() {
        let stored = SessionCookie {
            name: "SID".into(),
            value: "v".into(),
            domain: Some("www.youtube.com".into()),
            path: Some("/".into()),
            secure: Some(true),
            http_only: Some(true),
        };
        let back = to_session_cookie(&to_webdriver_cookie(&stored));
        assert_eq!(back, stored);
    }

    #[test]
    fn wait_timeouts_map_to_timeout() {
        assert_eq!(
            page_error("title field", CmdError::WaitTimeout),
            PageError::Timeout("title field".into())
        );
    }

    #[test]
    fn missing_confirmation_after_done_still_publishes() {
        assert_eq!(
            published_after_done(
                "abc123".into(),
                Err(PageError::Timeout("publish confirmation".into()))
            ),
            "abc123"
        );
        assert_eq!(published_after_done("abc123".into(), Ok(())), "abc123");
    }
}
