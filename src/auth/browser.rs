//! Opening the authorization URL for the user.

/// Something that can show a URL to the user.
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`, returning an error if nothing could be launched.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error from the launcher.
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs in the system's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        tracing::debug!("Opening authorization URL in default browser");
        open::that(url)
    }
}
