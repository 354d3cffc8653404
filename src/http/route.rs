//! Fixed URL table of the site.
//!
//! | URL | Target |
//! |---|---|
//! | `/` | `/judge.html` |
//! | `/0` | `/register.html` |
//! | `/1` | `/log.html` |
//! | POST `/2…` | login check |
//! | POST `/3…` | registration |
//! | `/5` `/6` `/7` | `/picture.html`, `/video.html`, `/fans.html` |
//!
//! Anything else is looked up under the document root.

use super::request::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A fixed page under the document root.
    Page(&'static str),

    /// Check the posted credentials.
    Login,

    /// Register the posted credentials.
    Register,

    /// A path under the document root, as requested.
    Static(String),
}

pub fn route(method: Method, url: &str) -> Route {
    let path = url.split_once('?').map_or(url, |(path, _)| path);

    if method == Method::Post {
        if path.starts_with("/2") {
            return Route::Login;
        }
        if path.starts_with("/3") {
            return Route::Register;
        }
    }

    match path {
        "/" => Route::Page("/judge.html"),
        "/0" => Route::Page("/register.html"),
        "/1" => Route::Page("/log.html"),
        "/5" => Route::Page("/picture.html"),
        "/6" => Route::Page("/video.html"),
        "/7" => Route::Page("/fans.html"),
        _ => Route::Static(path.to_string()),
    }
}

/// Landing page after a login attempt.
pub fn login_page(accepted: bool) -> &'static str {
    if accepted { "/welcome.html" } else { "/logError.html" }
}

/// Landing page after a registration attempt.
pub fn register_page(inserted: bool) -> &'static str {
    if inserted { "/log.html" } else { "/registerError.html" }
}

/// Posted `user=<name>&passwd=<password>` pair.
#[derive(Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Parses a form body. Both fields must be present and the name must
    /// not be empty.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let body = std::str::from_utf8(body).ok()?;

        let mut user = None;
        let mut password = None;

        for pair in body.trim_end().split('&') {
            match pair.split_once('=') {
                Some(("user", value)) => user = Some(value),
                Some(("passwd", value)) => password = Some(value),
                _ => {}
            }
        }

        let user = user.filter(|user| !user.is_empty())?;

        Some(Self {
            user: user.to_string(),
            password: password?.to_string(),
        })
    }
}

/// Whether a path tries to climb out of the document root.
pub fn escapes_root(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}
