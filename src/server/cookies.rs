//! Session cookie handling
//!
//! Three cookies per session: the access and refresh tokens are HttpOnly,
//! the anti-forgery token is readable so the client can echo it in a
//! header. All are SameSite=Lax on `/`, Secure only behind https.

use crate::auth::SessionTokens;
use crate::config::Settings;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

fn base_cookie(name: &str, value: String, secure: bool, http_only: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .path("/")
        .same_site(SameSite::Lax)
        .secure(secure)
        .http_only(http_only)
        .build()
}

/// Install the full cookie triple for a freshly issued session.
pub fn set_session_cookies(jar: CookieJar, tokens: &SessionTokens, settings: &Settings) -> CookieJar {
    let secure = settings.cookies_secure();

    let mut access = base_cookie(
        &settings.access_cookie_name,
        tokens.access_token.clone(),
        secure,
        true,
    );
    access.set_max_age(Duration::minutes(settings.access_ttl_minutes));

    let mut refresh = base_cookie(
        &settings.refresh_cookie_name,
        tokens.refresh_token.clone(),
        secure,
        true,
    );
    // Without "remember me" the refresh cookie dies with the browser session.
    if tokens.remember_me {
        refresh.set_max_age(Duration::days(settings.refresh_ttl_days));
    }

    let mut csrf = base_cookie(
        &settings.csrf_cookie_name,
        tokens.csrf_token.clone(),
        secure,
        false,
    );
    if tokens.remember_me {
        csrf.set_max_age(Duration::days(settings.refresh_ttl_days));
    }

    jar.add(access).add(refresh).add(csrf)
}

/// Expire all three session cookies.
pub fn clear_session_cookies(jar: CookieJar, settings: &Settings) -> CookieJar {
    let secure = settings.cookies_secure();
    let expire = |name: &str, http_only: bool| {
        let mut cookie = base_cookie(name, String::new(), secure, http_only);
        cookie.set_max_age(Duration::ZERO);
        cookie
    };
    jar.add(expire(&settings.access_cookie_name, true))
        .add(expire(&settings.refresh_cookie_name, true))
        .add(expire(&settings.csrf_cookie_name, false))
}
