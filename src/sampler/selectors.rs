// ── Listing page ──────────────────────────────────────────────────────────────

/// Post links in the hashtag grid, most specific first. The grid markup
/// changes often, so several shapes are tried in turn.
pub const POST_LINK_SELECTORS: &[&str] = &[
    r#"article a[href*="/p/"]"#,
    r#"main a[href*="/p/"]"#,
    r#"a[href*="/p/"]"#,
    r#"a[href*="/reel/"]"#,
];

pub const NO_POSTS_MARKERS: &[&str] = &["No posts yet"];

// ── Post detail ───────────────────────────────────────────────────────────────

pub const TIME_SELECTORS: &[&str] = &["time[datetime]", "time", "article time", "a time"];

/// Where the date hides when there is no `<time>` element.
pub const DATE_TEXT_SELECTOR: &str = "article a, article span";

// ── Login wall ────────────────────────────────────────────────────────────────

pub const LOGIN_PATH: &str = "/accounts/login";

pub const LOGIN_WALL_MARKERS: &[&str] = &["Log in", "Sign up"];

pub fn is_login_redirect(url: &str) -> bool {
    url.contains(LOGIN_PATH)
}

/// Home page still asks the visitor to log in.
pub fn shows_login_wall(url: &str, html: &str) -> bool {
    is_login_redirect(url) || LOGIN_WALL_MARKERS.iter().any(|m| html.contains(m))
}

pub fn shows_no_posts(html: &str) -> bool {
    NO_POSTS_MARKERS.iter().any(|m| html.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_wall_detection() {
        assert!(shows_login_wall("https://www.instagram.com/accounts/login/?next=/", ""));
        assert!(shows_login_wall("https://www.instagram.com/", "<button>Log in</button>"));
        assert!(!shows_login_wall("https://www.instagram.com/", "<nav>Home</nav>"));
        assert!(is_login_redirect("https://www.instagram.com/accounts/login/"));
        assert!(!is_login_redirect("https://www.instagram.com/explore/tags/x/"));
    }
}
