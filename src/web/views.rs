//! Server-rendered HTML pages.

use std::fmt::Write;

use crate::auth::claims::Principal;
use crate::profile::ProfileView;

const STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: flex-start;
            justify-content: center;
            padding: 3rem 1rem;
        }
        .container {
            background: white;
            padding: 2.5rem;
            border-radius: 1rem;
            box-shadow: 0 25px 50px -12px rgba(0, 0, 0, 0.25);
            width: 100%;
            max-width: 760px;
        }
        nav { margin-bottom: 1.5rem; font-size: 0.875rem; }
        nav a { color: #667eea; margin-right: 1rem; text-decoration: none; }
        h1 { color: #1F2937; font-size: 1.5rem; margin-bottom: 0.5rem; }
        h2 { color: #1F2937; font-size: 1.125rem; margin: 1.5rem 0 0.5rem; }
        p { color: #6B7280; margin-bottom: 1rem; }
        table { width: 100%; border-collapse: collapse; font-size: 0.875rem; }
        th, td { text-align: left; padding: 0.4rem 0.5rem; border-bottom: 1px solid #E5E7EB; }
        th { color: #374151; }
        td { color: #4B5563; word-break: break-all; }
        ul { margin-left: 1.25rem; color: #4B5563; }
        .photo { width: 96px; height: 96px; border-radius: 50%; object-fit: cover; float: right; }
        .hint { font-size: 0.875rem; color: #9CA3AF; }
        .error { color: #EF4444; }
        code { background: #F3F4F6; padding: 0.5rem; border-radius: 0.25rem; display: block; font-size: 0.75rem; color: #374151; }
"#;

/// Escape text for safe inclusion in HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, user: Option<&str>, content: &str) -> String {
    let nav = match user {
        Some(name) => format!(
            r#"<nav><a href="/">Claims</a><a href="/profile">Profile</a><a href="/privacy">Privacy</a><a href="/signout">Sign out ({})</a></nav>"#,
            escape_html(name)
        ),
        None => r#"<nav><a href="/signin">Sign in</a></nav>"#.to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="container">
        {nav}
        {content}
    </div>
</body>
</html>"#,
        title = escape_html(title),
    )
}

/// Home page: every claim of the signed-in principal.
pub fn claims_page(principal: &Principal) -> String {
    let mut rows = String::new();
    for (name, value) in &principal.claims {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(name),
            escape_html(value)
        );
    }

    let content = format!(
        r#"<h1>Welcome, {}</h1>
        <p>Claims from your ID token.</p>
        <table><thead><tr><th>Claim</th><th>Value</th></tr></thead><tbody>{}</tbody></table>"#,
        escape_html(principal.display_name()),
        rows
    );
    layout("Claims", Some(principal.display_name()), &content)
}

pub fn profile_page(principal: &Principal, view: &ProfileView) -> String {
    let mut content = String::new();

    if let Some(photo) = &view.photo_base64 {
        let _ = write!(
            content,
            r#"<img class="photo" alt="Profile photo" src="data:image/jpeg;base64,{}">"#,
            escape_html(photo)
        );
    }

    let _ = write!(
        content,
        "<h1>{}</h1><table><tbody>",
        escape_html(&view.me.display_name_or_upn())
    );
    let details = [
        ("Email", Some(view.me.email())),
        ("Job title", view.me.job_title.clone()),
        ("Office", view.me.office_location.clone()),
        ("Object ID", Some(view.me.id.clone())),
    ];
    for (label, value) in details {
        if let Some(value) = value {
            let _ = write!(
                content,
                "<tr><th>{}</th><td>{}</td></tr>",
                label,
                escape_html(&value)
            );
        }
    }
    content.push_str("</tbody></table>");

    content.push_str("<h2>Groups</h2>");
    if view.group_names.is_empty() {
        content.push_str(r#"<p class="hint">No matching groups.</p>"#);
    } else {
        content.push_str("<ul>");
        for name in &view.group_names {
            let _ = write!(content, "<li>{}</li>", escape_html(name));
        }
        content.push_str("</ul>");
    }

    if let Some(group) = &view.selected_group {
        let _ = write!(
            content,
            "<h2>Members of {}</h2>",
            escape_html(group.name_or_id())
        );
        if let Some(count) = view.member_count {
            let _ = write!(content, r#"<p class="hint">{} members in total</p>"#, count);
        }
        content.push_str("<ul>");
        for member in &view.members {
            let _ = write!(content, "<li>{}</li>", escape_html(&member.display_name));
        }
        content.push_str("</ul>");
        if !view.skipped_members.is_empty() {
            let _ = write!(
                content,
                r#"<p class="hint">{} non-user members not shown.</p>"#,
                view.skipped_members.len()
            );
        }
    }

    layout("Profile", Some(principal.display_name()), &content)
}

pub fn privacy_page(principal: &Principal) -> String {
    layout(
        "Privacy",
        Some(principal.display_name()),
        "<h1>Privacy</h1><p>This page is only visible to members of the App.Role.2 role.</p>",
    )
}

/// Generic error page. Never shows upstream error detail.
pub fn error_page(message: &str, request_id: &str) -> String {
    let content = format!(
        r#"<h1 class="error">Error</h1>
        <p>{}</p>
        <p class="hint">Request ID:</p>
        <code>{}</code>"#,
        escape_html(message),
        escape_html(request_id)
    );
    layout("Error", None, &content)
}
