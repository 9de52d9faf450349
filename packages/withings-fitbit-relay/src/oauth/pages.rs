//! HTML pages shown during the authorization handshake.

use axum::response::Html;

use crate::store::Provider;

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #f5f7fa;
            color: #1f2933;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
            margin: 0;
        }
        .container {
            text-align: center;
            max-width: 420px;
        }
        a.button {
            display: inline-block;
            margin-top: 20px;
            padding: 12px 24px;
            border-radius: 8px;
            background: #00b0b9;
            color: #fff;
            text-decoration: none;
        }
        .error {
            background: #fde8e8;
            padding: 12px 20px;
            border-radius: 8px;
            font-family: monospace;
        }"#;

fn page(title: &str, content: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>{STYLE}
    </style>
</head>
<body>
    <div class="container">
{content}
    </div>
</body>
</html>"#
    ))
}

fn display_name(provider: Provider) -> &'static str {
    match provider {
        Provider::Withings => "Withings",
        Provider::Fitbit => "Fitbit",
    }
}

/// Escape text for use in HTML content or a quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Page linking to a provider's consent screen.
pub fn consent_html(provider: Provider, authorize_url: &str) -> Html<String> {
    let name = display_name(provider);
    let step = match provider {
        Provider::Withings => "Step 1 of 2",
        Provider::Fitbit => "Step 2 of 2",
    };
    page(
        &format!("Authorize {name}"),
        &format!(
            r#"        <h1>Welcome</h1>
        <p>{step}: allow access to your {name} account.</p>
        <a class="button" href="{}">Click to Authorize</a>"#,
            escape(authorize_url)
        ),
    )
}

/// Terminal page after both accounts are linked.
pub fn complete_html() -> Html<String> {
    page(
        "Setup Complete",
        r#"        <h1>All set</h1>
        <p>New Withings weight and body fat measurements will now be logged to Fitbit.</p>"#,
    )
}

/// Page shown when a provider reports an authorization error.
pub fn error_html(message: &str) -> Html<String> {
    page(
        "Authorization Failed",
        &format!(
            r#"        <h1>Something went wrong</h1>
        <div class="error">{}</div>
        <p>Please close this window and try again.</p>"#,
            escape(message)
        ),
    )
}
