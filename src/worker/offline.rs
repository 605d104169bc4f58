//! Responses the worker synthesizes when neither network nor cache can answer.

use crate::http::Response;

/// Self-contained page: inline style and script only, no external resources.
/// The script polls connectivity and returns to the app once back online.
const OFFLINE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{APP}} - Offline</title>
<style>
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif;
  background: linear-gradient(135deg, #2563eb, #3b82f6);
  min-height: 100vh;
  display: flex;
  align-items: center;
  justify-content: center;
  color: #fff;
  text-align: center;
  padding: 2rem;
}
main { max-width: 560px; }
h1 { font-size: 2.5rem; font-weight: 800; margin-bottom: 1rem; }
p { font-size: 1.1rem; line-height: 1.6; opacity: 0.9; margin-bottom: 2rem; }
a.btn {
  display: inline-block;
  padding: 0.9rem 2rem;
  border-radius: 999px;
  background: rgba(255, 255, 255, 0.9);
  color: #2563eb;
  font-weight: 600;
  text-decoration: none;
}
#status {
  position: fixed;
  top: 1rem;
  right: 1rem;
  padding: 0.4rem 1rem;
  border-radius: 999px;
  font-size: 0.875rem;
  background: rgba(239, 68, 68, 0.9);
}
#status.online { background: rgba(16, 185, 129, 0.9); }
</style>
</head>
<body>
<div id="status">Offline</div>
<main>
<h1>{{APP}}</h1>
<p>You're offline. Cached books, notes and the Pomodoro timer keep working, and your changes sync when the connection comes back.</p>
<a class="btn" href="{{START}}">Try again</a>
</main>
<script>
(function () {
  var status = document.getElementById('status');
  function check() {
    if (navigator.onLine) {
      status.textContent = 'Online';
      status.className = 'online';
      setTimeout(function () { window.location.href = '{{START}}'; }, 1000);
    } else {
      status.textContent = 'Offline';
      status.className = '';
    }
  }
  setInterval(check, {{POLL_MS}});
  window.addEventListener('online', check);
  window.addEventListener('offline', check);
  check();
})();
</script>
</body>
</html>
"#;

/// Body of the synthetic response for uncategorized requests.
pub const OFFLINE_FALLBACK_BODY: &str = "Offline - Content not available";

/// Renders the offline page for one app.
#[derive(Debug, Clone)]
pub struct OfflinePage {
  html: String,
}

impl OfflinePage {
  pub fn new(app_name: &str, start_url: &str, poll_secs: u64) -> Self {
    let html = OFFLINE_TEMPLATE
      .replace("{{APP}}", &escape_html(app_name))
      .replace("{{START}}", &escape_html(start_url))
      .replace("{{POLL_MS}}", &(poll_secs.max(1) * 1000).to_string());
    Self { html }
  }

  pub fn response(&self) -> Response {
    Response::new(200, self.html.as_bytes())
      .with_header("content-type", "text/html; charset=utf-8")
      .with_header("cache-control", "no-cache")
  }
}

/// Response for requests with no other option. Status 200 so the page's
/// fetch resolves instead of rejecting.
pub fn offline_fallback() -> Response {
  Response::new(200, OFFLINE_FALLBACK_BODY).with_header("content-type", "text/plain")
}

fn escape_html(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&#39;")
}
