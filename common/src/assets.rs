use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

pub const BUILTIN_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Freezer</title>
  <link rel="stylesheet" href="/style.css">
</head>
<body>
  <h1>Freezer</h1>
  <p>Temperature: <span id="temperature">--</span> &deg;C</p>
  <p>Target: <span id="target">--</span> &deg;C</p>
  <p>State: <span id="state">--</span></p>
  <form id="targetForm">
    <input id="targetInput" type="number" step="0.5" required>
    <button type="submit">Set target</button>
  </form>
  <script>
    async function refresh() {
      const res = await fetch('/api/data');
      const data = await res.json();
      document.getElementById('temperature').textContent = data.temperature.toFixed(1);
      document.getElementById('target').textContent = data.target_temperature.toFixed(1);
      document.getElementById('state').textContent = data.state;
    }
    document.getElementById('targetForm').addEventListener('submit', async (ev) => {
      ev.preventDefault();
      const value = document.getElementById('targetInput').value;
      await fetch('/api/target', {
        method: 'POST',
        headers: {'Content-Type': 'application/x-www-form-urlencoded'},
        body: 'target=' + encodeURIComponent(value)
      });
      refresh();
    });
    refresh();
    setInterval(refresh, 2000);
  </script>
</body>
</html>
"#;

const MISSING_INDEX_HTML: &str = "<html><body><h1>Error loading template</h1><p>Could not load index.html</p></body></html>";

#[derive(Debug, Clone)]
pub struct WebAssets {
    index_html: String,
    stylesheet_path: Option<PathBuf>,
}

impl WebAssets {
    pub fn builtin() -> Self {
        Self {
            index_html: BUILTIN_INDEX_HTML.to_string(),
            stylesheet_path: None,
        }
    }

    pub fn from_dir(root: &Path) -> Self {
        let index_path = root.join("index.html");
        let index_html = match fs::read_to_string(&index_path) {
            Ok(html) => {
                info!("loaded {}", index_path.display());
                html
            }
            Err(err) => {
                warn!("error loading {}: {err}", index_path.display());
                MISSING_INDEX_HTML.to_string()
            }
        };

        Self {
            index_html,
            stylesheet_path: Some(root.join("style.css")),
        }
    }

    pub fn load(root: Option<&Path>) -> Self {
        root.map(Self::from_dir).unwrap_or_else(Self::builtin)
    }

    pub fn index_html(&self) -> &str {
        &self.index_html
    }

    pub fn stylesheet(&self) -> Option<String> {
        let path = self.stylesheet_path.as_ref()?;
        match fs::read_to_string(path) {
            Ok(css) => Some(css),
            Err(err) => {
                warn!("error loading {}: {err}", path.display());
                None
            }
        }
    }
}
