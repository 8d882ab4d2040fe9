//! Starter project written into a fresh sandbox.

use serde_json::json;

/// Files of the React + Vite + Tailwind starter, as `(relative path, content)`.
pub fn starter_files(port: u16) -> Vec<(&'static str, String)> {
    vec![
        ("package.json", package_json()),
        ("vite.config.js", vite_config(port)),
        ("tailwind.config.js", TAILWIND_CONFIG.to_string()),
        ("postcss.config.js", POSTCSS_CONFIG.to_string()),
        ("index.html", INDEX_HTML.to_string()),
        ("src/main.jsx", MAIN_JSX.to_string()),
        ("src/App.jsx", APP_JSX.to_string()),
        ("src/index.css", INDEX_CSS.to_string()),
    ]
}

fn package_json() -> String {
    let manifest = json!({
        "name": "sandbox-app",
        "version": "1.0.0",
        "type": "module",
        "scripts": {
            "dev": "vite --host",
            "build": "vite build",
            "preview": "vite preview"
        },
        "dependencies": {
            "react": "^18.2.0",
            "react-dom": "^18.2.0"
        },
        "devDependencies": {
            "@vitejs/plugin-react": "^4.0.0",
            "vite": "^4.3.9",
            "tailwindcss": "^3.3.0",
            "postcss": "^8.4.31",
            "autoprefixer": "^10.4.16"
        }
    });
    // Serializing a json! literal cannot fail.
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

fn vite_config(port: u16) -> String {
    format!(
        r#"import {{ defineConfig }} from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({{
  plugins: [react()],
  server: {{
    host: '0.0.0.0',
    port: {port},
    strictPort: true,
    allowedHosts: [
      '.vercel.run',
      'localhost'
    ],
    hmr: {{
      clientPort: 443,
      protocol: 'wss'
    }}
  }}
}})"#,
        port = port
    )
}

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
export default {
  content: [
    "./index.html",
    "./src/**/*.{js,ts,jsx,tsx}",
  ],
  theme: {
    extend: {},
  },
  plugins: [],
}"#;

const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
}"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sandbox App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>"#;

const MAIN_JSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App.jsx'
import './index.css'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)"#;

const APP_JSX: &str = r#"function App() {
  return (
    <div className="min-h-screen bg-gray-900 text-white flex items-center justify-center p-4">
      <div className="text-center max-w-2xl">
        <p className="text-lg text-gray-400">
          Sandbox Ready<br/>
          Start building your React app with Vite and Tailwind CSS!
        </p>
      </div>
    </div>
  )
}

export default App"#;

const INDEX_CSS: &str = r#"@tailwind base;
@tailwind components;
@tailwind utilities;

body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
  background-color: rgb(17 24 39);
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_json_is_valid() {
        let manifest: serde_json::Value = serde_json::from_str(&package_json()).unwrap();
        assert_eq!(manifest["scripts"]["dev"], "vite --host");
        assert!(manifest["devDependencies"]["vite"].is_string());
    }

    #[test]
    fn test_vite_config_uses_port() {
        let config = vite_config(4321);
        assert!(config.contains("port: 4321"));
        assert!(config.contains("strictPort: true"));
    }

    #[test]
    fn test_starter_files() {
        let files = starter_files(5173);
        let paths: Vec<_> = files.iter().map(|(p, _)| *p).collect();
        assert!(paths.contains(&"src/App.jsx"));
        assert!(paths.contains(&"index.html"));
        assert_eq!(files.len(), 8);
    }
}
