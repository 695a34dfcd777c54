//! Command-line surface: argument parsing and the command handlers.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::debug;

use cmsconsole_core::api::{ApiRequest, ApiResponse, Multipart};
use cmsconsole_core::auth::store::age_display;
use cmsconsole_core::{ApiClient, Config, SessionClient, SessionError, SessionEvent};

/// Environment variable that supplies the password non-interactively.
const ENV_PASSWORD: &str = "CMSCONSOLE_PASSWORD";

const DEFAULT_UPLOAD_FIELD: &str = "file";

const NOT_LOGGED_IN: &str = "Not logged in. Run `cmsconsole login` first.";
const SESSION_EXPIRED: &str = "Your session has expired. Run `cmsconsole login` to sign in again.";

#[derive(Debug, Parser)]
#[command(name = "cmsconsole", version, about = "Admin console for a content-management API")]
pub struct Cli {
    /// Override the API base URL from the config file
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the access token
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// End the session locally and on the server
    Logout,
    /// Show whether a session is active
    Status,
    /// GET a resource
    Get { path: String },
    /// DELETE a resource
    Delete { path: String },
    /// POST a JSON body
    Post { path: String, body: String },
    /// PUT a JSON body
    Put { path: String, body: String },
    /// PATCH a JSON body
    Patch { path: String, body: String },
    /// Upload a file as multipart/form-data
    Upload {
        path: String,
        file: PathBuf,
        /// Form field name for the file
        #[arg(long, default_value = DEFAULT_UPLOAD_FIELD)]
        field: String,
        /// Extra form fields, as key=value
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
}

pub async fn run(command: Command, mut config: Config) -> Result<()> {
    let session = Arc::new(SessionClient::from_config(&config)?);
    let mut events = session.subscribe();
    let api = ApiClient::new(Arc::clone(&session), config.base_url.clone());

    let result = match command {
        Command::Login { username } => login(&session, &mut config, username).await,
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Status => {
            status(&session, &config);
            Ok(())
        }
        Command::Get { path } => call(&api, ApiRequest::get(api.url(&path))).await,
        Command::Delete { path } => call(&api, ApiRequest::delete(api.url(&path))).await,
        Command::Post { path, body } => call(&api, ApiRequest::post(api.url(&path)).json(&parse_json(&body)?)?).await,
        Command::Put { path, body } => call(&api, ApiRequest::put(api.url(&path)).json(&parse_json(&body)?)?).await,
        Command::Patch { path, body } => call(&api, ApiRequest::patch(api.url(&path)).json(&parse_json(&body)?)?).await,
        Command::Upload {
            path,
            file,
            field,
            meta,
        } => {
            let form = build_upload_form(&file, &field, &meta)?;
            call(&api, ApiRequest::post(api.url(&path)).multipart(form)).await
        }
    };

    // Expiry is the cue to send the user back to login
    let mut notice = None;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::SessionExpired) => notice = Some(SESSION_EXPIRED),
            Ok(event) => debug!(?event, "Session event"),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    if let Some(notice) = notice.or_else(|| result.as_ref().err().and_then(login_hint)) {
        eprintln!("{}", notice);
    }
    result
}

/// What to tell the user when `err` means they have to log in again.
fn login_hint(err: &anyhow::Error) -> Option<&'static str> {
    let err = err.downcast_ref::<SessionError>()?;
    if !err.requires_login() {
        return None;
    }
    match err {
        SessionError::Unauthenticated => Some(NOT_LOGGED_IN),
        _ => Some(SESSION_EXPIRED),
    }
}

async fn login(session: &SessionClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?,
    };

    let outcome = session.login(&username, &password).await;
    if !outcome.success {
        bail!(
            "Login failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    // Persist only the username; overrides from flags and env stay out of the file
    config.last_username = Some(username.clone());
    let saved = Config::load_file().and_then(|mut on_disk| {
        on_disk.last_username = Some(username.clone());
        on_disk.save()
    });
    if let Err(e) = saved {
        tracing::warn!(error = %e, "Failed to save config");
    }
    println!("Logged in as {}", username);
    Ok(())
}

fn status(session: &SessionClient, config: &Config) {
    println!("API:      {}", config.base_url);
    if session.is_authenticated() {
        let age = session
            .token_saved_at()
            .map(age_display)
            .unwrap_or_else(|| "unknown".to_string());
        println!("Session:  active (token saved {})", age);
    } else {
        println!("Session:  not logged in");
    }
    if let Some(ref user) = config.last_username {
        println!("User:     {}", user);
    }
}

async fn call(api: &ApiClient, request: ApiRequest) -> Result<()> {
    let response = api.execute(request).await?;
    print_response(&response);
    Ok(())
}

fn print_response(response: &ApiResponse) {
    if response.body.is_empty() {
        println!("{}", response.status);
        return;
    }
    match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", response.text()),
        },
        Err(_) => println!("{}", response.text()),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("A username is required");
    }
    Ok(value)
}

fn parse_json(body: &str) -> Result<serde_json::Value> {
    serde_json::from_str(body).context("Body is not valid JSON")
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn build_upload_form(file: &Path, field: &str, meta: &[(String, String)]) -> Result<Multipart> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let mut form = Multipart::new();
    for (key, value) in meta {
        form = form.text(key.clone(), value.clone());
    }
    Ok(form.file(field, filename, Some(guess_content_type(file).to_string()), data))
}

fn guess_content_type(file: &Path) -> &'static str {
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cmsconsole_core::api::PartContent;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("alt=Logo"), Ok(("alt".to_string(), "Logo".to_string())));
        assert_eq!(parse_key_val("q=a=b"), Ok(("q".to_string(), "a=b".to_string())));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a/LOGO.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("report.pdf")), "application/pdf");
        assert_eq!(guess_content_type(Path::new("archive")), "application/octet-stream");
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "cmsconsole",
            "--base-url",
            "https://cms.example.com/api",
            "upload",
            "/media",
            "logo.png",
            "--meta",
            "alt=Logo",
        ])
        .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("https://cms.example.com/api"));
        match cli.command {
            Command::Upload { path, field, meta, .. } => {
                assert_eq!(path, "/media");
                assert_eq!(field, DEFAULT_UPLOAD_FIELD);
                assert_eq!(meta, vec![("alt".to_string(), "Logo".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_build_upload_form_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, [0xFFu8, 0xD8, 0x00, 0x10]).unwrap();

        let form = build_upload_form(&file, "image", &[("caption".to_string(), "Hi".to_string())]).unwrap();

        assert_eq!(form.parts.len(), 2);
        assert_eq!(form.parts[1].name, "image");
        match &form.parts[1].content {
            PartContent::File {
                filename,
                content_type,
                data,
            } => {
                assert_eq!(filename, "photo.jpg");
                assert_eq!(content_type.as_deref(), Some("image/jpeg"));
                assert_eq!(data.as_ref(), &[0xFF, 0xD8, 0x00, 0x10]);
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_login_hint() {
        let not_logged_in = anyhow::Error::new(SessionError::Unauthenticated).context("GET /pages");
        assert_eq!(login_hint(&not_logged_in), Some(NOT_LOGGED_IN));

        let expired = anyhow::Error::new(SessionError::expired("refresh token revoked"));
        assert_eq!(login_hint(&expired), Some(SESSION_EXPIRED));

        assert_eq!(login_hint(&anyhow::anyhow!("Body is not valid JSON")), None);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(parse_json("{not json").is_err());
        assert_eq!(parse_json(r#"{"a":1}"#).unwrap()["a"], 1);
    }
}
