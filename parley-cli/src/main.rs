//! parley-cli: command-line client for the Parley chat API
//!
//! Talks to a running `parley-server` over HTTP. `register` and `login` print
//! the session token; export it as `PARLEY_TOKEN` for the chat commands.
//!
//! # Subcommands
//! - `register <user> <email> <password>`: create an account
//! - `login (--user <u> | --email <e>) <password>`: sign in
//! - `chats`: list your chats
//! - `send [--chat <id|new>] [--model <m>] <prompt>`: send a prompt
//! - `history <chat>`: show a chat's exchanges
//! - `delete <chat>`: delete a chat
//! - `status`: show server health

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";
const DEFAULT_COOKIE: &str = "token";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "parley-cli", version, about = "Command-line client for the Parley chat API")]
struct Cli {
    /// Parley HTTP server URL (overrides PARLEY_HTTP_URL env var)
    #[arg(long, env = "PARLEY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Session token printed by `login` or `register`
    #[arg(long, env = "PARLEY_TOKEN")]
    token: Option<String>,

    /// Name of the session cookie the server uses
    #[arg(long, env = "PARLEY_COOKIE_NAME", default_value = DEFAULT_COOKIE)]
    cookie_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an account
    Register {
        user_name: String,
        email: String,
        password: String,
    },

    /// Sign in with a user name or an email
    Login {
        #[arg(long, required_unless_present = "email")]
        user: Option<String>,

        #[arg(long)]
        email: Option<String>,

        password: String,
    },

    /// List your chats, newest first
    Chats,

    /// Send a prompt, starting a new chat unless --chat is given
    Send {
        prompt: String,

        #[arg(long, default_value = "new")]
        chat: String,

        /// llama3, mixtral or gemma
        #[arg(short, long, default_value = "llama3")]
        model: String,
    },

    /// Show every exchange of a chat
    History { chat: String },

    /// Delete a chat and its history
    Delete { chat: String },

    /// Show Parley server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatList {
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Deserialize)]
pub struct PromptEntry {
    pub prompt: String,
    pub response: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptList {
    pub prompts: Vec<PromptEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptReply {
    pub chat_id: String,
    pub title: String,
    pub response: String,
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Value of the named cookie in a Set-Cookie header, if it is that cookie.
pub fn token_from_set_cookie(set_cookie: &str, cookie_name: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == cookie_name && !value.is_empty()).then(|| value.to_string())
}

pub fn format_chat_line(chat: &ChatSummary) -> String {
    let day = chat.created_at.get(..10).unwrap_or(&chat.created_at);
    format!("{}  {}  {}", chat.id, day, chat.title)
}

/// The `error` field of an error body, or the raw text when it is not JSON.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: Client,
    server: String,
    token: Option<String>,
    cookie_name: String,
}

impl Api {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        // Completions can take a while; no client-side timeout.
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            server: cli.server.trim_end_matches('/').to_string(),
            token: cli.token.clone(),
            cookie_name: cli.cookie_name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn authed(&self, request: RequestBuilder) -> anyhow::Result<RequestBuilder> {
        let Some(token) = &self.token else {
            bail!("no session token; run `login` and export PARLEY_TOKEN");
        };
        Ok(request.header(header::COOKIE, format!("{}={}", self.cookie_name, token)))
    }

    fn send(&self, request: RequestBuilder) -> anyhow::Result<reqwest::blocking::Response> {
        let resp = request
            .send()
            .with_context(|| format!("connection failed to {}", self.server))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            bail!("server returned {}: {}", status, error_message(&body));
        }
        Ok(resp)
    }

    fn sign_in(&self, path: &str, body: Value) -> anyhow::Result<()> {
        let resp = self.send(self.client.post(self.url(path)).json(&body))?;
        let token = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|c| token_from_set_cookie(c, &self.cookie_name));
        let body: Value = resp.json().unwrap_or_default();

        println!("{}", body["message"].as_str().unwrap_or("ok"));
        match token {
            Some(token) => println!("export PARLEY_TOKEN={}", token),
            None => bail!("server did not set a `{}` cookie", self.cookie_name),
        }
        Ok(())
    }

    fn chats(&self) -> anyhow::Result<()> {
        let resp = self.send(self.authed(self.client.get(self.url("/api/chat/all")))?)?;
        let list: ChatList = resp.json().context("failed to parse chat list")?;
        if list.chats.is_empty() {
            eprintln!("No chats yet");
        }
        for chat in &list.chats {
            println!("{}", format_chat_line(chat));
        }
        Ok(())
    }

    fn prompt(&self, chat: &str, model: &str, prompt: &str) -> anyhow::Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/api/chat/{}/message", chat)))
            .json(&json!({ "prompt": prompt, "model": model }));
        let resp = self.send(self.authed(request)?)?;
        let reply: PromptReply = resp.json().context("failed to parse reply")?;
        println!("[{}] {}\n", reply.chat_id, reply.title);
        println!("{}", reply.response);
        Ok(())
    }

    fn history(&self, chat: &str) -> anyhow::Result<()> {
        let request = self
            .client
            .get(self.url(&format!("/api/chat/{}/messages", chat)));
        let resp = self.send(self.authed(request)?)?;
        let list: PromptList = resp.json().context("failed to parse history")?;
        if list.prompts.is_empty() {
            eprintln!("No messages for chat {}", chat);
        }
        for entry in &list.prompts {
            println!("> {}", entry.prompt);
            println!("[{}] {}\n", entry.model, entry.response);
        }
        Ok(())
    }

    fn delete(&self, chat: &str) -> anyhow::Result<()> {
        let request = self.client.delete(self.url(&format!("/api/chat/{}", chat)));
        self.send(self.authed(request)?)?;
        println!("Deleted {}", chat);
        Ok(())
    }

    fn status(&self) -> anyhow::Result<()> {
        let url = self.url("/health");
        let resp = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("cannot reach {}", url))?;
        let healthy = resp.status().is_success();
        let body: Value = resp.json().unwrap_or_default();
        if !healthy {
            bail!(
                "server unhealthy: {}",
                body["error"].as_str().unwrap_or("unknown error")
            );
        }
        println!("Parley server: {}", body["status"].as_str().unwrap_or("unknown"));
        println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
        println!("Store:         {}", body["store"].as_str().unwrap_or("?"));
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Api::new(&cli).and_then(|api| match &cli.command {
        Commands::Register {
            user_name,
            email,
            password,
        } => api.sign_in(
            "/api/auth/register",
            json!({ "userName": user_name, "email": email, "password": password }),
        ),
        Commands::Login {
            user,
            email,
            password,
        } => api.sign_in(
            "/api/auth/login",
            json!({ "userName": user, "email": email, "password": password }),
        ),
        Commands::Chats => api.chats(),
        Commands::Send {
            prompt,
            chat,
            model,
        } => api.prompt(chat, model, prompt),
        Commands::History { chat } => api.history(chat),
        Commands::Delete { chat } => api.delete(chat),
        Commands::Status => api.status(),
    });

    if let Err(e) = result {
        eprintln!("parley-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
