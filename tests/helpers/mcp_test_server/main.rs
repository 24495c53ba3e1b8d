//! MCP test server binary for integration tests
//!
//! This binary implements a small users-directory MCP server that
//! communicates over stdin/stdout using newline-delimited JSON (the stdio
//! transport protocol). Integration tests spawn it to exercise the stdio
//! transport, the session handshake and the capability client end to end.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol `2025-06-18`, advertising tools, prompts and
//!   (unless `--no-resources`) resources.
//! - `tools/list` / `tools/call` -- `add_user`, `get_user_by_id`,
//!   `count_users` (no input schema), `purge_cache` (returns no content) and
//!   `render_avatar` (returns an image entry).
//! - `resources/list` / `resources/read` -- `users://schema` (text),
//!   `users://avatar` (base64 blob) and `users://empty` (no contents).
//! - `prompts/list` / `prompts/get` -- `greeting` (two messages) and
//!   `welcome` (takes a `name` argument).
//! - `ping` -- empty result.
//! - All other requests -- JSON-RPC `-32601 Method not found`.
//!
//! Notifications are swallowed. One line is written to stderr at startup so
//! the client's diagnostic channel carries traffic.
//!
//! # Flags
//!
//! - `--no-resources` -- behave like a server without the resources
//!   capability: `resources/*` fail with `-32601`.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

const PROTOCOL_VERSION: &str = "2025-06-18";
const AVATAR_BLOB: &str = "AAE=";

struct Directory {
    users: Vec<String>,
    resources_enabled: bool,
}

fn main() {
    let resources_enabled = !std::env::args().any(|a| a == "--no-resources");
    let mut directory = Directory {
        users: Vec::new(),
        resources_enabled,
    };

    eprintln!("mcp_test_server: ready (resources={})", resources_enabled);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                // Malformed JSON: send a parse error and continue.
                let response = make_error(&Value::Null, -32700, "Parse error");
                if write_line(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        // Notifications carry no id and never get a response.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let response = match method {
            "initialize" => make_result(&id, directory.initialize()),
            "tools/list" => make_result(&id, tools_list()),
            "tools/call" => directory.call_tool(&id, &params),
            "resources/list" if directory.resources_enabled => {
                make_result(&id, resources_list())
            }
            "resources/read" if directory.resources_enabled => resources_read(&id, &params),
            "prompts/list" => make_result(&id, prompts_list()),
            "prompts/get" => prompts_get(&id, &params),
            "ping" => make_result(&id, json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if write_line(&mut out, &response).is_err() {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, response: &Value) -> io::Result<()> {
    let serialized = match serde_json::to_string(response) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mcp_test_server: failed to serialize response: {}", e);
            return Ok(());
        }
    };
    writeln!(out, "{}", serialized)?;
    out.flush()
}

impl Directory {
    fn initialize(&self) -> Value {
        let mut capabilities = json!({
            "tools": { "listChanged": false },
            "prompts": { "listChanged": false }
        });
        if self.resources_enabled {
            capabilities["resources"] = json!({});
        }
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": {
                "name": "users-directory",
                "version": "0.1.0"
            }
        })
    }

    fn call_tool(&mut self, id: &Value, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match name {
            "add_user" => {
                let Some(user) = arguments.get("name").and_then(Value::as_str) else {
                    return make_error(id, -32602, "add_user requires a name");
                };
                self.users.push(user.to_string());
                make_result(
                    id,
                    text_result(&format!("Created user #{} ({})", self.users.len(), user)),
                )
            }
            "get_user_by_id" => {
                let index = arguments.get("id").and_then(Value::as_u64).unwrap_or(0) as usize;
                match index.checked_sub(1).and_then(|i| self.users.get(i)) {
                    Some(user) => make_result(
                        id,
                        text_result(&json!({ "id": index, "name": user }).to_string()),
                    ),
                    None => make_result(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": format!("User {} not found", index) }],
                            "isError": true
                        }),
                    ),
                }
            }
            "count_users" => make_result(id, text_result(&self.users.len().to_string())),
            "purge_cache" => make_result(id, json!({ "content": [] })),
            "render_avatar" => make_result(
                id,
                json!({
                    "content": [{ "type": "image", "data": AVATAR_BLOB, "mimeType": "image/png" }]
                }),
            ),
            other => make_error(id, -32602, &format!("Unknown tool: {}", other)),
        }
    }
}

fn text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn tools_list() -> Value {
    json!({
        "tools": [
            {
                "name": "add_user",
                "description": "Create a user in the directory",
                "inputSchema": {
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "required": ["name"]
                }
            },
            {
                "name": "get_user_by_id",
                "description": "Look up a user by numeric id",
                "inputSchema": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" } },
                    "required": ["id"]
                }
            },
            { "name": "count_users", "description": "Number of users" },
            { "name": "purge_cache" },
            { "name": "render_avatar", "description": "Render the default avatar" }
        ]
    })
}

fn resources_list() -> Value {
    json!({
        "resources": [
            { "uri": "users://schema", "name": "schema", "mimeType": "application/json" },
            { "uri": "users://avatar", "name": "avatar", "mimeType": "image/png" },
            { "uri": "users://empty", "name": "empty" }
        ]
    })
}

fn resources_read(id: &Value, params: &Value) -> Value {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or("");
    let contents = match uri {
        "users://schema" => json!([{
            "uri": uri,
            "mimeType": "application/json",
            "text": "{\"name\":\"string\"}"
        }]),
        "users://avatar" => json!([{ "uri": uri, "mimeType": "image/png", "blob": AVATAR_BLOB }]),
        "users://empty" => json!([]),
        other => return make_error(id, -32002, &format!("Resource not found: {}", other)),
    };
    make_result(id, json!({ "contents": contents }))
}

fn prompts_list() -> Value {
    json!({
        "prompts": [
            { "name": "greeting", "description": "Say hello" },
            {
                "name": "welcome",
                "description": "Welcome a new user",
                "arguments": [{ "name": "name", "required": true }]
            }
        ]
    })
}

fn prompts_get(id: &Value, params: &Value) -> Value {
    match params.get("name").and_then(Value::as_str).unwrap_or("") {
        "greeting" => make_result(
            id,
            json!({
                "messages": [
                    { "role": "user", "content": { "type": "text", "text": "Hello" } },
                    { "role": "assistant", "content": { "type": "text", "text": "World" } }
                ]
            }),
        ),
        "welcome" => {
            let Some(name) = params
                .get("arguments")
                .and_then(|a| a.get("name"))
                .and_then(Value::as_str)
            else {
                return make_error(id, -32602, "welcome requires a name argument");
            };
            make_result(
                id,
                json!({
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": format!("Welcome, {}!", name) }
                    }]
                }),
            )
        }
        other => make_error(id, -32602, &format!("Unknown prompt: {}", other)),
    }
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Build a JSON-RPC error response.
fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
