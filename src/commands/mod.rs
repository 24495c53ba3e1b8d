//! Command handlers for mcp-bridge
//!
//! Each handler works against an already-open [`CapabilityClient`] and
//! renders its report into a `String`, which the `run_*` wrappers print.
//! Connecting and tearing down are owned by `main`.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mcp::capability::CapabilityClient;
use colored::Colorize;
use std::collections::HashMap;

/// Build a client from configuration and perform the handshake.
///
/// # Errors
///
/// Returns the transport, protocol or configuration error that prevented the
/// session from opening. These are fatal to the run.
pub async fn connect(config: &Config) -> Result<CapabilityClient> {
    let mut client = CapabilityClient::new(config.server.clone())
        .with_client_info(config.client.implementation());
    let response = client.open().await?;
    tracing::debug!(
        server = %config.server.name,
        server_info = %response.server_info.name,
        "Connected"
    );
    Ok(client)
}

pub mod inspect {
    //! Discovery listing: resources, tools and prompts, followed by the
    //! expanded content of every prompt.

    use super::*;
    use std::fmt::Write;

    /// Print the discovery report
    pub async fn run_inspect(client: &CapabilityClient) -> Result<()> {
        print!("{}", inspect_report(client).await?);
        Ok(())
    }

    /// Build the discovery report.
    ///
    /// Listing failures already degrade to empty sections inside the client.
    /// A prompt that fails to expand is reported inline and the remaining
    /// prompts are still fetched.
    pub async fn inspect_report(client: &CapabilityClient) -> Result<String> {
        let resources = client.list_resources().await?;
        let tools = client.list_tools().await?;
        let prompts = client.list_prompts().await?;

        let mut out = String::new();

        write_section(
            &mut out,
            "Resources",
            resources.iter().map(|r| match &r.mime_type {
                Some(mime) => format!("{} ({})", r.uri, mime),
                None => r.uri.clone(),
            }),
        )?;
        write_section(
            &mut out,
            "Tools",
            tools
                .iter()
                .map(|t| labelled(&t.function.name, &t.function.description)),
        )?;
        write_section(
            &mut out,
            "Prompts",
            prompts.iter().map(|p| labelled(&p.name, &p.description)),
        )?;

        for prompt in &prompts {
            match client.get_prompt(&prompt.name).await {
                Ok(text) => {
                    writeln!(out)?;
                    writeln!(out, "{} {}", "Prompt".cyan(), prompt.name)?;
                    writeln!(out, "{}", text)?;
                }
                Err(e) => {
                    tracing::warn!(prompt = %prompt.name, "Failed to fetch prompt: {:#}", e);
                    writeln!(out)?;
                    writeln!(
                        out,
                        "{} Failed to load prompt '{}': {}",
                        "warning:".yellow(),
                        prompt.name,
                        e
                    )?;
                }
            }
        }

        Ok(out)
    }

    fn labelled(name: &str, description: &str) -> String {
        if description.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, description)
        }
    }

    fn write_section(
        out: &mut String,
        heading: &str,
        items: impl Iterator<Item = String>,
    ) -> std::fmt::Result {
        let mut items = items.peekable();
        if items.peek().is_none() {
            return writeln!(out, "{}: none", heading.bold());
        }
        writeln!(out, "{}:", heading.bold())?;
        for item in items {
            writeln!(out, "  - {}", item)?;
        }
        Ok(())
    }
}

pub mod call {
    //! Tool invocation.

    use super::*;
    use crate::mcp::resolver::ToolOutput;
    use serde_json::Value;

    /// Parse `--args` into a tool arguments value.
    ///
    /// Empty input and `null` mean "no arguments".
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] unless the text is a JSON object or
    /// `null`.
    pub fn parse_tool_args(raw: &str) -> Result<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| BridgeError::Config(format!("Invalid tool arguments: {}", e)))?;
        match value {
            Value::Object(_) | Value::Null => Ok(value),
            other => Err(BridgeError::Config(format!(
                "Tool arguments must be a JSON object, got {}",
                other
            ))
            .into()),
        }
    }

    /// Render a resolved tool result for the terminal.
    pub fn render_tool_output(output: Option<ToolOutput>) -> String {
        match output {
            Some(ToolOutput::Text(text)) => text,
            Some(ToolOutput::Opaque(value)) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
            None => "(no content)".to_string(),
        }
    }

    /// Invoke `tool` and print its result
    pub async fn run_call(client: &CapabilityClient, tool: &str, raw_args: &str) -> Result<()> {
        let arguments = parse_tool_args(raw_args)?;
        let output = client.call_tool(tool, arguments).await?;
        println!("{}", render_tool_output(output));
        Ok(())
    }
}

pub mod read {
    //! Resource read.

    use super::*;
    use crate::mcp::resolver::ResourceContent;

    /// Render resource content: text verbatim, binary as a size summary.
    pub fn render_resource(content: &ResourceContent) -> String {
        match content {
            ResourceContent::Opaque(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            other => other.to_string(),
        }
    }

    /// Read `uri` and print it
    pub async fn run_read(client: &CapabilityClient, uri: &str) -> Result<()> {
        let content = client.get_resource(uri).await?;
        println!("{}", render_resource(&content));
        Ok(())
    }
}

pub mod prompt {
    //! Prompt expansion.

    use super::*;

    /// Parse repeated `KEY=VALUE` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for a pair without `=` or with an
    /// empty key.
    pub fn parse_prompt_arguments(pairs: &[String]) -> Result<HashMap<String, String>> {
        let mut arguments = HashMap::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                BridgeError::Config(format!("Prompt argument must be KEY=VALUE, got '{}'", pair))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(
                    BridgeError::Config(format!("Prompt argument has an empty key: '{}'", pair))
                        .into(),
                );
            }
            arguments.insert(key.to_string(), value.to_string());
        }
        Ok(arguments)
    }

    /// Expand the prompt `name` and print the flattened text
    pub async fn run_prompt(
        client: &CapabilityClient,
        name: &str,
        pairs: &[String],
    ) -> Result<()> {
        let arguments = parse_prompt_arguments(pairs)?;
        let text = if arguments.is_empty() {
            client.get_prompt(name).await?
        } else {
            client.get_prompt_with_arguments(name, arguments).await?
        };
        println!("{}", text);
        Ok(())
    }
}
