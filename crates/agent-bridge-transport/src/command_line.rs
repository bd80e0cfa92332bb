//! Text command grammar.
//!
//! ```text
//! agent send MESSAGE
//! agent list
//! agent switch AGENT
//! agent create NAME
//! agent delete AGENT_ID
//! agent memory read LABEL
//! agent memory write LABEL VALUE...
//! agent archivemem TEXT...
//! agent clearhistory
//! agent help
//! ```
//!
//! Verbs are case-insensitive. Arguments keep their case, and trailing
//! free-text arguments keep their line breaks. A memory value is taken
//! verbatim after the single separator that follows its label.

use agent_bridge_core::BridgeError;
use agent_bridge_session::Command;

/// Split off the first whitespace-delimited word.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(i) => (&input[..i], input[i..].trim_start()),
        None => (input, ""),
    }
}

/// Split off the block label at the first whitespace character, which is
/// consumed; the remainder is left as is.
fn split_label(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((i, c)) => (&input[..i], &input[i + c.len_utf8()..]),
        None => (input, ""),
    }
}

/// Parse one `agent ...` command line.
///
/// Argument emptiness is left to `Command::validate`; this only rejects
/// lines that do not name a known command.
///
/// # Errors
/// Returns `InvalidCommand` for lines not starting with `agent` or naming an
/// unknown verb.
pub fn parse_command_line(line: &str) -> Result<Command, BridgeError> {
    let (prefix, rest) = split_word(line);
    if !prefix.eq_ignore_ascii_case("agent") {
        return Err(BridgeError::invalid("commands start with `agent`; try `agent help`"));
    }

    let (verb, raw) = split_word(rest);
    let rest = raw.trim_end();
    let command = match verb.to_ascii_lowercase().as_str() {
        "" | "help" => Command::Help,
        "send" => Command::SendMessage {
            text: rest.to_string(),
        },
        "list" => Command::ListAgents,
        "switch" => Command::SwitchAgent {
            agent: rest.to_string(),
        },
        "create" => Command::CreateAgent {
            name: rest.to_string(),
        },
        "delete" => Command::DeleteAgent {
            agent_id: rest.to_string(),
        },
        "memory" => parse_memory(raw)?,
        "archivemem" => Command::ArchiveMemory {
            text: rest.to_string(),
        },
        "clearhistory" => Command::ClearHistory,
        other => {
            return Err(BridgeError::invalid(format!(
                "unknown command `{other}`; try `agent help`"
            )));
        }
    };
    Ok(command)
}

fn parse_memory(rest: &str) -> Result<Command, BridgeError> {
    let (action, rest) = split_word(rest);
    let (label, value) = split_label(rest);
    match action.to_ascii_lowercase().as_str() {
        "read" if value.trim().is_empty() => Ok(Command::ReadMemory {
            label: label.to_string(),
        }),
        "read" => Err(BridgeError::invalid("usage: agent memory read LABEL")),
        "write" => Ok(Command::WriteMemory {
            label: label.to_string(),
            value: value.to_string(),
        }),
        _ => Err(BridgeError::invalid(
            "usage: agent memory read LABEL | agent memory write LABEL VALUE",
        )),
    }
}
