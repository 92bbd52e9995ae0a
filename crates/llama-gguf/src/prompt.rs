//! Llama 2 chat prompt assembly.
//!
//! Llama 2 chat models were trained on a fixed turn format:
//!
//! ```text
//! <s>[INST] <<SYS>>
//! {system}
//! <</SYS>>
//!
//! {user 1} [/INST] {response 1} </s><s>[INST] {user 2} [/INST]
//! ```
//!
//! [`build_llama2_chat_prompt`] produces that text as an ordered list of
//! fragments. The fragments are kept separate (rather than joined) so the
//! exact input can be written to the response log and replayed later.

use crate::{Conversation, Prompt};

/// Opens every turn, historical or new.
pub const TURN_OPEN: &str = "<s>[INST] ";

/// Closes the user half of a turn. Appended directly after the prompt text.
pub const TURN_CLOSE: &str = " [/INST] ";

/// Closes the model half of a turn. Appended directly after the response text.
pub const RESPONSE_CLOSE: &str = " </s>";

/// Default system prompt used when neither the prompt nor the conversation
/// carries one.
pub const DEFAULT_LLAMA2_CHAT_SYSTEM_PROMPT: &str = "You are a helpful, respectful and honest assistant. Always answer as helpfully as possible, while being safe.  Your answers should not include any harmful, unethical, racist, sexist, toxic, dangerous, or illegal content. Please ensure that your responses are socially unbiased and positive in nature.\n\nIf a question does not make any sense, or is not factually coherent, explain why instead of answering something not correct. If you don't know the answer to a question, please don't share false information.";

/// Wrap a system prompt in the `<<SYS>>` delimiters.
pub fn system_block(system_prompt: &str) -> String {
    format!("<<SYS>>\n{system_prompt}\n<</SYS>>\n\n")
}

/// Pick the system prompt for a build.
///
/// The new prompt's override wins. Otherwise the most recent turn with an
/// override wins. Otherwise `default_system_prompt`. Empty strings count as
/// unset.
pub fn resolve_system_prompt<'a>(
    prompt: &'a Prompt,
    conversation: Option<&'a Conversation>,
    default_system_prompt: &'a str,
) -> &'a str {
    if let Some(system) = non_empty(prompt.system.as_deref()) {
        return system;
    }
    conversation
        .into_iter()
        .flat_map(|c| c.turns.iter())
        .filter_map(|turn| non_empty(turn.system.as_deref()))
        .last()
        .unwrap_or(default_system_prompt)
}

/// Build the Llama 2 chat prompt for `prompt`, continuing `conversation`.
///
/// Every historical turn is emitted as open marker, prompt and closed
/// response. The system block is attached once, to whichever open marker
/// comes first. The new prompt's turn is left open for the model to
/// complete.
///
/// # Example
///
/// ```
/// use llama_gguf::Prompt;
/// use llama_gguf::prompt::build_llama2_chat_prompt;
///
/// let bits = build_llama2_chat_prompt(&Prompt::new("hi"), None, "Be brief.");
/// assert_eq!(
///     bits,
///     vec!["<s>[INST] ", "<<SYS>>\nBe brief.\n<</SYS>>\n\n", "hi [/INST] "],
/// );
/// ```
pub fn build_llama2_chat_prompt(
    prompt: &Prompt,
    conversation: Option<&Conversation>,
    default_system_prompt: &str,
) -> Vec<String> {
    let system_prompt = resolve_system_prompt(prompt, conversation, default_system_prompt);
    let turns = conversation.map_or(&[][..], |c| c.turns.as_slice());

    let mut bits = Vec::with_capacity(turns.len() * 3 + 3);
    for (i, turn) in turns.iter().enumerate() {
        bits.push(TURN_OPEN.to_string());
        if i == 0 {
            bits.push(system_block(system_prompt));
        }
        bits.push(format!("{}{TURN_CLOSE}", turn.prompt));
        bits.push(format!("{}{RESPONSE_CLOSE}", turn.response));
    }

    bits.push(TURN_OPEN.to_string());
    if turns.is_empty() {
        bits.push(system_block(system_prompt));
    }
    bits.push(format!("{}{TURN_CLOSE}", prompt.prompt));
    bits
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
