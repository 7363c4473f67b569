use llama_core::chat::{ChatError, ChatOptions};
use serde::Serialize;

use crate::llama::{config::LlamaConfig, template};

/// End-of-sequence token the backend emits when it is done speaking.
pub const EOS_TOKEN: &str = "</s>";

/// Wire body of one `POST /completion` request. Built whole or not at all;
/// immutable once constructed.
#[derive(Clone, Debug, Serialize)]
pub struct RequestPayload {
    pub prompt: String,
    pub stream: bool,
    pub temperature: f32,
    pub eps: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub repeat_last_n: u32,
    pub n_predict: u32,
    pub stop: Vec<String>,
    pub charname: String,
    pub username: String,
    #[serde(rename = "customUrl")]
    pub custom_url: String,
}

/// Render the prompt and combine it with the sampling configuration. Fails
/// only when the template engine reports a structural error, in which case
/// no payload is produced.
pub fn build(options: &ChatOptions, config: &LlamaConfig) -> Result<RequestPayload, ChatError> {
    let persona = config.persona();
    let prompt = template::render(&config.template, &options.messages, &persona)?;

    // One stop string per persona name keeps the backend from impersonating
    // the other speaker.
    let stop = vec![
        EOS_TOKEN.to_string(),
        format!("\n{}:", persona.charname),
        format!("\n{}:", persona.username),
    ];

    Ok(RequestPayload {
        prompt,
        stream: options.stream,
        temperature: config.temperature,
        eps: config.eps,
        top_p: config.top_p,
        top_k: config.top_k,
        repeat_penalty: config.repeat_penalty,
        repeat_last_n: config.repeat_last_n,
        n_predict: config.max_tokens,
        stop,
        charname: persona.charname,
        username: persona.username,
        custom_url: config.base_url.clone(),
    })
}
