//! English-to-Portuguese lookup service.
//!
//! Requests are `{"action": string, "value": string}`. The only action,
//! `traduzir`, looks `value` up in a fixed table and answers
//! `{"result": string}`.

use crate::protocol::{Frame, Message, Payload};
use crate::runtime::Service;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The action name for a lookup.
pub const ACTION_TRANSLATE: &str = "traduzir";

const DEFAULT_ENTRIES: &[(&str, &str)] = &[
    ("hello", "olá"),
    ("how", "como"),
    ("all", "todo"),
    ("yes", "sim"),
    ("no", "não"),
    ("maybe", "talvez"),
    ("are", "está"),
    ("you", "você"),
    ("I", "eu"),
    ("am", "estou"),
    ("fine", "bem"),
    ("and", "e"),
    ("call", "chamar"),
    ("boy", "menino"),
    ("girl", "menina"),
    ("book", "livro"),
    ("car", "carro"),
    ("chair", "cadeira"),
    ("children", "crianças"),
    ("city", "cidade"),
    ("dog", "cachorro"),
    ("door", "porta"),
    ("enemy", "inimigo"),
    ("end", "fim"),
    ("enough", "suficient"),
    ("eat", "comer"),
    ("father", "pai"),
    ("friend", "amigo"),
    ("go", "ir"),
    ("good", "bom"),
    ("food", "comida"),
    ("hear", "ouvir"),
    ("house", "casa"),
    ("inside", "dentro"),
    ("laugh", "rir"),
    ("man", "homem"),
    ("woman", "mulher"),
    ("name", "nome"),
    ("never", "nunca"),
    ("new", "novo"),
    ("next", "próximo"),
    ("noise", "barulho"),
    ("often", "frequentemente"),
    ("pick", "escolher"),
    ("play", "jogar"),
    ("room", "comodo"),
    ("see", "ver"),
    ("sell", "vender"),
    ("sister", "irmã"),
    ("brother", "irmão"),
    ("sit", "sentar"),
    ("smile", "sorrir"),
    ("speak", "falar"),
    ("then", "então"),
    ("think", "pensar"),
    ("walk", "caminhar"),
    ("water", "água"),
    ("work", "trabalho"),
    ("write", "escrever"),
];

/// Immutable word table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTable {
    entries: HashMap<String, String>,
}

impl TranslationTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, word: &str) -> Option<&str> {
        self.entries.get(word).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_ENTRIES
                .iter()
                .map(|(en, pt)| (en.to_string(), pt.to_string()))
                .collect(),
        )
    }
}

/// Service answering translation requests from an injected table.
pub struct Translator {
    table: Arc<TranslationTable>,
}

impl Translator {
    pub fn new(table: Arc<TranslationTable>) -> Self {
        Self { table }
    }

    /// Compute the `result` text for a JSON request body.
    pub fn answer(&self, request: &Value) -> String {
        let action = request.get("action");
        if action.and_then(Value::as_str) != Some(ACTION_TRANSLATE) {
            return format!("erro! Ação inválida '{}'.", display(action));
        }

        let value = request.get("value");
        match value.and_then(Value::as_str).and_then(|word| self.table.get(word)) {
            Some(translation) => translation.to_string(),
            None => format!("Não há tradução para '{}'.", display(value)),
        }
    }
}

impl Service for Translator {
    fn respond(&self, request: &Frame) -> Message {
        let result = match &request.payload {
            Payload::Json(value) => self.answer(value),
            Payload::Binary(_) => format!(
                "erro! Tipo de conteúdo não suportado '{}'.",
                request.header.content_type
            ),
        };
        Message::json(json!({ "result": result }))
    }
}

/// Strings render bare, anything else (including absence) as JSON text.
fn display(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => Value::Null.to_string(),
    }
}
