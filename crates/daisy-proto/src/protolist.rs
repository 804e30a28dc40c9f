//! Parser for protolist schema files.
//!
//! ```text
//! # comment
//! debug {
//!     ping = 1                  # input proto.debug.Ping, reply proto.debug.Ping.Response
//! }
//! test {
//!     echo:message = 2          # input proto.test.Message
//!     strobe:[] = 3             # no reply
//!     query:.other.Req[.other.Resp] = 4
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::{DescriptorRecord, MethodId};

const PROTO_PREFIX: &str = "proto";
const RESPONSE_SUFFIX: &str = ".Response";
const ABSOLUTE_MARKER: char = '.';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtoMethod {
    pub id: MethodId,
    pub name: String,
    /// Fully qualified argument type name.
    pub input: String,
    /// Fully qualified reply type name; `None` for fire-and-forget methods.
    pub output: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtoModule {
    pub name: String,
    pub methods: Vec<ProtoMethod>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProtolistError {
    #[error("line {line}: illegal module header `{found}`")]
    IllegalModule { line: usize, found: String },

    #[error("module `{module}` is missing its closing `}}`")]
    UnterminatedModule { module: String },

    #[error("line {line}: invalid method entry `{entry}`")]
    InvalidEntry { line: usize, entry: String },

    #[error("line {line}: invalid method id `{id}`")]
    InvalidId { line: usize, id: String },

    #[error("repeated module name `{name}`")]
    RepeatedModule { name: String },

    #[error("repeated method id {id} (`{module}.{name}`)")]
    RepeatedId {
        id: MethodId,
        module: String,
        name: String,
    },

    #[error("repeated method `{module}.{name}`")]
    RepeatedMethod { module: String, name: String },
}

#[derive(Debug)]
struct Token<'a> {
    line: usize,
    text: &'a str,
}

/// Parse a schema into modules with fully normalised type names.
pub fn parse(source: &str) -> Result<Vec<ProtoModule>, ProtolistError> {
    let tokens = tokenize(source);
    let mut modules = Vec::new();
    let mut module_names = HashSet::new();
    let mut ids: HashMap<MethodId, (String, String)> = HashMap::new();

    let mut iter = tokens.into_iter().peekable();
    while let Some(header) = iter.next() {
        let opens = iter.next_if(|tok| tok.text == "{").is_some();
        if !opens || !is_word(header.text) {
            return Err(ProtolistError::IllegalModule {
                line: header.line,
                found: header.text.to_string(),
            });
        }

        let module_name = header.text.to_string();
        if !module_names.insert(module_name.clone()) {
            return Err(ProtolistError::RepeatedModule { name: module_name });
        }

        let mut methods: Vec<ProtoMethod> = Vec::new();
        loop {
            let Some(tok) = iter.next() else {
                return Err(ProtolistError::UnterminatedModule {
                    module: module_name,
                });
            };
            if tok.text == "}" {
                break;
            }
            if tok.text == "{" {
                return Err(ProtolistError::IllegalModule {
                    line: tok.line,
                    found: tok.text.to_string(),
                });
            }

            let method = parse_entry(&tok, &module_name)?;
            // Names only clash inside a module: qualified and call names carry the module
            // prefix, and default argument types live under `proto.<module>`.
            if methods.iter().any(|m| m.name == method.name) {
                return Err(ProtolistError::RepeatedMethod {
                    module: module_name,
                    name: method.name,
                });
            }
            if let Some((module, name)) = ids.get(&method.id) {
                return Err(ProtolistError::RepeatedId {
                    id: method.id,
                    module: module.clone(),
                    name: name.clone(),
                });
            }
            ids.insert(method.id, (module_name.clone(), method.name.clone()));
            methods.push(method);
        }

        modules.push(ProtoModule {
            name: module_name,
            methods,
        });
    }

    Ok(modules)
}

/// Flatten parsed modules into the records the runtime registry consumes.
pub fn descriptor_records(modules: &[ProtoModule]) -> Vec<DescriptorRecord> {
    modules
        .iter()
        .flat_map(|module| {
            module.methods.iter().map(move |method| DescriptorRecord {
                id: method.id,
                qualified_name: format!("{}.{}", camel_case(&module.name), camel_case(&method.name)),
                call_name: format!("{}.{}", module.name, method.name),
                argument_type: method.input.clone(),
                reply_type: method.output.clone(),
            })
        })
        .collect()
}

/// `query_hirable_hero` -> `QueryHirableHero`.
pub fn camel_case(src: &str) -> String {
    src.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };

        let mut rest = line;
        while let Some(pos) = rest.find(['{', '}']) {
            push_token(&mut tokens, idx, &rest[..pos]);
            push_token(&mut tokens, idx, &rest[pos..pos + 1]);
            rest = &rest[pos + 1..];
        }
        push_token(&mut tokens, idx, rest);
    }
    tokens
}

fn push_token<'a>(tokens: &mut Vec<Token<'a>>, idx: usize, text: &'a str) {
    let text = text.trim();
    if !text.is_empty() {
        tokens.push(Token {
            line: idx + 1,
            text,
        });
    }
}

fn is_word(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric())
}

fn entry_regex() -> &'static Regex {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY.get_or_init(|| {
        Regex::new(
            r"^([a-zA-Z0-9._]+)\s*(?::\s*([a-zA-Z0-9._]*)\s*(\[\s*[a-zA-Z0-9._]*\s*\])?)?\s*=\s*([0-9]+)$",
        )
        .expect("protolist entry regex is valid")
    })
}

fn parse_entry(tok: &Token<'_>, module: &str) -> Result<ProtoMethod, ProtolistError> {
    let caps = entry_regex()
        .captures(tok.text)
        .ok_or_else(|| ProtolistError::InvalidEntry {
            line: tok.line,
            entry: tok.text.to_string(),
        })?;

    let name = caps[1].to_string();
    let raw_id = &caps[4];
    let id: MethodId = match raw_id.parse() {
        Ok(id) if id > 0 => id,
        _ => {
            return Err(ProtolistError::InvalidId {
                line: tok.line,
                id: raw_id.to_string(),
            })
        }
    };

    let input = match caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        Some(explicit) => qualify(explicit, module),
        None => qualify(&name, module),
    };

    let output = match caps.get(3) {
        None => Some(format!("{input}{RESPONSE_SUFFIX}")),
        Some(bracket) => {
            let inner: String = bracket
                .as_str()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            if inner.is_empty() {
                None
            } else {
                Some(qualify(&inner, module))
            }
        }
    };

    Ok(ProtoMethod {
        id,
        name,
        input,
        output,
    })
}

fn qualify(ty: &str, module: &str) -> String {
    match ty.strip_prefix(ABSOLUTE_MARKER) {
        Some(absolute) => absolute.to_string(),
        None => format!("{PROTO_PREFIX}.{module}.{}", camel_case(ty)),
    }
}
